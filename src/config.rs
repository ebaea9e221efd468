use crate::clock::ClockPolicy;
use crate::error::Error;
use crate::resolver::{MemoryStore, RandomResolver, SequenceResolver, SharedStoreResolver};
use crate::sonyflake::DEFAULT_TICK_MS;
use chrono::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

/// Prefix of the environment variables read by [`GeneratorConfig::from_env`].
pub const ENV_PREFIX: &str = "FLAKEID_";

/// Which generator to build.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum GeneratorKind {
    #[default]
    Snowflake,
    Sonyflake,
    /// A generator type registered under this name.
    Custom(String),
}

impl From<String> for GeneratorKind {
    fn from(kind: String) -> Self {
        match kind.to_ascii_lowercase().as_str() {
            "snowflake" => GeneratorKind::Snowflake,
            "sonyflake" => GeneratorKind::Sonyflake,
            _ => GeneratorKind::Custom(kind),
        }
    }
}

impl From<GeneratorKind> for String {
    fn from(kind: GeneratorKind) -> Self {
        kind.to_string()
    }
}

impl FromStr for GeneratorKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(GeneratorKind::from(s.to_owned()))
    }
}

impl fmt::Display for GeneratorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GeneratorKind::Snowflake => f.write_str("snowflake"),
            GeneratorKind::Sonyflake => f.write_str("sonyflake"),
            GeneratorKind::Custom(name) => f.write_str(name),
        }
    }
}

/// Which sequence resolver backs the generator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(tag = "driver", rename_all = "snake_case")]
pub enum ResolverConfig {
    /// A process local counter. [`build`](Self::build) makes a fresh one
    /// each call; a [`Registry`](crate::Registry) shares one between the
    /// generators it builds.
    #[default]
    Memory,
    /// Random start per bucket, no coordination.
    Random,
    /// Counter files under `dir`.
    File { dir: PathBuf },
    /// A Redis server, only with the `redis` feature.
    Redis { url: String },
}

impl ResolverConfig {
    pub fn build(&self) -> Result<Arc<dyn SequenceResolver>, Error> {
        match self {
            ResolverConfig::Memory => Ok(Arc::new(SharedStoreResolver::new(MemoryStore::new()))),
            ResolverConfig::Random => Ok(Arc::new(RandomResolver::new())),
            #[cfg(unix)]
            ResolverConfig::File { dir } => Ok(Arc::new(crate::resolver::FileLockResolver::new(dir)?)),
            #[cfg(not(unix))]
            ResolverConfig::File { .. } => Err(Error::InvalidConfiguration(
                "the file lock resolver needs a unix platform".into(),
            )),
            #[cfg(feature = "redis")]
            ResolverConfig::Redis { url } => {
                let store = crate::resolver::RedisStore::open(url).map_err(Error::ResolverUnavailable)?;
                Ok(Arc::new(SharedStoreResolver::new(store)))
            }
            #[cfg(not(feature = "redis"))]
            ResolverConfig::Redis { .. } => Err(Error::InvalidConfiguration(
                "the redis resolver needs the `redis` feature".into(),
            )),
        }
    }
}

/// Everything needed to build a generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub kind: GeneratorKind,
    /// Date (`2024-01-01`) or RFC 3339 time that ids count from. Ids can be
    /// generated for about 69 years (Snowflake) or 174 years (Sonyflake)
    /// past it.
    pub epoch: String,
    /// 0..=31
    pub datacenter_id: u32,
    /// 0..=31
    pub worker_id: u32,
    /// 0..=65535
    pub machine_id: u32,
    pub tick_ms: i64,
    /// Wait this long for a clock that went backwards to catch up. Absent
    /// means fail right away.
    pub clock_wait_ms: Option<u64>,
    pub exhaustion_timeout_ms: u64,
    pub resolver: ResolverConfig,
    /// Name of a registered generator factory that takes over construction.
    pub factory: Option<String>,
    /// Free-form options for custom generators and factories.
    pub custom_options: Map<String, Value>,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            kind: GeneratorKind::default(),
            epoch: "2024-01-01".to_owned(),
            datacenter_id: 0,
            worker_id: 0,
            machine_id: 0,
            tick_ms: DEFAULT_TICK_MS,
            clock_wait_ms: None,
            exhaustion_timeout_ms: 100,
            resolver: ResolverConfig::default(),
            factory: None,
            custom_options: Map::new(),
        }
    }
}

impl GeneratorConfig {
    /// Reads `FLAKEID_*` environment variables over the defaults.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, Error> {
        let var = |name: &str| lookup(&format!("{ENV_PREFIX}{name}"));
        let mut config = Self::default();

        if let Some(kind) = var("KIND") {
            config.kind = GeneratorKind::from(kind);
        }
        if let Some(epoch) = var("EPOCH") {
            config.epoch = epoch;
        }
        if let Some(value) = var("DATACENTER_ID") {
            config.datacenter_id = parse_var("DATACENTER_ID", &value)?;
        }
        if let Some(value) = var("WORKER_ID") {
            config.worker_id = parse_var("WORKER_ID", &value)?;
        }
        if let Some(value) = var("MACHINE_ID") {
            config.machine_id = parse_var("MACHINE_ID", &value)?;
        }
        if let Some(value) = var("TICK_MS") {
            config.tick_ms = parse_var("TICK_MS", &value)?;
        }
        if let Some(value) = var("CLOCK_WAIT_MS") {
            config.clock_wait_ms = Some(parse_var("CLOCK_WAIT_MS", &value)?);
        }
        if let Some(value) = var("EXHAUSTION_TIMEOUT_MS") {
            config.exhaustion_timeout_ms = parse_var("EXHAUSTION_TIMEOUT_MS", &value)?;
        }
        if let Some(driver) = var("RESOLVER") {
            config.resolver = match driver.trim() {
                "memory" => ResolverConfig::Memory,
                "random" => ResolverConfig::Random,
                "file" => ResolverConfig::File {
                    dir: var("RESOLVER_DIR").ok_or_else(|| missing("RESOLVER_DIR"))?.into(),
                },
                "redis" => ResolverConfig::Redis {
                    url: var("RESOLVER_URL").ok_or_else(|| missing("RESOLVER_URL"))?,
                },
                other => {
                    return Err(Error::InvalidConfiguration(format!(
                        "unknown resolver driver `{other}`"
                    )));
                }
            };
        }
        config.factory = var("FACTORY").filter(|factory| !factory.is_empty());

        Ok(config)
    }

    /// The epoch in milliseconds since the Unix epoch.
    pub fn epoch_millis(&self) -> Result<i64, Error> {
        let epoch = self.epoch.trim();
        if let Ok(date) = NaiveDate::parse_from_str(epoch, "%Y-%m-%d") {
            let midnight = date.and_time(NaiveTime::MIN);
            return Ok(Utc.from_utc_datetime(&midnight).timestamp_millis());
        }
        DateTime::parse_from_rfc3339(epoch)
            .map(|time| time.timestamp_millis())
            .map_err(|e| Error::InvalidConfiguration(format!("unparseable epoch `{epoch}`: {e}")))
    }

    pub fn clock_policy(&self) -> ClockPolicy {
        match self.clock_wait_ms {
            Some(ms) => ClockPolicy::Wait {
                max_wait: Duration::from_millis(ms),
            },
            None => ClockPolicy::Fail,
        }
    }

    pub fn exhaustion_timeout(&self) -> Duration {
        Duration::from_millis(self.exhaustion_timeout_ms)
    }
}

fn missing(name: &str) -> Error {
    Error::InvalidConfiguration(format!("{ENV_PREFIX}{name} is not set"))
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T, Error>
where
    T::Err: fmt::Display,
{
    value.trim().parse().map_err(|e| {
        Error::InvalidConfiguration(format!("{ENV_PREFIX}{name} `{value}` is invalid: {e}"))
    })
}
