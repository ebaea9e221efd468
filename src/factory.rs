//! Builds a configured generator from a [`GeneratorConfig`].

use crate::config::{GeneratorConfig, GeneratorKind, ResolverConfig};
use crate::error::Error;
use crate::generator::IdGenerator;
use crate::resolver::SequenceResolver;
use crate::snowflake::Snowflake;
use crate::sonyflake::Sonyflake;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Creates generators from configuration. Closures taking a
/// `&GeneratorConfig` are factories too.
pub trait GeneratorFactory: Send + Sync {
    fn create(&self, config: &GeneratorConfig) -> Result<Box<dyn IdGenerator>, Error>;
}

impl<F> GeneratorFactory for F
where
    F: Fn(&GeneratorConfig) -> Result<Box<dyn IdGenerator>, Error> + Send + Sync,
{
    fn create(&self, config: &GeneratorConfig) -> Result<Box<dyn IdGenerator>, Error> {
        self(config)
    }
}

type Constructor = dyn Fn(&GeneratorConfig) -> Box<dyn IdGenerator> + Send + Sync;

/// Named factories and custom generator types.
///
/// Resolvers built from configuration are kept per [`ResolverConfig`], so
/// every generator a registry builds from the same resolver settings draws
/// from the same counters.
///
/// ```
/// use flakeid::{GeneratorConfig, GeneratorKind, IdGenerator, Registry};
///
/// let config = GeneratorConfig {
///     kind: GeneratorKind::Sonyflake,
///     machine_id: 7,
///     ..Default::default()
/// };
/// let generator = Registry::new().build(&config).unwrap();
/// let id = generator.id().unwrap();
/// assert_eq!(generator.parse_id(&id, false).unwrap().machine_id, Some(7));
/// ```
#[derive(Default)]
pub struct Registry {
    factories: HashMap<String, Arc<dyn GeneratorFactory>>,
    types: HashMap<String, Arc<Constructor>>,
    resolver: Option<Arc<dyn SequenceResolver>>,
    resolvers: Mutex<HashMap<ResolverConfig, Arc<dyn SequenceResolver>>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses `resolver` for every generator instead of the configured one.
    pub fn with_resolver(mut self, resolver: Arc<dyn SequenceResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Registers a factory that `config.factory = name` selects.
    pub fn register_factory(
        &mut self,
        name: impl Into<String>,
        factory: impl GeneratorFactory + 'static,
    ) -> &mut Self {
        self.factories.insert(name.into(), Arc::new(factory));
        self
    }

    /// Registers a generator type that `config.kind = name` selects.
    pub fn register_type<F>(&mut self, name: impl Into<String>, constructor: F) -> &mut Self
    where
        F: Fn(&GeneratorConfig) -> Box<dyn IdGenerator> + Send + Sync + 'static,
    {
        self.types.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Builds the generator `config` asks for.
    ///
    /// A configured factory wins over `kind`. Otherwise built-in kinds are
    /// constructed directly and any other kind must be a registered type.
    pub fn build(&self, config: &GeneratorConfig) -> Result<Box<dyn IdGenerator>, Error> {
        if let Some(name) = &config.factory {
            let factory = self.factories.get(name).ok_or_else(|| {
                Error::InvalidFactoryResult(format!("no generator factory registered as `{name}`"))
            })?;
            return self.build_with(config, factory.as_ref());
        }

        let mut generator: Box<dyn IdGenerator> = match &config.kind {
            GeneratorKind::Snowflake => Box::new(build_snowflake(config)?),
            GeneratorKind::Sonyflake => Box::new(build_sonyflake(config)?),
            GeneratorKind::Custom(name) => {
                let constructor = self
                    .types
                    .get(name)
                    .ok_or_else(|| Error::UnsupportedGeneratorKind(name.clone()))?;
                constructor(config)
            }
        };
        self.configure(generator.as_mut(), config)?;
        tracing::debug!(kind = %config.kind, "generator built");
        Ok(generator)
    }

    /// Builds a generator through `factory`, bypassing `config.kind`.
    pub fn build_with(
        &self,
        config: &GeneratorConfig,
        factory: &dyn GeneratorFactory,
    ) -> Result<Box<dyn IdGenerator>, Error> {
        let mut generator = factory
            .create(config)
            .map_err(|e| Error::InvalidFactoryResult(e.to_string()))?;
        self.configure(generator.as_mut(), config)
            .map_err(|e| Error::InvalidFactoryResult(e.to_string()))?;
        tracing::debug!(factory = ?config.factory, "generator built by factory");
        Ok(generator)
    }

    fn resolver(&self, config: &GeneratorConfig) -> Result<Arc<dyn SequenceResolver>, Error> {
        if let Some(resolver) = &self.resolver {
            return Ok(Arc::clone(resolver));
        }
        let mut resolvers = self.resolvers.lock();
        if let Some(resolver) = resolvers.get(&config.resolver) {
            return Ok(Arc::clone(resolver));
        }
        let resolver = config.resolver.build()?;
        resolvers.insert(config.resolver.clone(), Arc::clone(&resolver));
        Ok(resolver)
    }

    fn configure(&self, generator: &mut dyn IdGenerator, config: &GeneratorConfig) -> Result<(), Error> {
        generator.set_start_timestamp(config.epoch_millis()?)?;
        generator.set_sequence_resolver(self.resolver(config)?)
    }
}

fn node_id<T: TryFrom<u32>>(what: &str, value: u32, max: u32) -> Result<T, Error> {
    if value > max {
        return Err(Error::InvalidConfiguration(format!(
            "{what} {value} is greater than the max allowed value {max}"
        )));
    }
    T::try_from(value).map_err(|_| Error::InvalidConfiguration(format!("{what} {value} is out of range")))
}

fn build_snowflake(config: &GeneratorConfig) -> Result<Snowflake, Error> {
    let data_center_id: u16 = node_id("datacenter id", config.datacenter_id, 31)?;
    let worker_id: u16 = node_id("worker id", config.worker_id, 31)?;
    Snowflake::builder()
        .data_center_id(&|| Ok(data_center_id))
        .worker_id(&|| Ok(worker_id))
        .clock_policy(config.clock_policy())
        .exhaustion_timeout(config.exhaustion_timeout())
        .finalize()
}

fn build_sonyflake(config: &GeneratorConfig) -> Result<Sonyflake, Error> {
    let machine_id: u16 = node_id("machine id", config.machine_id, u32::from(u16::MAX))?;
    Sonyflake::builder()
        .machine_id(&|| Ok(machine_id))
        .tick_ms(config.tick_ms)
        .clock_policy(config.clock_policy())
        .exhaustion_timeout(config.exhaustion_timeout())
        .finalize()
}
