use crate::clock::{Clock, ClockPolicy, DEFAULT_EPOCH_MILLIS, SystemClock, to_millis};
use crate::error::{BoxDynError, Error};
use crate::generator::Sequencer;
use crate::resolver::{MemoryStore, NodeKey, SequenceResolver, SharedStoreResolver};
use crate::snowflake::{self, SharedSnowflake, Snowflake, check_epoch};
use crate::sonyflake::{self, SharedSonyflake, Sonyflake};
use chrono::prelude::*;
use std::sync::Arc;
use std::time::Duration;

#[cfg(feature = "ip-fallback")]
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

type IdFn<'a> = &'a dyn Fn() -> Result<u16, BoxDynError>;
type CheckFn<'a> = &'a dyn Fn(u16) -> bool;

/// Settings shared by both builders.
struct Options {
    start_time: Option<DateTime<Utc>>,
    resolver: Option<Arc<dyn SequenceResolver>>,
    clock: Option<Arc<dyn Clock>>,
    clock_policy: ClockPolicy,
    exhaustion_timeout: Duration,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            start_time: None,
            resolver: None,
            clock: None,
            clock_policy: ClockPolicy::default(),
            exhaustion_timeout: Duration::from_millis(100),
        }
    }
}

impl Options {
    fn clock(&self) -> Arc<dyn Clock> {
        self.clock.clone().unwrap_or_else(|| Arc::new(SystemClock))
    }

    /// Validates the start time against `clock` and returns it in milliseconds.
    fn start_millis(&self, clock: &dyn Clock, max_elapsed_ms: i64) -> Result<i64, Error> {
        let now = clock.now_millis();
        let start = match self.start_time {
            Some(start_time) => {
                if to_millis(start_time) > now {
                    return Err(Error::StartTimeAheadOfCurrentTime(start_time));
                }
                to_millis(start_time)
            }
            // Default start time
            None => DEFAULT_EPOCH_MILLIS.min(now),
        };
        check_epoch(start, now, max_elapsed_ms)?;
        Ok(start)
    }

    fn sequencer(self, node: NodeKey, clock: Arc<dyn Clock>) -> Sequencer {
        let resolver = self
            .resolver
            .unwrap_or_else(|| Arc::new(SharedStoreResolver::new(MemoryStore::new())));
        tracing::debug!(%node, resolver = resolver.name(), "sequencer configured");
        Sequencer::new(
            node,
            resolver,
            clock,
            self.clock_policy,
            self.exhaustion_timeout,
        )
    }
}

macro_rules! common_setters {
    () => {
        /// Set the start time.
        /// If the time is set later than the current time, 'finalize' will fail.
        pub fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
            self.options.start_time = Some(start_time);
            self
        }

        /// Set the resolver the sequence numbers come from.
        /// Defaults to a process local counter.
        pub fn sequence_resolver(mut self, resolver: Arc<dyn SequenceResolver>) -> Self {
            self.options.resolver = Some(resolver);
            self
        }

        /// Set the clock. Defaults to the system clock.
        pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
            self.options.clock = Some(clock);
            self
        }

        /// Set what happens when the clock moves backwards.
        pub fn clock_policy(mut self, clock_policy: ClockPolicy) -> Self {
            self.options.clock_policy = clock_policy;
            self
        }

        /// Set how long to wait for a fresh bucket once the sequence space of
        /// the current one is used up.
        pub fn exhaustion_timeout(mut self, exhaustion_timeout: Duration) -> Self {
            self.options.exhaustion_timeout = exhaustion_timeout;
            self
        }
    };
}

/// A builder for building the [`Snowflake`] generator.
pub struct SnowflakeBuilder<'a> {
    options: Options,
    data_center_id: Option<IdFn<'a>>,
    worker_id: Option<IdFn<'a>>,
    check_data_center_id: Option<CheckFn<'a>>,
}

impl Default for SnowflakeBuilder<'_> {
    fn default() -> Self {
        SnowflakeBuilder::new()
    }
}

impl<'a> SnowflakeBuilder<'a> {
    /// Construct a new builder for the build of [`Snowflake`].
    pub fn new() -> Self {
        Self {
            options: Options::default(),
            data_center_id: None,
            worker_id: None,
            check_data_center_id: None,
        }
    }

    common_setters!();

    /// Set up the data center ID.
    /// If the provided closure returns an error, 'finalize' will fail.
    pub fn data_center_id(mut self, data_center_id: IdFn<'a>) -> Self {
        self.data_center_id = Some(data_center_id);
        self
    }

    /// Set the worker ID.
    /// If the provided closure returns an error, 'finalize' will fail.
    pub fn worker_id(mut self, worker_id: IdFn<'a>) -> Self {
        self.worker_id = Some(worker_id);
        self
    }

    /// Set up a function to check the data center ID.
    /// If the function returns 'false', 'finalize' will fail.
    pub fn check_data_center_id(mut self, check_data_center_id: CheckFn<'a>) -> Self {
        self.check_data_center_id = Some(check_data_center_id);
        self
    }

    /// Finish building and create a Snowflake instance.
    /// This method will return an error if any of the configured functions return an error or if validation fails.
    pub fn finalize(self) -> Result<Snowflake, Error> {
        let clock = self.options.clock();
        let start_time = self
            .options
            .start_millis(clock.as_ref(), snowflake::MAX_ELAPSED)?;

        #[cfg(feature = "ip-fallback")]
        let ip_bits = lower_16_bit_private_ip();

        let data_center_id = match self.data_center_id {
            Some(data_center_id_fn) => data_center_id_fn().map_err(Error::DataCenterIdFailed)?,
            None => {
                #[cfg(feature = "ip-fallback")]
                {
                    (ip_bits.ok_or(Error::NoPrivateIp)? >> 8) & u16::from(snowflake::MAX_DATA_CENTER_ID)
                }
                #[cfg(not(feature = "ip-fallback"))]
                {
                    return Err(Error::DataCenterIdFailed(
                        "Data Center ID not provided and `ip-fallback` feature is disabled".into(),
                    ));
                }
            }
        };
        let data_center_id = check_range("data center id", data_center_id, snowflake::MAX_DATA_CENTER_ID)?;

        if let Some(check_data_center_id) = self.check_data_center_id
            && !check_data_center_id(u16::from(data_center_id))
        {
            return Err(Error::CheckDataCenterIdFailed);
        }

        let worker_id = match self.worker_id {
            Some(worker_id_fn) => worker_id_fn().map_err(Error::WorkerIdFailed)?,
            None => {
                #[cfg(feature = "ip-fallback")]
                {
                    ip_bits.ok_or(Error::NoPrivateIp)? & u16::from(snowflake::MAX_WORKER_ID)
                }
                #[cfg(not(feature = "ip-fallback"))]
                {
                    return Err(Error::WorkerIdFailed(
                        "Worker ID not provided and `ip-fallback` feature is disabled".into(),
                    ));
                }
            }
        };
        let worker_id = check_range("worker id", worker_id, snowflake::MAX_WORKER_ID)?;

        let node = NodeKey::Snowflake {
            datacenter_id: data_center_id,
            worker_id,
        };
        let shared = Arc::new(SharedSnowflake {
            start_time,
            data_center_id,
            worker_id,
            sequencer: self.options.sequencer(node, clock),
        });
        Ok(Snowflake::new_inner(shared))
    }
}

/// A builder for building the [`Sonyflake`] generator.
pub struct SonyflakeBuilder<'a> {
    options: Options,
    machine_id: Option<IdFn<'a>>,
    check_machine_id: Option<CheckFn<'a>>,
    tick_ms: i64,
}

impl Default for SonyflakeBuilder<'_> {
    fn default() -> Self {
        SonyflakeBuilder::new()
    }
}

impl<'a> SonyflakeBuilder<'a> {
    /// Construct a new builder for the build of [`Sonyflake`].
    pub fn new() -> Self {
        Self {
            options: Options::default(),
            machine_id: None,
            check_machine_id: None,
            tick_ms: sonyflake::DEFAULT_TICK_MS,
        }
    }

    common_setters!();

    /// Set the machine ID.
    /// If the provided closure returns an error, 'finalize' will fail.
    pub fn machine_id(mut self, machine_id: IdFn<'a>) -> Self {
        self.machine_id = Some(machine_id);
        self
    }

    /// Set up a function to check the machine ID.
    /// If the function returns 'false', 'finalize' will fail.
    pub fn check_machine_id(mut self, check_machine_id: CheckFn<'a>) -> Self {
        self.check_machine_id = Some(check_machine_id);
        self
    }

    /// Set the width of one time tick in milliseconds.
    pub fn tick_ms(mut self, tick_ms: i64) -> Self {
        self.tick_ms = tick_ms;
        self
    }

    /// Finish building and create a Sonyflake instance.
    pub fn finalize(self) -> Result<Sonyflake, Error> {
        if self.tick_ms <= 0 {
            return Err(Error::InvalidConfiguration(format!(
                "tick width must be positive, got {}ms",
                self.tick_ms
            )));
        }

        let clock = self.options.clock();
        let max_elapsed_ms = sonyflake::MAX_ELAPSED.saturating_mul(self.tick_ms);
        let start_time = self.options.start_millis(clock.as_ref(), max_elapsed_ms)?;

        let machine_id = match self.machine_id {
            Some(machine_id_fn) => machine_id_fn().map_err(Error::MachineIdFailed)?,
            None => {
                #[cfg(feature = "ip-fallback")]
                {
                    lower_16_bit_private_ip().ok_or(Error::NoPrivateIp)?
                }
                #[cfg(not(feature = "ip-fallback"))]
                {
                    return Err(Error::MachineIdFailed(
                        "Machine ID not provided and `ip-fallback` feature is disabled".into(),
                    ));
                }
            }
        };

        if let Some(check_machine_id) = self.check_machine_id
            && !check_machine_id(machine_id)
        {
            return Err(Error::CheckMachineIdFailed);
        }

        let node = NodeKey::Sonyflake {
            machine_id,
            tick_ms: self.tick_ms,
        };
        let shared = Arc::new(SharedSonyflake {
            start_time,
            machine_id,
            tick_ms: self.tick_ms,
            sequencer: self.options.sequencer(node, clock),
        });
        Ok(Sonyflake::new_inner(shared))
    }
}

fn check_range(what: &str, value: u16, max: u8) -> Result<u8, Error> {
    u8::try_from(value)
        .ok()
        .filter(|value| *value <= max)
        .ok_or_else(|| {
            Error::InvalidConfiguration(format!(
                "{what} {value} is greater than the max allowed value {max}"
            ))
        })
}

/// Lower 16 bits of the host's private IP address (v4 or v6).
#[cfg(feature = "ip-fallback")]
fn lower_16_bit_private_ip() -> Option<u16> {
    if let Some(ipv4) = private_ipv4() {
        let octets = ipv4.octets();
        return Some(u16::from(octets[2]) << 8 | u16::from(octets[3]));
    }

    private_ipv6().map(|ipv6| ipv6.segments()[7])
}

#[cfg(feature = "ip-fallback")]
fn private_ipv4() -> Option<Ipv4Addr> {
    pnet_datalink::interfaces()
        .iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback() && !iface.ips.is_empty())
        .flat_map(|iface| iface.ips.iter())
        .find_map(|network| match network.ip() {
            IpAddr::V4(ipv4) if is_private_ipv4(&ipv4) => Some(ipv4),
            _ => None,
        })
}

#[cfg(feature = "ip-fallback")]
fn is_private_ipv4(ip: &Ipv4Addr) -> bool {
    let octets = ip.octets();
    matches!(octets[0], 10)
        || (octets[0] == 172 && (16..=31).contains(&octets[1]))
        || (octets[0] == 192 && octets[1] == 168)
}

#[cfg(feature = "ip-fallback")]
fn private_ipv6() -> Option<Ipv6Addr> {
    pnet_datalink::interfaces()
        .iter()
        .filter(|iface| iface.is_up() && !iface.is_loopback() && !iface.ips.is_empty())
        .flat_map(|iface| iface.ips.iter())
        .find_map(|network| match network.ip() {
            IpAddr::V6(ipv6) if is_private_ipv6(&ipv6) => Some(ipv6),
            _ => None,
        })
}

#[cfg(feature = "ip-fallback")]
fn is_private_ipv6(ip: &Ipv6Addr) -> bool {
    // fc00::/7 (Unique Local Address)
    // fe80::/10 (Link-Local Address)
    (ip.segments()[0] & 0xfe00) == 0xfc00 || (ip.segments()[0] & 0xffc0) == 0xfe80
}

#[cfg(all(test, feature = "ip-fallback"))]
mod tests {
    use super::*;

    #[test]
    fn test_private_ranges() {
        assert!(is_private_ipv4(&Ipv4Addr::new(10, 0, 0, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(172, 20, 1, 1)));
        assert!(is_private_ipv4(&Ipv4Addr::new(192, 168, 1, 1)));
        assert!(!is_private_ipv4(&Ipv4Addr::new(8, 8, 8, 8)));
        assert!(is_private_ipv6(&"fd00::1".parse().unwrap()));
        assert!(!is_private_ipv6(&"2001:db8::1".parse().unwrap()));
    }
}
