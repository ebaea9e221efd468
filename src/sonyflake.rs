use crate::builder::SonyflakeBuilder;
use crate::error::*;
use crate::generator::{IdGenerator, ParsedId, Sequencer};
use crate::id::parse_decimal;
use crate::resolver::SequenceResolver;
use crate::snowflake::check_epoch;
use std::sync::Arc;

/// bit length of time
pub(crate) const BIT_LEN_TIME: u64 = 39;
/// bit length of sequence number
pub(crate) const BIT_LEN_SEQUENCE: u64 = 8;
/// bit length of machine id
pub(crate) const BIT_LEN_MACHINE_ID: u64 = 63 - BIT_LEN_TIME - BIT_LEN_SEQUENCE;

/// Largest sequence number within one tick.
pub const MAX_SEQUENCE: u64 = (1 << BIT_LEN_SEQUENCE) - 1;
/// Largest time offset, in ticks, an id can hold.
pub const MAX_ELAPSED: i64 = (1 << BIT_LEN_TIME) - 1;
/// Default tick width in milliseconds.
pub const DEFAULT_TICK_MS: i64 = 10;

const SEQUENCE_SHIFT: u64 = BIT_LEN_MACHINE_ID;
const TIME_SHIFT: u64 = BIT_LEN_SEQUENCE + BIT_LEN_MACHINE_ID;

pub(crate) struct SharedSonyflake {
    /// Epoch in milliseconds.
    pub(crate) start_time: i64,
    pub(crate) machine_id: u16,
    pub(crate) tick_ms: i64,
    pub(crate) sequencer: Sequencer,
}

/// Sonyflake trades per-tick capacity for lifetime: 39 bits of 10 msec ticks,
/// an 8 bit sequence and a 16 bit machine id.
///
/// Like [`Snowflake`](crate::Snowflake), clones share one sequence state.
pub struct Sonyflake(pub(crate) Arc<SharedSonyflake>);

impl Sonyflake {
    pub fn new(machine_id: u16) -> Result<Self, Error> {
        SonyflakeBuilder::new()
            .machine_id(&|| Ok(machine_id))
            .finalize()
    }

    pub fn builder<'a>() -> SonyflakeBuilder<'a> {
        SonyflakeBuilder::new()
    }

    pub(crate) fn new_inner(shared: Arc<SharedSonyflake>) -> Self {
        Self(shared)
    }

    /// Generate the next unique id.
    #[tracing::instrument(level = "trace", skip(self), fields(node = %self.0.sequencer.node))]
    pub fn next_id(&self) -> Result<u64, Error> {
        let (tick, sequence) = self.0.sequencer.next()?;
        let elapsed = tick - self.start_tick();
        if !(0..=MAX_ELAPSED).contains(&elapsed) {
            return Err(Error::OverTimeLimit);
        }
        Ok(compose(elapsed as u64, sequence, self.0.machine_id))
    }

    /// The epoch in milliseconds since the Unix epoch.
    pub fn start_time(&self) -> i64 {
        self.0.start_time
    }

    pub fn machine_id(&self) -> u16 {
        self.0.machine_id
    }

    pub fn tick_ms(&self) -> i64 {
        self.0.tick_ms
    }

    pub fn resolver_name(&self) -> &'static str {
        self.0.sequencer.resolver.name()
    }

    fn start_tick(&self) -> i64 {
        self.0.start_time.div_euclid(self.0.tick_ms)
    }

    fn shared_mut(&mut self) -> Result<&mut SharedSonyflake, Error> {
        Arc::get_mut(&mut self.0).ok_or_else(|| {
            Error::InvalidConfiguration("generator is shared and can no longer be configured".into())
        })
    }
}

impl Clone for Sonyflake {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl IdGenerator for Sonyflake {
    fn id(&self) -> Result<String, Error> {
        self.next_id().map(|id| id.to_string())
    }

    fn parse_id(&self, id: &str, transform: bool) -> Result<ParsedId, Error> {
        let parts = decompose(parse_decimal(id)?);
        let mut timestamp = parts.time as i64;
        if transform {
            timestamp = (timestamp + self.start_tick()) * self.0.tick_ms;
        }
        Ok(ParsedId {
            timestamp,
            sequence: parts.sequence,
            datacenter_id: None,
            worker_id: None,
            machine_id: Some(parts.machine_id),
        })
    }

    fn set_start_timestamp(&mut self, epoch_ms: i64) -> Result<(), Error> {
        let shared = self.shared_mut()?;
        let now = shared.sequencer.clock.now_millis();
        check_epoch(epoch_ms, now, MAX_ELAPSED.saturating_mul(shared.tick_ms))?;
        shared.start_time = epoch_ms;
        Ok(())
    }

    fn set_sequence_resolver(&mut self, resolver: Arc<dyn SequenceResolver>) -> Result<(), Error> {
        self.shared_mut()?.sequencer.resolver = resolver;
        Ok(())
    }
}

/// Pack Sonyflake fields into an id.
pub fn compose(elapsed: u64, sequence: u64, machine_id: u16) -> u64 {
    (elapsed << TIME_SHIFT) | (sequence << SEQUENCE_SHIFT) | u64::from(machine_id)
}

/// DecomposedSonyflake is the parts of a Sonyflake ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecomposedSonyflake {
    pub id: u64,
    pub msb: u64,
    /// Ticks since the generator's epoch.
    pub time: u64,
    pub sequence: u64,
    pub machine_id: u64,
}

/// The mask for sequence number.
const MASK_SEQUENCE: u64 = ((1 << BIT_LEN_SEQUENCE) - 1) << SEQUENCE_SHIFT;
/// The mask for machine ID.
const MASK_MACHINE_ID: u64 = (1 << BIT_LEN_MACHINE_ID) - 1;

/// Break a Sonyflake ID up into its parts.
pub fn decompose(id: u64) -> DecomposedSonyflake {
    DecomposedSonyflake {
        id,
        msb: id >> 63,
        time: (id >> TIME_SHIFT) & MAX_ELAPSED as u64,
        sequence: (id & MASK_SEQUENCE) >> SEQUENCE_SHIFT,
        machine_id: id & MASK_MACHINE_ID,
    }
}
