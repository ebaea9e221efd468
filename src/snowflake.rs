use crate::builder::SnowflakeBuilder;
use crate::error::*;
use crate::generator::{IdGenerator, ParsedId, Sequencer};
use crate::id::parse_decimal;
use crate::resolver::SequenceResolver;
use std::sync::Arc;

/// bit length of time
pub(crate) const BIT_LEN_TIME: u64 = 41;
/// bit length of the data center id
pub(crate) const BIT_LEN_DATA_CENTER_ID: u64 = 5;
/// bit length of the worker id
pub(crate) const BIT_LEN_WORKER_ID: u64 = 5;
/// bit length of sequence number
pub(crate) const BIT_LEN_SEQUENCE: u64 = 63 - BIT_LEN_TIME - BIT_LEN_DATA_CENTER_ID - BIT_LEN_WORKER_ID;

/// Largest data center id.
pub const MAX_DATA_CENTER_ID: u8 = (1 << BIT_LEN_DATA_CENTER_ID) - 1;
/// Largest worker id.
pub const MAX_WORKER_ID: u8 = (1 << BIT_LEN_WORKER_ID) - 1;
/// Largest sequence number within one millisecond.
pub const MAX_SEQUENCE: u64 = (1 << BIT_LEN_SEQUENCE) - 1;
/// Largest time offset, in milliseconds, an id can hold.
pub const MAX_ELAPSED: i64 = (1 << BIT_LEN_TIME) - 1;

const WORKER_ID_SHIFT: u64 = BIT_LEN_SEQUENCE;
const DATA_CENTER_ID_SHIFT: u64 = BIT_LEN_SEQUENCE + BIT_LEN_WORKER_ID;
const TIME_SHIFT: u64 = BIT_LEN_SEQUENCE + BIT_LEN_WORKER_ID + BIT_LEN_DATA_CENTER_ID;

/// SharedSnowflake is shared between Snowflake instances.
/// This struct is not exposed to the public.
pub(crate) struct SharedSnowflake {
    pub(crate) start_time: i64,
    pub(crate) data_center_id: u8,
    pub(crate) worker_id: u8,
    pub(crate) sequencer: Sequencer,
}

/// Snowflake is a distributed unique ID generator.
///
/// An id holds 41 bits of milliseconds since the epoch, a 5 bit data center
/// id, a 5 bit worker id and a 12 bit sequence. It is thread-safe and can be
/// cloned to be used in multiple threads; clones share one sequence state.
pub struct Snowflake(pub(crate) Arc<SharedSnowflake>);

impl Snowflake {
    /// Create a new Snowflake for the given node with the default configuration.
    /// For custom configuration see [`builder`].
    ///
    /// [`builder`]: struct.Snowflake.html#method.builder
    pub fn new(data_center_id: u8, worker_id: u8) -> Result<Self, Error> {
        SnowflakeBuilder::new()
            .data_center_id(&|| Ok(u16::from(data_center_id)))
            .worker_id(&|| Ok(u16::from(worker_id)))
            .finalize()
    }

    /// Create a new [`SnowflakeBuilder`] to construct a Snowflake.
    pub fn builder<'a>() -> SnowflakeBuilder<'a> {
        SnowflakeBuilder::new()
    }

    pub(crate) fn new_inner(shared: Arc<SharedSnowflake>) -> Self {
        Self(shared)
    }

    /// Generate the next unique id.
    /// After the Snowflake time overflows, next_id returns an error.
    #[tracing::instrument(level = "trace", skip(self), fields(node = %self.0.sequencer.node))]
    pub fn next_id(&self) -> Result<u64, Error> {
        let (now, sequence) = self.0.sequencer.next()?;
        let elapsed = now - self.0.start_time;
        if !(0..=MAX_ELAPSED).contains(&elapsed) {
            return Err(Error::OverTimeLimit);
        }
        Ok(compose(
            elapsed as u64,
            self.0.data_center_id,
            self.0.worker_id,
            sequence,
        ))
    }

    /// The epoch in milliseconds since the Unix epoch.
    pub fn start_time(&self) -> i64 {
        self.0.start_time
    }

    pub fn data_center_id(&self) -> u8 {
        self.0.data_center_id
    }

    pub fn worker_id(&self) -> u8 {
        self.0.worker_id
    }

    pub fn resolver_name(&self) -> &'static str {
        self.0.sequencer.resolver.name()
    }

    fn shared_mut(&mut self) -> Result<&mut SharedSnowflake, Error> {
        Arc::get_mut(&mut self.0).ok_or_else(|| {
            Error::InvalidConfiguration("generator is shared and can no longer be configured".into())
        })
    }
}

/// Returns a new `Snowflake` referencing the same state as `self`.
/// This is used for concurrent use.
impl Clone for Snowflake {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl IdGenerator for Snowflake {
    fn id(&self) -> Result<String, Error> {
        self.next_id().map(|id| id.to_string())
    }

    fn parse_id(&self, id: &str, transform: bool) -> Result<ParsedId, Error> {
        let parts = decompose(parse_decimal(id)?);
        let mut timestamp = parts.time as i64;
        if transform {
            timestamp += self.0.start_time;
        }
        Ok(ParsedId {
            timestamp,
            sequence: parts.sequence,
            datacenter_id: Some(parts.data_center_id),
            worker_id: Some(parts.worker_id),
            machine_id: None,
        })
    }

    fn set_start_timestamp(&mut self, epoch_ms: i64) -> Result<(), Error> {
        let shared = self.shared_mut()?;
        check_epoch(epoch_ms, shared.sequencer.clock.now_millis(), MAX_ELAPSED)?;
        shared.start_time = epoch_ms;
        Ok(())
    }

    fn set_sequence_resolver(&mut self, resolver: Arc<dyn SequenceResolver>) -> Result<(), Error> {
        self.shared_mut()?.sequencer.resolver = resolver;
        Ok(())
    }
}

/// Rejects an epoch in the future or one so old that ids would overflow.
pub(crate) fn check_epoch(epoch_ms: i64, now_ms: i64, max_elapsed_ms: i64) -> Result<(), Error> {
    let elapsed = now_ms - epoch_ms;
    if elapsed < 0 {
        return Err(Error::InvalidConfiguration(format!(
            "start timestamp {epoch_ms} is ahead of the current time"
        )));
    }
    if elapsed > max_elapsed_ms {
        return Err(Error::OverTimeLimit);
    }
    Ok(())
}

/// Pack Snowflake fields into an id.
pub fn compose(elapsed: u64, data_center_id: u8, worker_id: u8, sequence: u64) -> u64 {
    (elapsed << TIME_SHIFT)
        | (u64::from(data_center_id) << DATA_CENTER_ID_SHIFT)
        | (u64::from(worker_id) << WORKER_ID_SHIFT)
        | sequence
}

/// DecomposedSnowflake is the parts of a Snowflake ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecomposedSnowflake {
    pub id: u64,
    pub msb: u64,
    /// Milliseconds since the generator's epoch.
    pub time: u64,
    pub data_center_id: u64,
    pub worker_id: u64,
    pub sequence: u64,
}

/// The mask for data center ID.
const MASK_DATA_CENTER_ID: u64 = ((1 << BIT_LEN_DATA_CENTER_ID) - 1) << DATA_CENTER_ID_SHIFT;
/// The mask for worker ID.
const MASK_WORKER_ID: u64 = ((1 << BIT_LEN_WORKER_ID) - 1) << WORKER_ID_SHIFT;
/// The mask for sequence number.
const MASK_SEQUENCE: u64 = (1 << BIT_LEN_SEQUENCE) - 1;

/// Break a Snowflake ID up into its parts.
pub fn decompose(id: u64) -> DecomposedSnowflake {
    DecomposedSnowflake {
        id,
        msb: id >> 63,
        time: (id >> TIME_SHIFT) & MAX_ELAPSED as u64,
        data_center_id: (id & MASK_DATA_CENTER_ID) >> DATA_CENTER_ID_SHIFT,
        worker_id: (id & MASK_WORKER_ID) >> WORKER_ID_SHIFT,
        sequence: id & MASK_SEQUENCE,
    }
}
