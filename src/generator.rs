use crate::clock::{Clock, ClockPolicy};
use crate::error::Error;
use crate::resolver::{NodeKey, SequenceResolver};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// The capability every id generator offers, built-in or custom.
///
/// Framework glue only talks to generators through this trait.
pub trait IdGenerator: Send + Sync {
    /// Generates a new unique id as a decimal string.
    fn id(&self) -> Result<String, Error>;

    /// Breaks `id` up into its fields. With `transform` the timestamp is
    /// absolute milliseconds since the Unix epoch instead of the offset
    /// stored in the id.
    fn parse_id(&self, id: &str, transform: bool) -> Result<ParsedId, Error>;

    /// Sets the epoch, in milliseconds, that timestamps are measured from.
    fn set_start_timestamp(&mut self, epoch_ms: i64) -> Result<(), Error>;

    fn set_sequence_resolver(&mut self, resolver: Arc<dyn SequenceResolver>) -> Result<(), Error>;
}

/// The fields of a decoded id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ParsedId {
    pub timestamp: i64,
    pub sequence: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub datacenter_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_id: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub machine_id: Option<u64>,
}

/// Last bucket and sequence handed out.
#[derive(Debug, Default)]
pub(crate) struct SequenceState {
    last: Option<(i64, u64)>,
}

/// The bucket/sequence state machine shared by the generators.
pub(crate) struct Sequencer {
    pub(crate) node: NodeKey,
    pub(crate) resolver: Arc<dyn SequenceResolver>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) clock_policy: ClockPolicy,
    pub(crate) exhaustion_timeout: Duration,
    state: Mutex<SequenceState>,
}

impl Sequencer {
    pub(crate) fn new(
        node: NodeKey,
        resolver: Arc<dyn SequenceResolver>,
        clock: Arc<dyn Clock>,
        clock_policy: ClockPolicy,
        exhaustion_timeout: Duration,
    ) -> Self {
        Self {
            node,
            resolver,
            clock,
            clock_policy,
            exhaustion_timeout,
            state: Mutex::new(SequenceState::default()),
        }
    }

    /// Current bucket: wall-clock milliseconds divided by the bucket width.
    pub(crate) fn current_bucket(&self) -> i64 {
        self.clock
            .now_millis()
            .div_euclid(self.node.bucket_millis())
    }

    /// Returns the bucket and sequence of the next id.
    ///
    /// The state lock is held for the whole call, including waits, so ids of
    /// one generator are issued strictly in order.
    pub(crate) fn next(&self) -> Result<(i64, u64), Error> {
        let mut state = self.state.lock();
        let started = Instant::now();
        let max_sequence = self.node.max_sequence();

        loop {
            let mut bucket = self.current_bucket();
            if let Some((last_bucket, _)) = state.last
                && bucket < last_bucket
            {
                bucket = self.recover_clock(bucket, last_bucket)?;
            }

            let sequence = self.resolver.sequence(self.node, bucket)?;
            let stale = matches!(state.last, Some((b, s)) if b == bucket && sequence <= s);
            if sequence <= max_sequence && !stale {
                state.last = Some((bucket, sequence));
                return Ok((bucket, sequence));
            }

            let waited = started.elapsed();
            if waited >= self.exhaustion_timeout {
                tracing::warn!(
                    node = %self.node,
                    bucket,
                    ?waited,
                    "sequence exhausted"
                );
                return Err(Error::SequenceExhausted { bucket, waited });
            }
            tracing::debug!(node = %self.node, bucket, sequence, "waiting for next bucket");
            self.sleep_until_bucket(bucket + 1, self.exhaustion_timeout - waited);
        }
    }

    /// Handles a clock that reads `bucket` after `last_bucket` was issued.
    fn recover_clock(&self, mut bucket: i64, last_bucket: i64) -> Result<i64, Error> {
        let width = self.node.bucket_millis();
        tracing::warn!(
            node = %self.node,
            behind_ms = (last_bucket - bucket) * width,
            "clock moved backwards"
        );

        let max_wait = match self.clock_policy {
            ClockPolicy::Fail => return Err(Error::ClockRegression((last_bucket - bucket) * width)),
            ClockPolicy::Wait { max_wait } => max_wait,
        };

        let started = Instant::now();
        while bucket < last_bucket {
            let waited = started.elapsed();
            if waited >= max_wait {
                return Err(Error::ClockRegression((last_bucket - bucket) * width));
            }
            self.sleep_until_bucket(last_bucket, max_wait - waited);
            bucket = self.current_bucket();
        }
        Ok(bucket)
    }

    /// Sleeps until the clock reaches the start of `bucket`, but no longer
    /// than `limit`.
    fn sleep_until_bucket(&self, bucket: i64, limit: Duration) {
        let target = bucket.saturating_mul(self.node.bucket_millis());
        let ahead = target - self.clock.now_millis();
        if ahead <= 0 {
            thread::yield_now();
            return;
        }
        thread::sleep(Duration::from_millis(ahead as u64).min(limit));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SystemClock;
    use crate::resolver::RandomResolver;

    #[test]
    fn test_parsed_id_serializes_present_fields() {
        let parsed = ParsedId {
            timestamp: 10,
            sequence: 2,
            datacenter_id: None,
            worker_id: None,
            machine_id: Some(7),
        };
        let json = serde_json::to_string(&parsed).unwrap();
        assert_eq!(json, r#"{"timestamp":10,"sequence":2,"machine_id":7}"#);
    }

    #[test]
    fn test_sequencer_never_repeats() {
        let sequencer = Sequencer::new(
            NodeKey::Sonyflake {
                machine_id: 1,
                tick_ms: 10,
            },
            Arc::new(RandomResolver::new()),
            Arc::new(SystemClock),
            ClockPolicy::Fail,
            Duration::from_secs(1),
        );

        let mut last = (i64::MIN, 0);
        for _ in 0..1000 {
            let next = sequencer.next().unwrap();
            assert!(next > last, "{next:?} not after {last:?}");
            last = next;
        }
    }
}
