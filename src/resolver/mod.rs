//! Sequence resolvers coordinate the per-bucket counter of a node.
//!
//! A generator asks its resolver for the next sequence number of the time
//! bucket it is about to issue an id in. Resolvers backed by a shared store
//! or a lock file let several generators (or processes) with the same node
//! identity draw from one counter.

use crate::error::Error;
use std::fmt;
use std::time::Duration;

#[cfg(unix)]
mod file;
mod random;
#[cfg(feature = "redis")]
mod redis;
mod store;

#[cfg(unix)]
pub use file::FileLockResolver;
pub use random::RandomResolver;
#[cfg(feature = "redis")]
pub use self::redis::RedisStore;
pub use store::{CounterStore, MIN_COUNTER_TTL, MemoryStore, SharedStoreResolver};

/// Identity of the node a sequence is requested for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKey {
    Snowflake { datacenter_id: u8, worker_id: u8 },
    Sonyflake { machine_id: u16, tick_ms: i64 },
}

impl NodeKey {
    /// Largest sequence number the node's id layout can hold.
    pub fn max_sequence(&self) -> u64 {
        match self {
            NodeKey::Snowflake { .. } => crate::snowflake::MAX_SEQUENCE,
            NodeKey::Sonyflake { .. } => crate::sonyflake::MAX_SEQUENCE,
        }
    }

    /// Width of one time bucket in milliseconds.
    pub fn bucket_millis(&self) -> i64 {
        match self {
            NodeKey::Snowflake { .. } => 1,
            NodeKey::Sonyflake { tick_ms, .. } => *tick_ms,
        }
    }

    pub fn bucket_width(&self) -> Duration {
        Duration::from_millis(self.bucket_millis().max(1) as u64)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NodeKey::Snowflake {
                datacenter_id,
                worker_id,
            } => write!(f, "snowflake-{datacenter_id}-{worker_id}"),
            NodeKey::Sonyflake {
                machine_id,
                tick_ms,
            } => write!(f, "sonyflake-{machine_id}-{tick_ms}"),
        }
    }
}

/// Produces the sequence number for a node within a time bucket.
///
/// Successive calls for the same `(node, bucket)` must return increasing
/// values. A value above [`NodeKey::max_sequence`] tells the generator the
/// bucket is spent and it has to wait for the next one.
pub trait SequenceResolver: Send + Sync {
    fn sequence(&self, node: NodeKey, bucket: i64) -> Result<u64, Error>;

    /// Forgets any counter held for `node`.
    fn reset(&self, _node: NodeKey) -> Result<(), Error> {
        Ok(())
    }

    /// Human readable name of the backend.
    fn name(&self) -> &'static str {
        "Custom"
    }
}

impl<F> SequenceResolver for F
where
    F: Fn(NodeKey, i64) -> Result<u64, Error> + Send + Sync,
{
    fn sequence(&self, node: NodeKey, bucket: i64) -> Result<u64, Error> {
        self(node, bucket)
    }

    fn name(&self) -> &'static str {
        "Closure"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_key_layouts() {
        let sf = NodeKey::Snowflake {
            datacenter_id: 1,
            worker_id: 2,
        };
        assert_eq!(sf.max_sequence(), 4095);
        assert_eq!(sf.bucket_millis(), 1);
        assert_eq!(sf.to_string(), "snowflake-1-2");

        let sony = NodeKey::Sonyflake {
            machine_id: 300,
            tick_ms: 10,
        };
        assert_eq!(sony.max_sequence(), 255);
        assert_eq!(sony.bucket_width(), Duration::from_millis(10));
        assert_eq!(sony.to_string(), "sonyflake-300-10");
    }

    #[test]
    fn test_closure_resolver() {
        let resolver = |_node: NodeKey, bucket: i64| -> Result<u64, Error> { Ok(bucket as u64) };
        let node = NodeKey::Sonyflake {
            machine_id: 1,
            tick_ms: 10,
        };
        assert_eq!(resolver.sequence(node, 7).unwrap(), 7);
        assert_eq!(SequenceResolver::name(&resolver), "Closure");
    }
}
