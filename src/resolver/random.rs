use crate::error::Error;
use crate::resolver::{NodeKey, SequenceResolver};
use parking_lot::Mutex;
use rand::Rng;
use std::collections::HashMap;

/// Starts every bucket at a random sequence and counts up from there.
///
/// Nothing is coordinated between processes, so two processes sharing a node
/// identity can collide. Only use it for a single node or in tests.
#[derive(Debug, Default)]
pub struct RandomResolver {
    last: Mutex<HashMap<NodeKey, (i64, u64)>>,
}

impl RandomResolver {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SequenceResolver for RandomResolver {
    fn sequence(&self, node: NodeKey, bucket: i64) -> Result<u64, Error> {
        let mut last = self.last.lock();
        let entry = last.entry(node).or_insert((i64::MIN, 0));
        if entry.0 == bucket {
            entry.1 += 1;
        } else {
            *entry = (bucket, rand::thread_rng().gen_range(0..node.max_sequence()));
        }
        Ok(entry.1)
    }

    fn reset(&self, node: NodeKey) -> Result<(), Error> {
        self.last.lock().remove(&node);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "Random (unsafe)"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const NODE: NodeKey = NodeKey::Snowflake {
        datacenter_id: 3,
        worker_id: 4,
    };

    #[test]
    fn test_random_start_within_range() {
        let resolver = RandomResolver::new();
        for bucket in 0..1000 {
            let seq = resolver.sequence(NODE, bucket).unwrap();
            assert!(seq < NODE.max_sequence(), "sequence {seq} out of range");
        }
    }

    #[test]
    fn test_increments_within_bucket() {
        let resolver = RandomResolver::new();
        let first = resolver.sequence(NODE, 42).unwrap();
        assert_eq!(resolver.sequence(NODE, 42).unwrap(), first + 1);
        assert_eq!(resolver.sequence(NODE, 42).unwrap(), first + 2);
    }

    #[test]
    fn test_reset_forgets_bucket() {
        let resolver = RandomResolver::new();
        resolver.sequence(NODE, 42).unwrap();
        resolver.reset(NODE).unwrap();
        assert!(resolver.last.lock().is_empty());
    }
}
