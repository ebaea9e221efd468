use crate::error::{BoxDynError, Error};
use crate::resolver::{NodeKey, SequenceResolver};
use moka::sync::Cache;
use moka::Expiry;
use std::time::{Duration, Instant};

/// A key-value store with an atomic increment.
pub trait CounterStore: Send + Sync {
    /// Atomically increments `key` and returns the new value. A key that does
    /// not exist starts at zero and expires `ttl` after it was created.
    ///
    /// A boxed [`Error`] is passed through as is, so stores can report
    /// [`Error::ResolverTimeout`]. Any other error becomes
    /// [`Error::ResolverUnavailable`].
    fn increment(&self, key: &str, ttl: Duration) -> Result<u64, BoxDynError>;

    fn name(&self) -> &'static str;
}

/// Counters live at least this long, so a caller that read the clock late
/// still finds the counter of its bucket.
pub const MIN_COUNTER_TTL: Duration = Duration::from_secs(1);

/// Draws sequences from a [`CounterStore`] keyed by node and bucket.
///
/// Every generator that shares the store and the node identity draws from the
/// same counter, so the store's atomicity is what keeps their ids distinct.
pub struct SharedStoreResolver<S> {
    store: S,
    prefix: String,
}

impl<S: CounterStore> SharedStoreResolver<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            prefix: "flakeid:".to_owned(),
        }
    }

    /// Sets the prefix prepended to every store key.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn key(&self, node: NodeKey, bucket: i64) -> String {
        format!("{}{}:{}", self.prefix, node, bucket)
    }
}

impl<S: CounterStore> SequenceResolver for SharedStoreResolver<S> {
    fn sequence(&self, node: NodeKey, bucket: i64) -> Result<u64, Error> {
        let key = self.key(node, bucket);
        let count = self
            .store
            .increment(&key, node.bucket_width().max(MIN_COUNTER_TTL))
            .map_err(|e| match e.downcast::<Error>() {
                Ok(e) => *e,
                Err(e) => Error::ResolverUnavailable(e),
            })?;
        Ok(count.saturating_sub(1))
    }

    fn name(&self) -> &'static str {
        self.store.name()
    }
}

/// Counter value and the ttl it was created with.
#[derive(Debug, Clone, Copy)]
struct Counter {
    value: u64,
    ttl: Duration,
}

struct CounterExpiry;

impl Expiry<String, Counter> for CounterExpiry {
    fn expire_after_create(
        &self,
        _key: &String,
        counter: &Counter,
        _created_at: Instant,
    ) -> Option<Duration> {
        Some(counter.ttl)
    }
}

/// A process local [`CounterStore`].
#[derive(Clone)]
pub struct MemoryStore {
    counters: Cache<String, Counter>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::with_capacity(100_000)
    }

    pub fn with_capacity(max_capacity: u64) -> Self {
        Self {
            counters: Cache::builder()
                .max_capacity(max_capacity)
                .expire_after(CounterExpiry)
                .build(),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl CounterStore for MemoryStore {
    fn increment(&self, key: &str, ttl: Duration) -> Result<u64, BoxDynError> {
        let entry = self
            .counters
            .entry(key.to_owned())
            .and_upsert_with(|existing| match existing {
                Some(entry) => {
                    let counter = entry.into_value();
                    Counter {
                        value: counter.value + 1,
                        ttl: counter.ttl,
                    }
                }
                None => Counter { value: 1, ttl },
            });
        Ok(entry.into_value().value)
    }

    fn name(&self) -> &'static str {
        "Memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    // Wide buckets so counters outlive a slow test run.
    const NODE: NodeKey = NodeKey::Sonyflake {
        machine_id: 1,
        tick_ms: 60_000,
    };

    #[derive(Debug, thiserror::Error)]
    #[error("connection refused")]
    struct Refused;

    struct DownStore;

    impl CounterStore for DownStore {
        fn increment(&self, _key: &str, _ttl: Duration) -> Result<u64, BoxDynError> {
            Err(Box::new(Refused))
        }

        fn name(&self) -> &'static str {
            "Down"
        }
    }

    #[test]
    fn test_first_sequence_is_zero() {
        let resolver = SharedStoreResolver::new(MemoryStore::new());
        assert_eq!(resolver.sequence(NODE, 10).unwrap(), 0);
        assert_eq!(resolver.sequence(NODE, 10).unwrap(), 1);
        assert_eq!(resolver.sequence(NODE, 11).unwrap(), 0);
    }

    #[test]
    fn test_nodes_are_separate() {
        let resolver = SharedStoreResolver::new(MemoryStore::new());
        let other = NodeKey::Sonyflake {
            machine_id: 2,
            tick_ms: 60_000,
        };
        assert_eq!(resolver.sequence(NODE, 10).unwrap(), 0);
        assert_eq!(resolver.sequence(other, 10).unwrap(), 0);
    }

    #[test]
    fn test_key_layout() {
        let resolver = SharedStoreResolver::new(MemoryStore::new()).with_prefix("app:");
        assert_eq!(resolver.sequence(NODE, 3).unwrap(), 0);
        let count = resolver
            .store()
            .increment("app:sonyflake-1-60000:3", MIN_COUNTER_TTL)
            .unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn test_counter_expires() {
        let store = MemoryStore::new();
        assert_eq!(store.increment("k", Duration::from_millis(5)).unwrap(), 1);
        thread::sleep(Duration::from_millis(50));
        assert_eq!(store.increment("k", Duration::from_millis(5)).unwrap(), 1);
    }

    #[test]
    fn test_narrow_bucket_counter_outlives_bucket() {
        let resolver = SharedStoreResolver::new(MemoryStore::new());
        let node = NodeKey::Snowflake {
            datacenter_id: 1,
            worker_id: 1,
        };
        assert_eq!(resolver.sequence(node, 5).unwrap(), 0);
        thread::sleep(Duration::from_millis(20));
        assert_eq!(resolver.sequence(node, 5).unwrap(), 1);
    }

    #[test]
    fn test_concurrent_increments_are_unique() {
        let resolver = Arc::new(SharedStoreResolver::new(MemoryStore::new()));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let resolver = Arc::clone(&resolver);
                thread::spawn(move || {
                    (0..100)
                        .map(|_| resolver.sequence(NODE, i64::MAX).unwrap())
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut seen = HashSet::new();
        for handle in handles {
            for seq in handle.join().unwrap() {
                assert!(seen.insert(seq), "duplicated sequence {seq}");
            }
        }
        assert_eq!(seen.len(), 800);
    }

    struct SlowStore;

    impl CounterStore for SlowStore {
        fn increment(&self, _key: &str, _ttl: Duration) -> Result<u64, BoxDynError> {
            Err(Box::new(Error::ResolverTimeout(Duration::from_millis(5))))
        }

        fn name(&self) -> &'static str {
            "Slow"
        }
    }

    #[test]
    fn test_store_timeout_passes_through() {
        let resolver = SharedStoreResolver::new(SlowStore);
        assert!(matches!(
            resolver.sequence(NODE, 1),
            Err(Error::ResolverTimeout(timeout)) if timeout == Duration::from_millis(5)
        ));
    }

    #[test]
    fn test_store_failure_is_unavailable() {
        let resolver = SharedStoreResolver::new(DownStore);
        assert!(matches!(
            resolver.sequence(NODE, 1),
            Err(Error::ResolverUnavailable(_))
        ));
    }
}
