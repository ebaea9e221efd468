use crate::error::{BoxDynError, Error};
use crate::resolver::CounterStore;
use parking_lot::Mutex;
use std::time::Duration;

/// A [`CounterStore`] on a Redis server, shared by every process that talks
/// to it.
///
/// One connection is kept and reopened after a failure. Connecting, reading
/// and writing are bounded by `timeout`; running into it reports
/// [`Error::ResolverTimeout`].
pub struct RedisStore {
    client: redis::Client,
    connection: Mutex<Option<redis::Connection>>,
    timeout: Duration,
}

impl RedisStore {
    pub fn open(url: &str) -> Result<Self, BoxDynError> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            connection: Mutex::new(None),
            timeout: Duration::from_millis(100),
        })
    }

    /// Sets the connect, read and write timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    fn connect(&self) -> redis::RedisResult<redis::Connection> {
        let con = self.client.get_connection_with_timeout(self.timeout)?;
        con.set_read_timeout(Some(self.timeout))?;
        con.set_write_timeout(Some(self.timeout))?;
        Ok(con)
    }

    fn to_store_error(&self, e: redis::RedisError) -> BoxDynError {
        if e.is_timeout() {
            tracing::warn!(timeout = ?self.timeout, "redis counter store timed out");
            Box::new(Error::ResolverTimeout(self.timeout))
        } else {
            Box::new(e)
        }
    }
}

impl CounterStore for RedisStore {
    fn increment(&self, key: &str, ttl: Duration) -> Result<u64, BoxDynError> {
        let mut connection = self.connection.lock();
        let mut con = match connection.take() {
            Some(con) => con,
            None => self.connect().map_err(|e| self.to_store_error(e))?,
        };

        let ttl_ms = ttl.as_millis().max(1) as u64;
        let (count,): (u64,) = redis::pipe()
            .atomic()
            .cmd("INCR")
            .arg(key)
            .cmd("PEXPIRE")
            .arg(key)
            .arg(ttl_ms)
            .ignore()
            .query(&mut con)
            .map_err(|e| self.to_store_error(e))?;
        // A connection that failed mid reply is dropped and reopened next time.
        *connection = Some(con);
        Ok(count)
    }

    fn name(&self) -> &'static str {
        "Redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::{NodeKey, SequenceResolver, SharedStoreResolver};
    use std::time::Instant;

    #[test]
    fn test_unreachable_server_fails_fast() {
        let store = RedisStore::open("redis://127.0.0.1:1")
            .unwrap()
            .with_timeout(Duration::from_millis(50));
        let resolver = SharedStoreResolver::new(store);
        let node = NodeKey::Snowflake {
            datacenter_id: 1,
            worker_id: 1,
        };

        for _ in 0..2 {
            let started = Instant::now();
            let result = resolver.sequence(node, 1);
            assert!(
                matches!(
                    result,
                    Err(Error::ResolverUnavailable(_)) | Err(Error::ResolverTimeout(_))
                ),
                "unexpected {result:?}"
            );
            assert!(started.elapsed() < Duration::from_secs(2));
        }
        assert!(resolver.store().connection.lock().is_none());
    }
}
