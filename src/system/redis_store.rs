//! Redis-backed sample windows, shared between instances
//!
//! - `{prefix}:perf:ops`: set of operation names
//! - `{prefix}:perf:samples:{op}`: list of JSON samples, newest at the head
//! - `{prefix}:perf:requests`: hash with `total` and `error` counters

use redis::AsyncCommands;
use std::collections::{BTreeMap, HashMap};
use std::future::Future;

use crate::core::error::Result;
use crate::system::aggregate::Sample;
use crate::system::store::{MetricsStore, RequestTotals};

/// Metrics store shared between instances through Redis
#[derive(Clone)]
pub struct RedisMetricsStore {
    client: redis::Client,
    prefix: String,
    capacity: usize,
}

impl RedisMetricsStore {
    /// Create a store keeping at most `capacity` samples per operation
    pub fn new(url: &str, prefix: &str, capacity: usize) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
            capacity: capacity.max(1),
        })
    }

    fn ops_key(&self) -> String {
        format!("{}:perf:ops", self.prefix)
    }

    fn samples_key(&self, operation: &str) -> String {
        format!("{}:perf:samples:{}", self.prefix, operation)
    }

    fn requests_key(&self) -> String {
        format!("{}:perf:requests", self.prefix)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    async fn read_window(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        operation: &str,
    ) -> Result<Vec<Sample>> {
        let raw: Vec<String> = conn.lrange(self.samples_key(operation), 0, -1).await?;
        let mut samples = raw
            .iter()
            .map(|json| serde_json::from_str(json))
            .collect::<std::result::Result<Vec<Sample>, _>>()?;
        samples.reverse();
        Ok(samples)
    }
}

impl MetricsStore for RedisMetricsStore {
    fn push(&self, operation: &str, sample: Sample) -> impl Future<Output = Result<()>> + Send {
        async move {
            let payload = serde_json::to_string(&sample)?;
            let key = self.samples_key(operation);
            let mut conn = self.connection().await?;

            let _: () = redis::pipe()
                .atomic()
                .sadd(self.ops_key(), operation)
                .ignore()
                .lpush(&key, payload)
                .ignore()
                .ltrim(&key, 0, self.capacity as isize - 1)
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok(())
        }
    }

    fn count_request(&self, success: bool) -> impl Future<Output = Result<()>> + Send {
        async move {
            let mut conn = self.connection().await?;
            let mut pipe = redis::pipe();
            pipe.atomic().hincr(self.requests_key(), "total", 1).ignore();
            if !success {
                pipe.hincr(self.requests_key(), "error", 1).ignore();
            }
            let _: () = pipe.query_async(&mut conn).await?;
            Ok(())
        }
    }

    fn window(
        &self,
        operation: &str,
    ) -> impl Future<Output = Result<Option<Vec<Sample>>>> + Send {
        async move {
            let mut conn = self.connection().await?;
            let known: bool = conn.sismember(self.ops_key(), operation).await?;
            if !known {
                return Ok(None);
            }
            Ok(Some(self.read_window(&mut conn, operation).await?))
        }
    }

    fn windows(&self) -> impl Future<Output = Result<BTreeMap<String, Vec<Sample>>>> + Send {
        async move {
            let mut conn = self.connection().await?;
            let ops: Vec<String> = conn.smembers(self.ops_key()).await?;

            let mut windows = BTreeMap::new();
            for op in ops {
                let samples = self.read_window(&mut conn, &op).await?;
                windows.insert(op, samples);
            }
            Ok(windows)
        }
    }

    fn totals(&self) -> impl Future<Output = Result<RequestTotals>> + Send {
        async move {
            let mut conn = self.connection().await?;
            let counters: HashMap<String, u64> = conn.hgetall(self.requests_key()).await?;
            let total = counters.get("total").copied().unwrap_or(0);
            let error = counters.get("error").copied().unwrap_or(0).min(total);
            Ok(RequestTotals {
                total,
                success: total - error,
                error,
            })
        }
    }

    fn reset(&self) -> impl Future<Output = Result<()>> + Send {
        async move {
            let mut conn = self.connection().await?;
            let ops: Vec<String> = conn.smembers(self.ops_key()).await?;

            let mut keys: Vec<String> = ops.iter().map(|op| self.samples_key(op)).collect();
            keys.push(self.ops_key());
            keys.push(self.requests_key());
            let _: () = conn.del(keys).await?;
            Ok(())
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keys_are_namespaced_by_prefix() {
        let store = RedisMetricsStore::new("redis://127.0.0.1/", "pg", 10).unwrap();
        assert_eq!(store.ops_key(), "pg:perf:ops");
        assert_eq!(store.samples_key("GET /x"), "pg:perf:samples:GET /x");
        assert_eq!(store.requests_key(), "pg:perf:requests");
        assert_eq!(store.capacity(), 10);
    }

    #[tokio::test]
    #[ignore = "requires REDIS_URL and a reachable Redis"]
    async fn bounded_window_against_live_redis() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            eprintln!("skipping: REDIS_URL not set");
            return;
        };
        let prefix = format!("portal-guard-test-{}", std::process::id());
        let store = RedisMetricsStore::new(&url, &prefix, 3).unwrap();
        store.reset().await.unwrap();

        for d in 1..=5 {
            store.push("op", Sample::new(d as f64, d != 5)).await.unwrap();
            store.count_request(d != 5).await.unwrap();
        }
        let window = store.window("op").await.unwrap().unwrap();
        let durations: Vec<f64> = window.iter().map(|s| s.duration_ms).collect();
        assert_eq!(durations, vec![3.0, 4.0, 5.0]);

        let totals = store.totals().await.unwrap();
        assert_eq!(totals.total, 5);
        assert_eq!(totals.error, 1);

        store.reset().await.unwrap();
        assert!(store.windows().await.unwrap().is_empty());
    }
}
