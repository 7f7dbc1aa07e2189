//! Redis-backed token store for multi-instance deployments
//!
//! Layout under the configured prefix:
//! - `{prefix}:csrf:token:{value}`: JSON record
//! - `{prefix}:csrf:by-expiry`: sorted set of values scored by `expires_at` (ms)
//! - `{prefix}:csrf:by-issue`: sorted set of values scored by `issued_at` (ms)
//!
//! Record keys outlive their token by [`EXPIRED_GRACE`] so a late
//! presentation still finds the record and is reported as expired rather
//! than unknown. After that Redis drops the key; index entries left behind
//! are cleaned up by `purge_expired` or the next read that misses.

use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use std::future::Future;
use std::time::Duration;

use crate::core::error::Result;
use crate::csrf::store::{Admission, TokenStore};
use crate::csrf::token::TokenRecord;

/// How long a record key is kept past its token's expiry
pub const EXPIRED_GRACE: Duration = Duration::from_secs(600);

// KEYS: by-expiry, by-issue, record key
// ARGV: now ms, max tokens, record key prefix, value, payload, key ttl ms,
//       expires_at ms, issued_at ms
const ADMIT_SCRIPT: &str = r#"
local function drop(values)
  for _, v in ipairs(values) do
    redis.call('DEL', ARGV[3] .. v)
    redis.call('ZREM', KEYS[1], v)
    redis.call('ZREM', KEYS[2], v)
  end
  return #values
end

local purged = drop(redis.call('ZRANGEBYSCORE', KEYS[1], '-inf', ARGV[1]))
local evicted = 0
local excess = redis.call('ZCARD', KEYS[2]) - tonumber(ARGV[2]) + 1
if excess > 0 then
  evicted = drop(redis.call('ZRANGE', KEYS[2], 0, excess - 1))
end

redis.call('SET', KEYS[3], ARGV[5], 'PX', ARGV[6])
redis.call('ZADD', KEYS[1], ARGV[7], ARGV[4])
redis.call('ZADD', KEYS[2], ARGV[8], ARGV[4])
return {purged, evicted}
"#;

/// Token store shared between instances through Redis
#[derive(Clone)]
pub struct RedisTokenStore {
    client: redis::Client,
    prefix: String,
}

impl RedisTokenStore {
    /// Create a store; the connection is opened lazily per operation
    pub fn new(url: &str, prefix: &str) -> Result<Self> {
        let client = redis::Client::open(url)?;
        Ok(Self {
            client,
            prefix: prefix.to_string(),
        })
    }

    fn token_key_prefix(&self) -> String {
        format!("{}:csrf:token:", self.prefix)
    }

    fn token_key(&self, value: &str) -> String {
        format!("{}{}", self.token_key_prefix(), value)
    }

    fn key_ttl_ms(record: &TokenRecord) -> u64 {
        let ttl_ms = (record.expires_at - record.issued_at).num_milliseconds().max(1) as u64;
        ttl_ms + EXPIRED_GRACE.as_millis() as u64
    }

    fn expiry_index(&self) -> String {
        format!("{}:csrf:by-expiry", self.prefix)
    }

    fn issue_index(&self) -> String {
        format!("{}:csrf:by-issue", self.prefix)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    /// Drop record keys and both index entries for `values`
    async fn remove_all(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        values: &[String],
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = values.iter().map(|v| self.token_key(v)).collect();
        let _: () = redis::pipe()
            .atomic()
            .del(keys)
            .ignore()
            .zrem(self.expiry_index(), values)
            .ignore()
            .zrem(self.issue_index(), values)
            .ignore()
            .query_async(conn)
            .await?;
        Ok(())
    }

    /// Drop index entries whose record key Redis has already expired
    async fn forget(
        &self,
        conn: &mut redis::aio::MultiplexedConnection,
        values: &[String],
    ) -> Result<()> {
        if values.is_empty() {
            return Ok(());
        }
        let _: () = redis::pipe()
            .atomic()
            .zrem(self.expiry_index(), values)
            .ignore()
            .zrem(self.issue_index(), values)
            .ignore()
            .query_async(conn)
            .await?;
        Ok(())
    }
}

impl TokenStore for RedisTokenStore {
    fn insert(&self, record: TokenRecord) -> impl Future<Output = Result<()>> + Send {
        async move {
            let payload = serde_json::to_string(&record)?;
            let mut conn = self.connection().await?;
            let _: () = redis::pipe()
                .atomic()
                .pset_ex(self.token_key(&record.value), payload, Self::key_ttl_ms(&record))
                .ignore()
                .zadd(
                    self.expiry_index(),
                    &record.value,
                    record.expires_at.timestamp_millis(),
                )
                .ignore()
                .zadd(
                    self.issue_index(),
                    &record.value,
                    record.issued_at.timestamp_millis(),
                )
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok(())
        }
    }

    fn insert_bounded(
        &self,
        record: TokenRecord,
        max_tokens: usize,
    ) -> impl Future<Output = Result<Admission>> + Send {
        async move {
            let payload = serde_json::to_string(&record)?;
            let mut conn = self.connection().await?;
            let (purged, evicted): (usize, usize) = redis::Script::new(ADMIT_SCRIPT)
                .key(self.expiry_index())
                .key(self.issue_index())
                .key(self.token_key(&record.value))
                .arg(record.issued_at.timestamp_millis())
                .arg(max_tokens)
                .arg(self.token_key_prefix())
                .arg(&record.value)
                .arg(payload)
                .arg(Self::key_ttl_ms(&record))
                .arg(record.expires_at.timestamp_millis())
                .arg(record.issued_at.timestamp_millis())
                .invoke_async(&mut conn)
                .await?;
            Ok(Admission { purged, evicted })
        }
    }

    fn get(&self, value: &str) -> impl Future<Output = Result<Option<TokenRecord>>> + Send {
        async move {
            let mut conn = self.connection().await?;
            let payload: Option<String> = conn.get(self.token_key(value)).await?;
            match payload {
                Some(json) => Ok(Some(serde_json::from_str(&json)?)),
                None => {
                    self.forget(&mut conn, &[value.to_string()]).await?;
                    Ok(None)
                }
            }
        }
    }

    fn remove(&self, value: &str) -> impl Future<Output = Result<bool>> + Send {
        async move {
            let mut conn = self.connection().await?;
            let (removed,): (usize,) = redis::pipe()
                .atomic()
                .del(self.token_key(value))
                .zrem(self.expiry_index(), value)
                .ignore()
                .zrem(self.issue_index(), value)
                .ignore()
                .query_async(&mut conn)
                .await?;
            Ok(removed > 0)
        }
    }

    fn len(&self) -> impl Future<Output = Result<usize>> + Send {
        async move {
            let mut conn = self.connection().await?;
            let count: usize = conn.zcard(self.issue_index()).await?;
            Ok(count)
        }
    }

    fn clear(&self) -> impl Future<Output = Result<usize>> + Send {
        async move {
            let mut conn = self.connection().await?;
            let values: Vec<String> = conn.zrange(self.issue_index(), 0, -1).await?;
            self.remove_all(&mut conn, &values).await?;
            let _: () = conn
                .del(vec![self.issue_index(), self.expiry_index()])
                .await?;
            Ok(values.len())
        }
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> impl Future<Output = Result<usize>> + Send {
        async move {
            let mut conn = self.connection().await?;
            let expired: Vec<String> = conn
                .zrangebyscore(self.expiry_index(), "-inf", now.timestamp_millis())
                .await?;
            self.remove_all(&mut conn, &expired).await?;
            Ok(expired.len())
        }
    }

    fn evict_oldest(&self, keep: usize) -> impl Future<Output = Result<usize>> + Send {
        async move {
            let mut conn = self.connection().await?;
            let len: usize = conn.zcard(self.issue_index()).await?;
            if len <= keep {
                return Ok(0);
            }
            let excess = len - keep;
            let oldest: Vec<String> = conn
                .zrange(self.issue_index(), 0, excess as isize - 1)
                .await?;
            self.remove_all(&mut conn, &oldest).await?;
            Ok(oldest.len())
        }
    }

    fn records(&self) -> impl Future<Output = Result<Vec<TokenRecord>>> + Send {
        async move {
            let mut conn = self.connection().await?;
            let values: Vec<String> = conn.zrange(self.issue_index(), 0, -1).await?;
            if values.is_empty() {
                return Ok(Vec::new());
            }
            let keys: Vec<String> = values.iter().map(|v| self.token_key(v)).collect();
            let payloads: Vec<Option<String>> = redis::cmd("MGET")
                .arg(keys)
                .query_async(&mut conn)
                .await?;

            let mut records = Vec::with_capacity(payloads.len());
            let mut gone = Vec::new();
            for (value, payload) in values.into_iter().zip(payloads) {
                match payload {
                    Some(json) => records.push(serde_json::from_str(&json)?),
                    None => gone.push(value),
                }
            }
            self.forget(&mut conn, &gone).await?;
            Ok(records)
        }
    }
}
