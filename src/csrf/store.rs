//! Token storage abstraction
//!
//! [`TokenStore`] lets the manager run against a process-local map for
//! single-instance deployments or a shared Redis instance when several
//! replicas sit behind a load balancer.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::future::Future;

use crate::core::error::Result;
use crate::csrf::token::TokenRecord;

/// What [`TokenStore::insert_bounded`] removed to make room
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Admission {
    /// Expired entries dropped
    pub purged: usize,
    /// Live entries evicted, oldest first
    pub evicted: usize,
}

/// Storage for issued tokens, keyed by token value
pub trait TokenStore: Send + Sync + 'static {
    /// Store a new record without enforcing any cap
    fn insert(&self, record: TokenRecord) -> impl Future<Output = Result<()>> + Send;

    /// Store a new record while holding at most `max_tokens` entries.
    ///
    /// Entries expired at `record.issued_at` are purged, then the oldest are
    /// evicted until the new record fits. The whole step is atomic with
    /// respect to other `insert_bounded` calls, so concurrent issuers cannot
    /// push the store past the cap.
    fn insert_bounded(
        &self,
        record: TokenRecord,
        max_tokens: usize,
    ) -> impl Future<Output = Result<Admission>> + Send;

    /// Look up a record by value
    fn get(&self, value: &str) -> impl Future<Output = Result<Option<TokenRecord>>> + Send;

    /// Remove a record, returning whether it existed
    fn remove(&self, value: &str) -> impl Future<Output = Result<bool>> + Send;

    /// Number of entries held (including expired ones not yet swept)
    fn len(&self) -> impl Future<Output = Result<usize>> + Send;

    /// Remove every entry, returning how many were removed
    fn clear(&self) -> impl Future<Output = Result<usize>> + Send;

    /// Remove entries with `expires_at <= now`, returning how many were removed
    fn purge_expired(&self, now: DateTime<Utc>) -> impl Future<Output = Result<usize>> + Send;

    /// Remove the oldest entries until at most `keep` remain
    fn evict_oldest(&self, keep: usize) -> impl Future<Output = Result<usize>> + Send;

    /// Snapshot of all records
    fn records(&self) -> impl Future<Output = Result<Vec<TokenRecord>>> + Send;
}

/// Process-local token store backed by a sharded concurrent map
#[derive(Default)]
pub struct MemoryTokenStore {
    tokens: DashMap<String, TokenRecord>,
    // Serialises bounded inserts; reads and removals stay lock-free.
    admit: Mutex<()>,
}

impl MemoryTokenStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    fn purge_at(&self, now: DateTime<Utc>) -> usize {
        let before = self.tokens.len();
        self.tokens.retain(|_, record| !record.is_expired_at(now));
        before.saturating_sub(self.tokens.len())
    }

    fn evict_to(&self, keep: usize) -> usize {
        let len = self.tokens.len();
        if len <= keep {
            return 0;
        }

        let mut by_age: Vec<(DateTime<Utc>, String)> = self
            .tokens
            .iter()
            .map(|entry| (entry.issued_at, entry.key().clone()))
            .collect();
        by_age.sort();

        by_age
            .into_iter()
            .take(len - keep)
            .filter(|(_, value)| self.tokens.remove(value).is_some())
            .count()
    }

    fn admit(&self, record: TokenRecord, max_tokens: usize) -> Admission {
        let _guard = self.admit.lock();
        let purged = self.purge_at(record.issued_at);
        let evicted = self.evict_to(max_tokens.saturating_sub(1));
        self.tokens.insert(record.value.clone(), record);
        Admission { purged, evicted }
    }
}

impl TokenStore for MemoryTokenStore {
    fn insert(&self, record: TokenRecord) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.tokens.insert(record.value.clone(), record);
            Ok(())
        }
    }

    fn insert_bounded(
        &self,
        record: TokenRecord,
        max_tokens: usize,
    ) -> impl Future<Output = Result<Admission>> + Send {
        async move { Ok(self.admit(record, max_tokens)) }
    }

    fn get(&self, value: &str) -> impl Future<Output = Result<Option<TokenRecord>>> + Send {
        async move { Ok(self.tokens.get(value).map(|entry| entry.value().clone())) }
    }

    fn remove(&self, value: &str) -> impl Future<Output = Result<bool>> + Send {
        async move { Ok(self.tokens.remove(value).is_some()) }
    }

    fn len(&self) -> impl Future<Output = Result<usize>> + Send {
        async move { Ok(self.tokens.len()) }
    }

    fn clear(&self) -> impl Future<Output = Result<usize>> + Send {
        async move {
            let before = self.tokens.len();
            self.tokens.clear();
            Ok(before)
        }
    }

    fn purge_expired(&self, now: DateTime<Utc>) -> impl Future<Output = Result<usize>> + Send {
        async move { Ok(self.purge_at(now)) }
    }

    fn evict_oldest(&self, keep: usize) -> impl Future<Output = Result<usize>> + Send {
        async move { Ok(self.evict_to(keep)) }
    }

    fn records(&self) -> impl Future<Output = Result<Vec<TokenRecord>>> + Send {
        async move {
            Ok(self
                .tokens
                .iter()
                .map(|entry| entry.value().clone())
                .collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn record_at(issued_at: DateTime<Utc>, ttl_secs: u64) -> TokenRecord {
        TokenRecord::issue(issued_at, Duration::from_secs(ttl_secs), None)
    }

    #[tokio::test]
    async fn insert_get_remove() {
        let store = MemoryTokenStore::new();
        let record = record_at(Utc::now(), 60);
        store.insert(record.clone()).await.unwrap();

        assert_eq!(store.get(&record.value).await.unwrap(), Some(record.clone()));
        assert_eq!(store.len().await.unwrap(), 1);
        assert!(store.remove(&record.value).await.unwrap());
        assert!(!store.remove(&record.value).await.unwrap());
        assert_eq!(store.get(&record.value).await.unwrap(), None);
    }

    #[tokio::test]
    async fn purge_removes_only_expired() {
        let store = MemoryTokenStore::new();
        let now = Utc::now();
        let stale = record_at(now - chrono::Duration::seconds(120), 60);
        let fresh = record_at(now, 60);
        store.insert(stale.clone()).await.unwrap();
        store.insert(fresh.clone()).await.unwrap();

        assert_eq!(store.purge_expired(now).await.unwrap(), 1);
        assert!(store.get(&stale.value).await.unwrap().is_none());
        assert!(store.get(&fresh.value).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn evict_oldest_keeps_newest() {
        let store = MemoryTokenStore::new();
        let base = Utc::now();
        let records: Vec<TokenRecord> = (0..5)
            .map(|i| record_at(base + chrono::Duration::seconds(i), 3600))
            .collect();
        for record in &records {
            store.insert(record.clone()).await.unwrap();
        }

        assert_eq!(store.evict_oldest(3).await.unwrap(), 2);
        assert_eq!(store.len().await.unwrap(), 3);
        assert!(store.get(&records[0].value).await.unwrap().is_none());
        assert!(store.get(&records[1].value).await.unwrap().is_none());
        assert!(store.get(&records[4].value).await.unwrap().is_some());
        assert_eq!(store.evict_oldest(10).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn bounded_insert_purges_then_evicts() {
        let store = MemoryTokenStore::new();
        let now = Utc::now();
        let stale = record_at(now - chrono::Duration::seconds(120), 60);
        store.insert(stale.clone()).await.unwrap();
        let live: Vec<TokenRecord> = (0..3)
            .map(|i| record_at(now - chrono::Duration::seconds(10 - i), 3600))
            .collect();
        for record in &live {
            store.insert(record.clone()).await.unwrap();
        }

        let fresh = record_at(now, 3600);
        let admission = store.insert_bounded(fresh.clone(), 3).await.unwrap();

        assert_eq!(admission, Admission { purged: 1, evicted: 1 });
        assert_eq!(store.len().await.unwrap(), 3);
        assert!(store.get(&live[0].value).await.unwrap().is_none());
        assert!(store.get(&fresh.value).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn clear_reports_removed_count() {
        let store = MemoryTokenStore::new();
        for _ in 0..4 {
            store.insert(record_at(Utc::now(), 60)).await.unwrap();
        }
        assert_eq!(store.clear().await.unwrap(), 4);
        assert_eq!(store.len().await.unwrap(), 0);
        assert!(store.records().await.unwrap().is_empty());
    }
}
