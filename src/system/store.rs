//! Sample window storage

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::core::error::Result;
use crate::system::aggregate::Sample;

/// Served requests counted since the last reset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestTotals {
    /// All counted requests
    pub total: u64,
    /// Requests that succeeded
    pub success: u64,
    /// Requests that failed
    pub error: u64,
}

/// Bounded per-operation sample windows plus request totals.
///
/// Windows are returned oldest first. Pushing into a full window drops its
/// oldest sample. Request totals move only through
/// [`count_request`](MetricsStore::count_request), so internal timings don't
/// inflate them.
pub trait MetricsStore: Send + Sync + 'static {
    /// Append a sample to `operation`'s window
    fn push(&self, operation: &str, sample: Sample) -> impl Future<Output = Result<()>> + Send;

    /// Window for one operation, `None` if never recorded
    fn window(&self, operation: &str)
        -> impl Future<Output = Result<Option<Vec<Sample>>>> + Send;

    /// Every known window, keyed by operation name
    fn windows(&self) -> impl Future<Output = Result<BTreeMap<String, Vec<Sample>>>> + Send;

    /// Count one served request
    fn count_request(&self, success: bool) -> impl Future<Output = Result<()>> + Send;

    /// Request totals since the last reset
    fn totals(&self) -> impl Future<Output = Result<RequestTotals>> + Send;

    /// Drop all windows and zero the totals
    fn reset(&self) -> impl Future<Output = Result<()>> + Send;

    /// Samples retained per operation
    fn capacity(&self) -> usize;
}

/// In-process windows
pub struct MemoryMetricsStore {
    capacity: usize,
    windows: DashMap<String, VecDeque<Sample>>,
    total: AtomicU64,
    errors: AtomicU64,
}

impl MemoryMetricsStore {
    /// Create a store keeping at most `capacity` samples per operation
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            windows: DashMap::new(),
            total: AtomicU64::new(0),
            errors: AtomicU64::new(0),
        }
    }
}

impl MetricsStore for MemoryMetricsStore {
    fn push(&self, operation: &str, sample: Sample) -> impl Future<Output = Result<()>> + Send {
        async move {
            {
                let mut window = self
                    .windows
                    .entry(operation.to_string())
                    .or_insert_with(VecDeque::new);
                if window.len() >= self.capacity {
                    window.pop_front();
                }
                window.push_back(sample);
            }
            Ok(())
        }
    }

    fn count_request(&self, success: bool) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.total.fetch_add(1, Ordering::Relaxed);
            if !success {
                self.errors.fetch_add(1, Ordering::Relaxed);
            }
            Ok(())
        }
    }

    fn window(
        &self,
        operation: &str,
    ) -> impl Future<Output = Result<Option<Vec<Sample>>>> + Send {
        async move {
            Ok(self
                .windows
                .get(operation)
                .map(|w| w.iter().copied().collect()))
        }
    }

    fn windows(&self) -> impl Future<Output = Result<BTreeMap<String, Vec<Sample>>>> + Send {
        async move {
            Ok(self
                .windows
                .iter()
                .map(|entry| (entry.key().clone(), entry.value().iter().copied().collect()))
                .collect())
        }
    }

    fn totals(&self) -> impl Future<Output = Result<RequestTotals>> + Send {
        async move {
            let total = self.total.load(Ordering::Relaxed);
            let error = self.errors.load(Ordering::Relaxed).min(total);
            Ok(RequestTotals {
                total,
                success: total - error,
                error,
            })
        }
    }

    fn reset(&self) -> impl Future<Output = Result<()>> + Send {
        async move {
            self.windows.clear();
            self.total.store(0, Ordering::Relaxed);
            self.errors.store(0, Ordering::Relaxed);
            Ok(())
        }
    }

    fn capacity(&self) -> usize {
        self.capacity
    }
}
