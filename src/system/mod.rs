//! Performance monitoring
//!
//! [`PerformanceMonitor`] collects latency samples per operation into bounded
//! windows held by a [`MetricsStore`], and reports them as JSON or in the
//! Prometheus text format.

pub mod aggregate;
pub mod export;
pub mod monitor;
pub mod redis_store;
pub mod store;
pub mod timer;

pub use aggregate::{Aggregate, Sample};
pub use monitor::{PerformanceMonitor, PerformanceReport, ReportSummary, RequestStats, SystemMetrics};
pub use redis_store::RedisMetricsStore;
pub use store::{MemoryMetricsStore, MetricsStore, RequestTotals};
pub use timer::OperationTimer;
