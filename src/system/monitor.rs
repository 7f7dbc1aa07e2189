//! Per-operation latency tracking
//!
//! The monitor keeps a bounded window of samples per operation name and
//! computes aggregates on read, so figures always describe the most recent
//! calls and memory stays flat no matter how long the process runs.

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::core::config::MetricsConfig;
use crate::core::error::{Error, Result};
use crate::system::aggregate::{Aggregate, Sample};
use crate::system::export;
use crate::system::store::{MetricsStore, RequestTotals};
use crate::system::timer::OperationTimer;

/// Request counters plus the recent request rate
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequestStats {
    /// Requests served since the last reset
    pub total: u64,
    /// Successful requests since the last reset
    pub success: u64,
    /// Failed requests since the last reset
    pub error: u64,
    /// Samples per second over the rate window
    pub rate: f64,
}

/// Process-level figures
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemMetrics {
    /// Time since the monitor was created, in milliseconds
    pub uptime_ms: u64,
    /// When the counters were last reset
    pub since: DateTime<Utc>,
    /// Request counters
    pub requests: RequestStats,
}

/// Cross-operation highlights
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportSummary {
    /// Samples across all windows
    pub total_operations: usize,
    /// Failed samples across all windows
    pub total_errors: usize,
    /// Mean duration across all windows (ms)
    pub avg_response_time: f64,
    /// Operation with the highest mean duration
    pub slowest_operation: Option<String>,
    /// Operation with the lowest mean duration
    pub fastest_operation: Option<String>,
    /// Operation with the most samples
    pub most_called_operation: Option<String>,
}

/// Everything the monitor knows, as served by the performance endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceReport {
    /// Aggregate per operation
    pub operations: BTreeMap<String, Aggregate>,
    /// Process-level figures
    pub system: SystemMetrics,
    /// Highlights
    pub summary: ReportSummary,
}

impl ReportSummary {
    fn from_operations(operations: &BTreeMap<String, Aggregate>) -> Self {
        let total_operations = operations.values().map(|a| a.count).sum();
        let total_errors = operations.values().map(|a| a.errors).sum();
        let total_time: f64 = operations.values().map(Aggregate::total).sum();

        let avg_response_time = if total_operations == 0 {
            0.0
        } else {
            total_time / total_operations as f64
        };

        Self {
            total_operations,
            total_errors,
            avg_response_time,
            slowest_operation: operations
                .iter()
                .max_by(|a, b| a.1.average.total_cmp(&b.1.average))
                .map(|(name, _)| name.clone()),
            fastest_operation: operations
                .iter()
                .min_by(|a, b| a.1.average.total_cmp(&b.1.average))
                .map(|(name, _)| name.clone()),
            most_called_operation: operations
                .iter()
                .max_by_key(|(_, agg)| agg.count)
                .map(|(name, _)| name.clone()),
        }
    }
}

/// Records latency samples and reports on them
pub struct PerformanceMonitor<M: MetricsStore> {
    store: M,
    rate_window: Duration,
    started: Instant,
    since: RwLock<DateTime<Utc>>,
}

impl<M: MetricsStore> PerformanceMonitor<M> {
    /// Create a monitor over `store`
    pub fn new(store: M, config: &MetricsConfig) -> Self {
        Self {
            store,
            rate_window: config.rate_window,
            started: Instant::now(),
            since: RwLock::new(Utc::now()),
        }
    }

    /// Underlying store
    pub fn store(&self) -> &M {
        &self.store
    }

    /// Record a successful call
    pub async fn record(&self, operation: &str, duration_ms: f64) {
        self.record_outcome(operation, duration_ms, true).await
    }

    /// Record a call and its outcome.
    ///
    /// Never fails: bad input and store errors are logged and dropped so
    /// instrumentation can't break the request it measures.
    pub async fn record_outcome(&self, operation: &str, duration_ms: f64, success: bool) {
        if operation.is_empty() || !duration_ms.is_finite() {
            warn!(operation, duration_ms, "discarding invalid performance sample");
            return;
        }

        let sample = Sample::new(duration_ms.max(0.0), success);
        if let Err(e) = self.store.push(operation, sample).await {
            warn!(operation, error = %e, "failed to record performance sample");
        }
    }

    /// Record a served request: a sample under `operation` plus one tick
    /// of the request totals
    pub async fn record_request(&self, operation: &str, duration_ms: f64, success: bool) {
        self.record_outcome(operation, duration_ms, success).await;
        if let Err(e) = self.store.count_request(success).await {
            warn!(operation, error = %e, "failed to count request");
        }
    }

    /// Start timing `operation`
    pub fn start_timer(&self, operation: impl Into<String>) -> OperationTimer<'_, M> {
        OperationTimer::start(self, operation)
    }

    /// Aggregate for one operation
    pub async fn get_metrics(&self, operation: &str) -> Result<Aggregate> {
        self.store
            .window(operation)
            .await?
            .and_then(|window| Aggregate::from_samples(&window))
            .ok_or_else(|| Error::not_found(format!("operation not found: {}", operation)))
    }

    /// Aggregates for every operation plus system figures and highlights
    pub async fn get_full_report(&self) -> Result<PerformanceReport> {
        let windows = self.store.windows().await?;
        let totals = self.store.totals().await?;

        let cutoff = Utc::now()
            - chrono::Duration::from_std(self.rate_window).unwrap_or(chrono::Duration::zero());
        let recent = windows
            .values()
            .flatten()
            .filter(|s| s.timestamp >= cutoff)
            .count();
        let window_secs = self.rate_window.as_secs_f64();
        let rate = if window_secs > 0.0 {
            recent as f64 / window_secs
        } else {
            0.0
        };

        let operations: BTreeMap<String, Aggregate> = windows
            .iter()
            .filter_map(|(name, window)| {
                Aggregate::from_samples(window).map(|agg| (name.clone(), agg))
            })
            .collect();

        let RequestTotals {
            total,
            success,
            error,
        } = totals;

        Ok(PerformanceReport {
            summary: ReportSummary::from_operations(&operations),
            operations,
            system: SystemMetrics {
                uptime_ms: self.started.elapsed().as_millis() as u64,
                since: *self.since.read(),
                requests: RequestStats {
                    total,
                    success,
                    error,
                    rate,
                },
            },
        })
    }

    /// Drop every window and zero the counters
    pub async fn reset(&self) -> Result<()> {
        self.store.reset().await?;
        *self.since.write() = Utc::now();
        info!("performance metrics reset");
        Ok(())
    }

    /// Prometheus text exposition of the full report
    pub async fn export_text(&self) -> Result<String> {
        let report = self.get_full_report().await?;
        export::render_prometheus(&report)
    }

    /// Log a one-line summary every `interval` until the handle is aborted
    pub fn spawn_reporter(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let monitor = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                match monitor.get_full_report().await {
                    Ok(report) => info!(
                        uptime_secs = report.system.uptime_ms / 1000,
                        requests = report.system.requests.total,
                        errors = report.system.requests.error,
                        rate = report.system.requests.rate,
                        avg_ms = report.summary.avg_response_time,
                        slowest = report.summary.slowest_operation.as_deref().unwrap_or("-"),
                        most_called = report.summary.most_called_operation.as_deref().unwrap_or("-"),
                        "performance summary"
                    ),
                    Err(e) => warn!(error = %e, "failed to build performance summary"),
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::system::store::MemoryMetricsStore;

    fn monitor_with_window(window_size: usize) -> PerformanceMonitor<MemoryMetricsStore> {
        let config = MetricsConfig {
            window_size,
            ..MetricsConfig::default()
        };
        PerformanceMonitor::new(MemoryMetricsStore::new(config.window_size), &config)
    }

    fn monitor() -> PerformanceMonitor<MemoryMetricsStore> {
        monitor_with_window(1000)
    }

    #[tokio::test]
    async fn aggregates_recorded_durations() {
        let monitor = monitor();
        for d in [10.0, 20.0, 30.0] {
            monitor.record("db.query", d).await;
        }

        let agg = monitor.get_metrics("db.query").await.unwrap();
        assert_eq!(agg.count, 3);
        assert_eq!(agg.average, 20.0);
        assert_eq!(agg.min, 10.0);
        assert_eq!(agg.max, 30.0);
    }

    #[tokio::test]
    async fn window_keeps_only_the_latest_samples() {
        let monitor = monitor();
        for i in 0..1001 {
            monitor.record("hot", i as f64).await;
        }

        let agg = monitor.get_metrics("hot").await.unwrap();
        assert_eq!(agg.count, 1000);
        assert_eq!(agg.min, 1.0);
        assert_eq!(agg.max, 1000.0);
    }

    #[tokio::test]
    async fn unknown_operation_is_not_found() {
        let monitor = monitor();
        assert!(matches!(
            monitor.get_metrics("never").await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn reset_empties_the_report() {
        let monitor = monitor();
        monitor.record("a", 5.0).await;
        monitor.record_request("b", 7.0, false).await;
        monitor.reset().await.unwrap();

        let report = monitor.get_full_report().await.unwrap();
        assert!(report.operations.is_empty());
        assert_eq!(report.system.requests.total, 0);
        assert_eq!(report.summary, ReportSummary::default());
    }

    #[tokio::test]
    async fn report_carries_totals_and_highlights() {
        let monitor = monitor();
        monitor.record_request("fast", 1.0, true).await;
        monitor.record_request("fast", 3.0, true).await;
        monitor.record_request("fast", 2.0, true).await;
        monitor.record_request("slow", 100.0, false).await;

        let report = monitor.get_full_report().await.unwrap();
        assert_eq!(report.operations.len(), 2);
        assert_eq!(report.system.requests.total, 4);
        assert_eq!(report.system.requests.error, 1);
        assert_eq!(report.system.requests.success, 3);
        assert!(report.system.requests.rate > 0.0);

        let summary = &report.summary;
        assert_eq!(summary.total_operations, 4);
        assert_eq!(summary.total_errors, 1);
        assert_eq!(summary.avg_response_time, 26.5);
        assert_eq!(summary.slowest_operation.as_deref(), Some("slow"));
        assert_eq!(summary.fastest_operation.as_deref(), Some("fast"));
        assert_eq!(summary.most_called_operation.as_deref(), Some("fast"));
    }

    #[tokio::test]
    async fn internal_timings_do_not_count_as_requests() {
        let monitor = monitor();
        monitor.record_request("GET /api/csrf-token", 4.0, true).await;
        monitor.record("csrf.issue", 1.0).await;

        let report = monitor.get_full_report().await.unwrap();
        assert_eq!(report.operations.len(), 2);
        assert_eq!(report.summary.total_operations, 2);
        assert_eq!(report.system.requests.total, 1);
    }

    #[tokio::test]
    async fn invalid_samples_are_dropped() {
        let monitor = monitor();
        monitor.record("", 1.0).await;
        monitor.record("nan", f64::NAN).await;
        monitor.record("neg", -5.0).await;

        let report = monitor.get_full_report().await.unwrap();
        assert_eq!(report.operations.len(), 1);
        assert_eq!(report.operations["neg"].min, 0.0);
    }

    #[tokio::test]
    async fn concurrent_records_are_all_counted() {
        let monitor = Arc::new(monitor_with_window(10_000));
        let mut handles = Vec::new();
        for t in 0..8 {
            let monitor = Arc::clone(&monitor);
            handles.push(tokio::spawn(async move {
                for i in 0..100 {
                    monitor.record("shared", (t * 100 + i) as f64).await;
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert_eq!(monitor.get_metrics("shared").await.unwrap().count, 800);
    }

    #[tokio::test]
    async fn report_serializes_camel_case() {
        let monitor = monitor();
        monitor.record("op", 2.0).await;
        let json = serde_json::to_value(monitor.get_full_report().await.unwrap()).unwrap();

        assert_eq!(json["operations"]["op"]["count"], 1);
        assert!(json["system"]["uptimeMs"].is_u64());
        assert_eq!(json["summary"]["mostCalledOperation"], "op");
    }
}
