//! Call-site instrumentation

use std::time::Instant;

use crate::system::monitor::PerformanceMonitor;
use crate::system::store::MetricsStore;

/// Measures one call and records it on the monitor when finished
pub struct OperationTimer<'a, M: MetricsStore> {
    /// Monitor the sample goes to
    monitor: &'a PerformanceMonitor<M>,
    /// Operation name
    operation: String,
    /// Start time of the operation
    start: Instant,
}

impl<'a, M: MetricsStore> OperationTimer<'a, M> {
    /// Start a new timer
    pub fn start(monitor: &'a PerformanceMonitor<M>, operation: impl Into<String>) -> Self {
        Self {
            monitor,
            operation: operation.into(),
            start: Instant::now(),
        }
    }

    /// Milliseconds since the timer started
    pub fn elapsed_ms(&self) -> f64 {
        self.start.elapsed().as_secs_f64() * 1000.0
    }

    /// Record a successful call, returning the elapsed milliseconds
    pub async fn finish(self) -> f64 {
        self.finish_with(true).await
    }

    /// Record the call with an explicit outcome
    pub async fn finish_with(self, success: bool) -> f64 {
        let elapsed = self.elapsed_ms();
        self.monitor
            .record_outcome(&self.operation, elapsed, success)
            .await;
        elapsed
    }

    /// Record the call as a served request, counted in the request totals
    pub async fn finish_request(self, success: bool) -> f64 {
        let elapsed = self.elapsed_ms();
        self.monitor
            .record_request(&self.operation, elapsed, success)
            .await;
        elapsed
    }
}

/// Time an expression and record it on a [`PerformanceMonitor`].
///
/// Must be used inside an async context; the body may itself `.await`.
///
/// # Examples
/// ```ignore
/// let token = time_operation!(state.monitor, "csrf.issue", state.csrf.issue().await);
/// ```
#[macro_export]
macro_rules! time_operation {
    ($monitor:expr, $operation:expr, $body:expr) => {{
        let timer = $monitor.start_timer($operation);
        let result = $body;
        timer.finish().await;
        result
    }};
}

#[cfg(test)]
mod tests {
    use crate::core::config::MetricsConfig;
    use crate::system::monitor::PerformanceMonitor;
    use crate::system::store::MemoryMetricsStore;
    use std::time::Duration;

    fn monitor() -> PerformanceMonitor<MemoryMetricsStore> {
        PerformanceMonitor::new(MemoryMetricsStore::new(100), &MetricsConfig::default())
    }

    #[tokio::test]
    async fn timer_records_elapsed_time() {
        let monitor = monitor();
        let timer = monitor.start_timer("sleep");
        tokio::time::sleep(Duration::from_millis(5)).await;
        let elapsed = timer.finish().await;

        assert!(elapsed >= 5.0);
        let agg = monitor.get_metrics("sleep").await.unwrap();
        assert_eq!(agg.count, 1);
        assert_eq!(agg.errors, 0);
    }

    #[tokio::test]
    async fn failed_outcome_counts_as_error() {
        let monitor = monitor();
        monitor.start_timer("flaky").finish_with(false).await;
        assert_eq!(monitor.get_metrics("flaky").await.unwrap().errors, 1);
    }

    #[tokio::test]
    async fn request_timer_counts_toward_totals() {
        let monitor = monitor();
        monitor.start_timer("GET /x").finish_request(false).await;
        monitor.start_timer("inner").finish().await;

        let requests = monitor.get_full_report().await.unwrap().system.requests;
        assert_eq!(requests.total, 1);
        assert_eq!(requests.error, 1);
    }

    #[tokio::test]
    async fn macro_times_the_body() {
        let monitor = monitor();
        let value = crate::time_operation!(monitor, "compute", {
            tokio::time::sleep(Duration::from_millis(1)).await;
            41 + 1
        });

        assert_eq!(value, 42);
        assert_eq!(monitor.get_metrics("compute").await.unwrap().count, 1);
    }
}
