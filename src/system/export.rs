//! Prometheus text exposition
//!
//! Each export builds a fresh [`Registry`] from a report snapshot. The
//! windows are the source of truth, so there is no long-lived collector
//! state to keep in sync with resets.

use prometheus::{Gauge, GaugeVec, IntCounter, IntGaugeVec, Opts, Registry, TextEncoder};

use crate::core::error::Result;
use crate::system::monitor::PerformanceReport;

/// Metric name prefix
pub const NAMESPACE: &str = "portal";

/// Content type of the text exposition format
pub const CONTENT_TYPE: &str = "text/plain; version=0.0.4";

struct Exposition {
    registry: Registry,
}

impl Exposition {
    fn new() -> Self {
        Self {
            registry: Registry::new(),
        }
    }

    fn gauge(&self, name: &str, help: &str, value: f64) -> Result<()> {
        let gauge = Gauge::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
        gauge.set(value);
        self.registry.register(Box::new(gauge))?;
        Ok(())
    }

    fn counter(&self, name: &str, help: &str, value: u64) -> Result<()> {
        let counter = IntCounter::with_opts(Opts::new(name, help).namespace(NAMESPACE))?;
        counter.inc_by(value);
        self.registry.register(Box::new(counter))?;
        Ok(())
    }

    fn per_operation_gauge(&self, name: &str, help: &str) -> Result<GaugeVec> {
        let vec = GaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["operation"])?;
        self.registry.register(Box::new(vec.clone()))?;
        Ok(vec)
    }

    fn per_operation_int_gauge(&self, name: &str, help: &str) -> Result<IntGaugeVec> {
        let vec = IntGaugeVec::new(Opts::new(name, help).namespace(NAMESPACE), &["operation"])?;
        self.registry.register(Box::new(vec.clone()))?;
        Ok(vec)
    }

    fn encode(&self) -> Result<String> {
        Ok(TextEncoder::new().encode_to_string(&self.registry.gather())?)
    }
}

/// Render a report in the Prometheus text format
pub fn render_prometheus(report: &PerformanceReport) -> Result<String> {
    let out = Exposition::new();

    out.gauge(
        "uptime_seconds",
        "Application uptime in seconds",
        report.system.uptime_ms as f64 / 1000.0,
    )?;
    out.counter(
        "requests_total",
        "HTTP requests served since the last reset",
        report.system.requests.total,
    )?;
    out.counter(
        "requests_success_total",
        "HTTP requests that succeeded since the last reset",
        report.system.requests.success,
    )?;
    out.counter(
        "requests_error_total",
        "HTTP requests that failed since the last reset",
        report.system.requests.error,
    )?;
    out.gauge(
        "requests_per_second",
        "Recorded samples per second over the recent window",
        report.system.requests.rate,
    )?;

    if !report.operations.is_empty() {
        let count = out.per_operation_int_gauge(
            "operation_count",
            "Samples in the operation's window",
        )?;
        let errors = out.per_operation_int_gauge(
            "operation_errors",
            "Failed samples in the operation's window",
        )?;
        let average = out.per_operation_gauge(
            "operation_duration_avg_seconds",
            "Mean duration over the operation's window",
        )?;
        let p95 = out.per_operation_gauge(
            "operation_duration_p95_seconds",
            "95th percentile duration over the operation's window",
        )?;
        let max = out.per_operation_gauge(
            "operation_duration_max_seconds",
            "Slowest sample in the operation's window",
        )?;

        for (operation, agg) in &report.operations {
            let labels = [operation.as_str()];
            count.with_label_values(&labels).set(agg.count as i64);
            errors.with_label_values(&labels).set(agg.errors as i64);
            average.with_label_values(&labels).set(agg.average / 1000.0);
            p95.with_label_values(&labels).set(agg.p95 / 1000.0);
            max.with_label_values(&labels).set(agg.max / 1000.0);
        }
    }

    out.encode()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::MetricsConfig;
    use crate::system::monitor::PerformanceMonitor;
    use crate::system::store::MemoryMetricsStore;

    #[tokio::test]
    async fn exposes_per_operation_lines() {
        let monitor =
            PerformanceMonitor::new(MemoryMetricsStore::new(10), &MetricsConfig::default());
        monitor.record_request("GET /api/csrf-token", 12.0, true).await;
        monitor.record_request("GET /api/csrf-token", 8.0, true).await;
        monitor.record_request("POST /api/login", 30.0, false).await;

        let text = render_prometheus(&monitor.get_full_report().await.unwrap()).unwrap();

        assert!(text.contains("# HELP portal_operation_count"));
        assert!(text.contains("# TYPE portal_operation_count gauge"));
        assert!(text.contains("portal_operation_count{operation=\"GET /api/csrf-token\"} 2"));
        assert!(text.contains("portal_operation_errors{operation=\"POST /api/login\"} 1"));
        assert!(text.contains("portal_requests_total 3"));
        assert!(text.contains("portal_requests_error_total 1"));
    }

    #[tokio::test]
    async fn empty_report_still_has_system_metrics() {
        let monitor =
            PerformanceMonitor::new(MemoryMetricsStore::new(10), &MetricsConfig::default());
        let text = monitor.export_text().await.unwrap();

        assert!(text.contains("portal_uptime_seconds"));
        assert!(text.contains("portal_requests_total 0"));
        assert!(!text.contains("portal_operation_count"));
    }
}
