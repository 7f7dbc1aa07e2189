//! Latency samples and the aggregates computed from them

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One recorded call
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Elapsed time in milliseconds
    pub duration_ms: f64,
    /// When the call finished
    pub timestamp: DateTime<Utc>,
    /// Whether the call succeeded
    pub success: bool,
}

impl Sample {
    /// Sample stamped with the current time
    pub fn new(duration_ms: f64, success: bool) -> Self {
        Self {
            duration_ms,
            timestamp: Utc::now(),
            success,
        }
    }
}

/// Summary of one operation's retained window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Aggregate {
    /// Samples in the window
    pub count: usize,
    /// Mean duration (ms)
    pub average: f64,
    /// Fastest sample (ms)
    pub min: f64,
    /// Slowest sample (ms)
    pub max: f64,
    /// Median (ms)
    pub p50: f64,
    /// 95th percentile (ms)
    pub p95: f64,
    /// 99th percentile (ms)
    pub p99: f64,
    /// Failed samples in the window
    pub errors: usize,
    /// Timestamp of the newest sample
    pub last_call: Option<DateTime<Utc>>,
}

impl Aggregate {
    /// Compute from a window ordered oldest to newest.
    ///
    /// Returns `None` for an empty window.
    pub fn from_samples(samples: &[Sample]) -> Option<Self> {
        if samples.is_empty() {
            return None;
        }

        let mut durations: Vec<f64> = samples.iter().map(|s| s.duration_ms).collect();
        durations.sort_by(f64::total_cmp);

        let count = durations.len();
        let sum: f64 = durations.iter().sum();

        Some(Self {
            count,
            average: sum / count as f64,
            min: durations[0],
            max: durations[count - 1],
            p50: percentile(&durations, 50.0),
            p95: percentile(&durations, 95.0),
            p99: percentile(&durations, 99.0),
            errors: samples.iter().filter(|s| !s.success).count(),
            last_call: samples.iter().map(|s| s.timestamp).max(),
        })
    }

    /// Total time spent in the window (ms)
    pub fn total(&self) -> f64 {
        self.average * self.count as f64
    }
}

/// Nearest-rank percentile over sorted, non-empty data
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    let rank = ((p / 100.0) * sorted.len() as f64).ceil() as usize;
    sorted[rank.clamp(1, sorted.len()) - 1]
}
