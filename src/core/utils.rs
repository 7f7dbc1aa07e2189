//! Utility functions shared by the CSRF and metrics modules

use chrono::{DateTime, Utc};

/// Current wall-clock time in UTC
///
/// Tokens and samples carry absolute timestamps so they stay meaningful when
/// written to a shared store and read back by another instance.
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// Shorten a secret for log output (first 10 characters)
pub fn redact(value: &str) -> String {
    let prefix: String = value.chars().take(10).collect();
    format!("{}...", prefix)
}
