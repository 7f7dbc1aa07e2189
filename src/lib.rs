//! portal-guard - request-safety services for a web portal backend
//!
//! Two independent utilities behind one HTTP server:
//! - a CSRF token manager that issues and validates short-lived
//!   anti-forgery tokens ([`csrf`]),
//! - a performance monitor that keeps bounded latency windows per operation
//!   and reports them as JSON or Prometheus text ([`system`]).
//!
//! Both run against in-memory stores for a single instance or Redis when
//! several instances share traffic.
#![warn(missing_docs)]

// Core foundational modules
pub mod core;

// Main functional modules
pub mod api;
pub mod csrf;
pub mod system;

// Re-export commonly used items for convenience
pub use core::{Config, Error, Result};

/// Crate version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
