//! Application State Management
//!
//! `AppState` holds every service the HTTP layer needs. It is built once by
//! the factory and handed to the router as axum state; nothing is global.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::core::config::Config;
use crate::csrf::{CsrfManager, CsrfSettings, TokenStore};
use crate::system::{MetricsStore, PerformanceMonitor};

/// Central application state holding all services
pub struct AppState<T: TokenStore, M: MetricsStore> {
    /// Application configuration
    pub config: Arc<Config>,

    /// CSRF token manager
    pub csrf: Arc<CsrfManager<T>>,

    /// Latency monitor
    pub monitor: Arc<PerformanceMonitor<M>>,

    /// Process start time
    pub started_at: DateTime<Utc>,
}

impl<T: TokenStore, M: MetricsStore> AppState<T, M> {
    /// Build state over the given stores
    pub fn new(config: Config, token_store: T, metrics_store: M) -> Self {
        let csrf = CsrfManager::new(token_store, CsrfSettings::from(&config.csrf));
        let monitor = PerformanceMonitor::new(metrics_store, &config.metrics);

        Self {
            config: Arc::new(config),
            csrf: Arc::new(csrf),
            monitor: Arc::new(monitor),
            started_at: Utc::now(),
        }
    }
}

// Manual impl: the derive would require `T: Clone, M: Clone`.
impl<T: TokenStore, M: MetricsStore> Clone for AppState<T, M> {
    fn clone(&self) -> Self {
        Self {
            config: Arc::clone(&self.config),
            csrf: Arc::clone(&self.csrf),
            monitor: Arc::clone(&self.monitor),
            started_at: self.started_at,
        }
    }
}
