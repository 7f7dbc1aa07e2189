//! Application Factory
//!
//! Builds the [`AppState`] for the configured store backend. The backend is
//! chosen once here; everything downstream is generic over the store types.

use std::net::SocketAddr;

use crate::core::app_state::AppState;
use crate::core::config::{Config, StoreBackend};
use crate::core::error::{Error, Result};
use crate::csrf::{MemoryTokenStore, RedisTokenStore};
use crate::system::{MemoryMetricsStore, RedisMetricsStore};

/// AppState for each supported backend
pub enum ConfiguredAppState {
    /// Process-local stores
    Memory {
        /// The application state with in-memory stores
        app_state: AppState<MemoryTokenStore, MemoryMetricsStore>,
    },
    /// Stores shared through Redis
    Redis {
        /// The application state with Redis stores
        app_state: AppState<RedisTokenStore, RedisMetricsStore>,
    },
}

impl ConfiguredAppState {
    /// Get the HTTP address from config
    pub fn http_addr(&self) -> SocketAddr {
        self.config().server.http_addr
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        match self {
            ConfiguredAppState::Memory { app_state } => &app_state.config,
            ConfiguredAppState::Redis { app_state } => &app_state.config,
        }
    }

    /// Backend in use
    pub fn backend(&self) -> StoreBackend {
        match self {
            ConfiguredAppState::Memory { .. } => StoreBackend::Memory,
            ConfiguredAppState::Redis { .. } => StoreBackend::Redis,
        }
    }
}

/// Create AppState based on configuration
pub fn create_app_state(config: Config) -> Result<ConfiguredAppState> {
    tracing::info!("Creating AppState with store backend: {:?}", config.storage.backend);

    match config.storage.backend {
        StoreBackend::Memory => {
            let tokens = MemoryTokenStore::new();
            let metrics = MemoryMetricsStore::new(config.metrics.window_size);
            Ok(ConfiguredAppState::Memory {
                app_state: AppState::new(config, tokens, metrics),
            })
        }
        StoreBackend::Redis => {
            let url = config
                .storage
                .redis_url
                .clone()
                .ok_or_else(|| Error::config("The redis backend requires storage.redis_url"))?;
            let prefix = config.storage.redis_prefix.clone();

            let tokens = RedisTokenStore::new(&url, &prefix)?;
            let metrics = RedisMetricsStore::new(&url, &prefix, config.metrics.window_size)?;
            tracing::info!("Redis stores initialized with prefix {}", prefix);

            Ok(ConfiguredAppState::Redis {
                app_state: AppState::new(config, tokens, metrics),
            })
        }
    }
}
