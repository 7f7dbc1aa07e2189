//! Configuration management for portal-guard
//!
//! Settings come from a TOML file (`portal-guard.toml` by default), then
//! `PORTAL_*` environment variables, then CLI flags. Every section has
//! defaults so a partial file is enough.

use crate::core::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Default config file looked up by [`Config::load`]
pub const DEFAULT_CONFIG_FILE: &str = "portal-guard.toml";

/// Available backends for token and metrics state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Process-local maps, for single-instance and dev deployments
    Memory,
    /// Shared Redis instance, for multi-instance deployments
    Redis,
}

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server configuration
    pub server: ServerConfig,

    /// CSRF token configuration
    pub csrf: CsrfConfig,

    /// Performance monitor configuration
    pub metrics: MetricsConfig,

    /// Token / metrics store configuration
    pub storage: StorageConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP server bind address
    pub http_addr: SocketAddr,

    /// Deployment environment (development, production, test)
    pub environment: String,

    /// Number of worker threads (0 = auto-detect)
    pub worker_threads: usize,
}

/// CSRF token configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CsrfConfig {
    /// Token time-to-live
    #[serde(with = "duration_format")]
    pub ttl: Duration,

    /// Maximum tokens kept in the store before the oldest are evicted
    pub max_tokens: usize,

    /// Interval of the background expiry sweep
    #[serde(with = "duration_format")]
    pub sweep_interval: Duration,

    /// Remove a token after its first successful validation
    pub single_use: bool,

    /// Also set the token in a readable `csrf-token` cookie and accept it from there
    pub cookie_fallback: bool,

    /// Request paths that skip the CSRF guard on mutating methods
    pub exempt_paths: Vec<String>,
}

/// Performance monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Samples retained per operation
    pub window_size: usize,

    /// Window used to compute the request rate
    #[serde(with = "duration_format")]
    pub rate_window: Duration,

    /// Serve the Prometheus text format on the performance endpoint
    pub enable_prometheus: bool,

    /// Record every HTTP request as an operation
    pub record_requests: bool,

    /// Interval of the periodic summary log line in production (0 = off)
    #[serde(with = "duration_format")]
    pub report_interval: Duration,
}

/// Store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend type
    pub backend: StoreBackend,

    /// Redis connection URL (required for the redis backend)
    pub redis_url: Option<String>,

    /// Key prefix for everything written to Redis
    pub redis_prefix: String,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (json, pretty)
    pub format: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            environment: "development".to_string(),
            worker_threads: 0,
        }
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            max_tokens: 1000,
            sweep_interval: Duration::from_secs(300),
            single_use: false,
            cookie_fallback: true,
            exempt_paths: Vec::new(),
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            window_size: 1000,
            rate_window: Duration::from_secs(60),
            enable_prometheus: true,
            record_requests: true,
            report_interval: Duration::from_secs(60),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Memory,
            redis_url: None,
            redis_prefix: "portal-guard".to_string(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Load configuration from the default file (if present) and environment
    pub fn load() -> Result<Self> {
        let mut config = if Path::new(DEFAULT_CONFIG_FILE).exists() {
            Self::from_file(DEFAULT_CONFIG_FILE)?
        } else {
            Config::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file, then apply environment overrides
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse a TOML file without overrides or validation
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| Error::config(format!("Failed to read config file: {}", e)))?;

        Self::from_toml(&contents)
    }

    /// Parse TOML text
    pub fn from_toml(contents: &str) -> Result<Self> {
        toml::from_str(contents)
            .map_err(|e| Error::config(format!("Failed to parse config file: {}", e)))
    }

    /// Apply `PORTAL_*` environment variable overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary key lookup
    pub(crate) fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(addr) = lookup("PORTAL_HTTP_ADDR") {
            self.server.http_addr = addr
                .parse()
                .map_err(|e| Error::config(format!("Invalid HTTP address: {}", e)))?;
        }

        if let Some(env) = lookup("PORTAL_ENV") {
            self.server.environment = env;
        }

        if let Some(workers) = lookup("PORTAL_WORKER_THREADS") {
            self.server.worker_threads = workers
                .parse()
                .map_err(|e| Error::config(format!("Invalid worker threads: {}", e)))?;
        }

        if let Some(ttl) = lookup("PORTAL_CSRF_TTL") {
            self.csrf.ttl = parse_duration(&ttl)
                .map_err(|e| Error::config(format!("Invalid CSRF TTL: {}", e)))?;
        }

        if let Some(max) = lookup("PORTAL_CSRF_MAX_TOKENS") {
            self.csrf.max_tokens = max
                .parse()
                .map_err(|e| Error::config(format!("Invalid max tokens: {}", e)))?;
        }

        if let Some(single_use) = lookup("PORTAL_CSRF_SINGLE_USE") {
            self.csrf.single_use = parse_bool(&single_use)?;
        }

        if let Some(window) = lookup("PORTAL_METRICS_WINDOW") {
            self.metrics.window_size = window
                .parse()
                .map_err(|e| Error::config(format!("Invalid metrics window: {}", e)))?;
        }

        if let Some(backend) = lookup("PORTAL_STORE") {
            self.storage.backend = match backend.as_str() {
                "memory" => StoreBackend::Memory,
                "redis" => StoreBackend::Redis,
                other => {
                    return Err(Error::config(format!(
                        "Invalid store backend: {}. Valid options: memory, redis",
                        other
                    )))
                }
            };
        }

        if let Some(url) = lookup("PORTAL_REDIS_URL") {
            self.storage.redis_url = Some(url);
        }

        if let Some(level) = lookup("PORTAL_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("PORTAL_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.csrf.ttl.is_zero() {
            return Err(Error::config("CSRF TTL must be greater than zero"));
        }

        if self.csrf.max_tokens == 0 {
            return Err(Error::config("CSRF max_tokens must be at least 1"));
        }

        if self.csrf.sweep_interval.is_zero() {
            return Err(Error::config("CSRF sweep interval must be greater than zero"));
        }

        if self.metrics.window_size == 0 {
            return Err(Error::config("Metrics window size must be at least 1"));
        }

        if self.server.worker_threads > 1024 {
            return Err(Error::config("Too many worker threads (maximum 1024)"));
        }

        if self.storage.backend == StoreBackend::Redis && self.storage.redis_url.is_none() {
            return Err(Error::config("The redis backend requires storage.redis_url"));
        }

        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(Error::config("Invalid log level")),
        }

        match self.logging.format.as_str() {
            "pretty" | "json" => {}
            _ => return Err(Error::config("Invalid log format (expected pretty or json)")),
        }

        Ok(())
    }

    /// Get optimal number of worker threads
    pub fn optimal_worker_threads(&self) -> usize {
        if self.server.worker_threads == 0 {
            num_cpus::get().max(1)
        } else {
            self.server.worker_threads
        }
    }

    /// Whether the service runs in production mode
    pub fn is_production(&self) -> bool {
        self.server.environment == "production"
    }
}

fn parse_bool(value: &str) -> Result<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(Error::config(format!("Invalid boolean: {}", other))),
    }
}

/// Parse durations like `250ms`, `30s`, `5m`, `1h`, or bare seconds
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim();
    if let Some(ms) = s.strip_suffix("ms") {
        let ms: u64 = ms.parse().map_err(|_| "Invalid milliseconds")?;
        Ok(Duration::from_millis(ms))
    } else if let Some(secs) = s.strip_suffix('s') {
        let secs: u64 = secs.parse().map_err(|_| "Invalid seconds")?;
        Ok(Duration::from_secs(secs))
    } else if let Some(mins) = s.strip_suffix('m') {
        let mins: u64 = mins.parse().map_err(|_| "Invalid minutes")?;
        Ok(Duration::from_secs(mins * 60))
    } else if let Some(hours) = s.strip_suffix('h') {
        let hours: u64 = hours.parse().map_err(|_| "Invalid hours")?;
        Ok(Duration::from_secs(hours * 3600))
    } else {
        let secs: u64 = s.parse().map_err(|_| "Invalid duration format")?;
        Ok(Duration::from_secs(secs))
    }
}

/// Serde adapter storing durations as human-readable strings
mod duration_format {
    use super::parse_duration;
    use serde::de::{self, Deserializer, Visitor};
    use serde::Serializer;
    use std::fmt;
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let text = if value.subsec_millis() == 0 {
            format!("{}s", value.as_secs())
        } else {
            format!("{}ms", value.as_millis())
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct DurationVisitor;

        impl<'de> Visitor<'de> for DurationVisitor {
            type Value = Duration;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a duration string like '30s' or '5m', or seconds")
            }

            fn visit_str<E>(self, value: &str) -> Result<Duration, E>
            where
                E: de::Error,
            {
                parse_duration(value).map_err(E::custom)
            }

            fn visit_i64<E>(self, value: i64) -> Result<Duration, E>
            where
                E: de::Error,
            {
                u64::try_from(value)
                    .map(Duration::from_secs)
                    .map_err(|_| E::custom("duration must not be negative"))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Duration, E>
            where
                E: de::Error,
            {
                Ok(Duration::from_secs(value))
            }
        }

        deserializer.deserialize_any(DurationVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn defaults_match_token_and_window_limits() {
        let config = Config::default();
        assert_eq!(config.csrf.ttl, Duration::from_secs(3600));
        assert_eq!(config.csrf.max_tokens, 1000);
        assert_eq!(config.csrf.sweep_interval, Duration::from_secs(300));
        assert_eq!(config.metrics.window_size, 1000);
        assert_eq!(config.storage.backend, StoreBackend::Memory);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn parses_partial_file_with_duration_strings() {
        let config = Config::from_toml(
            r#"
            [csrf]
            ttl = "30m"
            sweep_interval = "250ms"
            single_use = true

            [metrics]
            window_size = 50
            "#,
        )
        .unwrap();

        assert_eq!(config.csrf.ttl, Duration::from_secs(1800));
        assert_eq!(config.csrf.sweep_interval, Duration::from_millis(250));
        assert!(config.csrf.single_use);
        assert_eq!(config.metrics.window_size, 50);
        assert_eq!(config.csrf.max_tokens, 1000);
    }

    #[test]
    fn loads_from_file_on_disk() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nhttp_addr = \"127.0.0.1:9999\"\nenvironment = \"production\"").unwrap();

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.server.http_addr.port(), 9999);
        assert!(config.is_production());
    }

    #[test]
    fn missing_file_is_a_config_error() {
        let err = Config::from_file("/definitely/not/here.toml").unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn overrides_apply_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("PORTAL_CSRF_TTL", "10s"),
            ("PORTAL_STORE", "redis"),
            ("PORTAL_REDIS_URL", "redis://127.0.0.1/"),
            ("PORTAL_CSRF_SINGLE_USE", "yes"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config
            .apply_overrides(|key| vars.get(key).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.csrf.ttl, Duration::from_secs(10));
        assert_eq!(config.storage.backend, StoreBackend::Redis);
        assert!(config.csrf.single_use);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn rejects_unknown_backend() {
        let mut config = Config::default();
        let result = config.apply_overrides(|key| {
            (key == "PORTAL_STORE").then(|| "etcd".to_string())
        });
        assert!(result.is_err());
    }

    #[test]
    fn redis_backend_requires_url() {
        let mut config = Config::default();
        config.storage.backend = StoreBackend::Redis;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_limits() {
        let mut config = Config::default();
        config.metrics.window_size = 0;
        assert!(config.validate().is_err());

        let mut config = Config::default();
        config.csrf.max_tokens = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn duration_parser_formats() {
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("2h").unwrap(), Duration::from_secs(7200));
        assert_eq!(parse_duration("42").unwrap(), Duration::from_secs(42));
        assert_eq!(parse_duration("15ms").unwrap(), Duration::from_millis(15));
        assert!(parse_duration("soon").is_err());
    }

    #[test]
    fn serialized_config_round_trips_through_toml() {
        let mut config = Config::default();
        config.csrf.sweep_interval = Duration::from_millis(1500);
        let text = toml::to_string(&config).unwrap();
        let parsed = Config::from_toml(&text).unwrap();
        assert_eq!(parsed.csrf.sweep_interval, Duration::from_millis(1500));
        assert_eq!(parsed.csrf.ttl, config.csrf.ttl);
    }
}
