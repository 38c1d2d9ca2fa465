//! # Configuration Module
//!
//! Configuration structures and loading for the catalog service.
//!
//! ## Key Features
//! - YAML configuration parsing with serde, every section optional
//! - Human-readable durations (`"60s"`, `"2m"`) via `humantime-serde`
//! - Environment variable overrides (`CATALOG_<SECTION>_<FIELD>`)
//! - Validation that collects every problem before failing

use crate::caching::{CacheEntryOptions, ReconnectConfig, RedisStoreConfig, RetryPolicy};
use crate::core::error::{CatalogError, CatalogResult};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

/// Environment variable naming the configuration file
pub const CONFIG_PATH_ENV: &str = "CATALOG_CONFIG_PATH";

/// Configuration file used when [`CONFIG_PATH_ENV`] is not set
pub const DEFAULT_CONFIG_PATH: &str = "config/catalog.yaml";

/// Complete service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub cache: CacheConfig,
    pub reconnect: ReconnectConfig,
    pub retry: RetryPolicy,
    pub logging: LoggingConfig,
}

impl AppConfig {
    /// Load the configuration named by `CATALOG_CONFIG_PATH`.
    ///
    /// A missing file is not an error: defaults are used. Environment overrides
    /// are applied and the result validated either way.
    pub async fn load() -> CatalogResult<Self> {
        let path = std::env::var(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        let mut config = if tokio::fs::try_exists(&path).await? {
            Self::read_file(&path).await?
        } else {
            tracing::info!(path = %path.display(), "No configuration file found, using defaults");
            Self::default()
        };

        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML file, then apply environment overrides
    pub async fn load_from_file<P: AsRef<Path>>(path: P) -> CatalogResult<Self> {
        let mut config = Self::read_file(path.as_ref()).await?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML document without touching the environment
    pub fn from_yaml_str(content: &str) -> CatalogResult<Self> {
        let config: AppConfig = serde_yaml::from_str(content)
            .map_err(|e| CatalogError::config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    async fn read_file(path: &Path) -> CatalogResult<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| CatalogError::config(format!("Failed to read config file {}: {}", path.display(), e)))?;

        serde_yaml::from_str(&content)
            .map_err(|e| CatalogError::config(format!("Failed to parse config: {}", e)))
    }

    /// Apply environment variable overrides to configuration
    ///
    /// Environment variables follow the pattern: CATALOG_<SECTION>_<FIELD>
    /// For example: CATALOG_RETRY_MAX_RETRIES=5
    pub fn apply_env_overrides(&mut self) -> CatalogResult<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply overrides from any variable lookup
    pub fn apply_overrides<F>(&mut self, lookup: F) -> CatalogResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("CATALOG_REDIS_URL") {
            self.cache.connection_string = url;
        }

        if let Some(port) = lookup("CATALOG_SERVER_PORT") {
            self.server.port = port
                .parse()
                .map_err(|e| CatalogError::config(format!("Invalid CATALOG_SERVER_PORT: {}", e)))?;
        }

        if let Some(value) = lookup("CATALOG_SLIDING_EXPIRATION") {
            self.cache.sliding_expiration = parse_duration("CATALOG_SLIDING_EXPIRATION", &value)?;
        }

        if let Some(value) = lookup("CATALOG_RECONNECT_MIN_INTERVAL") {
            self.reconnect.min_reconnect_interval = parse_duration("CATALOG_RECONNECT_MIN_INTERVAL", &value)?;
        }

        if let Some(value) = lookup("CATALOG_RECONNECT_ERROR_THRESHOLD") {
            self.reconnect.error_threshold = parse_duration("CATALOG_RECONNECT_ERROR_THRESHOLD", &value)?;
        }

        if let Some(value) = lookup("CATALOG_RECONNECT_GUARD_TIMEOUT") {
            self.reconnect.guard_timeout = parse_duration("CATALOG_RECONNECT_GUARD_TIMEOUT", &value)?;
        }

        if let Some(value) = lookup("CATALOG_RETRY_MAX_RETRIES") {
            self.retry.max_retries = value
                .parse()
                .map_err(|e| CatalogError::config(format!("Invalid CATALOG_RETRY_MAX_RETRIES: {}", e)))?;
        }

        if let Some(value) = lookup("CATALOG_RETRY_DELAY") {
            self.retry.retry_delay = parse_duration("CATALOG_RETRY_DELAY", &value)?;
        }

        if let Some(level) = lookup("CATALOG_LOG_LEVEL") {
            self.logging.level = level;
        }

        if let Some(format) = lookup("CATALOG_LOG_FORMAT") {
            self.logging.format = format;
        }

        Ok(())
    }

    /// Validate the configuration, reporting every problem at once
    pub fn validate(&self) -> CatalogResult<()> {
        let mut errors = Vec::new();

        if self.server.bind_address.is_empty() {
            errors.push("bind_address cannot be empty".to_string());
        }

        if self.server.port == 0 {
            errors.push("server port must be greater than 0".to_string());
        }

        if self.cache.backend == CacheBackend::Redis {
            match Url::parse(&self.cache.connection_string) {
                Ok(url) if matches!(url.scheme(), "redis" | "rediss" | "redis+unix" | "unix") => {}
                Ok(url) => errors.push(format!(
                    "Unsupported cache connection scheme '{}'",
                    url.scheme()
                )),
                Err(e) => errors.push(format!(
                    "Invalid cache connection_string '{}': {}",
                    self.cache.connection_string, e
                )),
            }
        }

        if self.cache.connection_timeout.is_zero() {
            errors.push("cache connection_timeout must be greater than 0".to_string());
        }

        if self.cache.sliding_expiration.as_secs() == 0 {
            // Redis expirations have one second granularity
            errors.push("cache sliding_expiration must be at least one second".to_string());
        }

        if let Err(e) = self.reconnect.validate() {
            errors.push(e.to_string());
        }

        if self.retry.retry_delay.is_zero() {
            errors.push("retry_delay must be greater than 0".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            errors.push(format!("Invalid log level: {}", self.logging.level));
        }

        match self.logging.format.to_lowercase().as_str() {
            "json" | "pretty" => {}
            _ => errors.push(format!("Invalid log format: {}", self.logging.format)),
        }

        if !errors.is_empty() {
            return Err(CatalogError::config(format!(
                "Configuration validation failed:\n{}",
                errors.join("\n")
            )));
        }

        Ok(())
    }
}

fn parse_duration(name: &str, value: &str) -> CatalogResult<Duration> {
    humantime::parse_duration(value).map_err(|e| CatalogError::config(format!("Invalid {}: {}", name, e)))
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

impl ServerConfig {
    pub fn listen_address(&self) -> String {
        format!("{}:{}", self.bind_address, self.port)
    }
}

/// Which store backs the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    Redis,
    Memory,
}

/// Cache store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub backend: CacheBackend,

    /// Redis connection URL
    pub connection_string: String,

    pub key_prefix: String,

    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,

    /// Entries expire after this long without being read
    #[serde(with = "humantime_serde")]
    pub sliding_expiration: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        let redis = RedisStoreConfig::default();
        Self {
            backend: CacheBackend::Redis,
            connection_string: redis.url,
            key_prefix: redis.key_prefix,
            connection_timeout: redis.connection_timeout,
            sliding_expiration: CacheEntryOptions::default().sliding_expiration,
        }
    }
}

impl CacheConfig {
    pub fn redis_store_config(&self) -> RedisStoreConfig {
        RedisStoreConfig {
            url: self.connection_string.clone(),
            key_prefix: self.key_prefix.clone(),
            connection_timeout: self.connection_timeout,
        }
    }

    pub fn entry_options(&self) -> CacheEntryOptions {
        CacheEntryOptions {
            sliding_expiration: self.sliding_expiration,
        }
    }
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

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}
