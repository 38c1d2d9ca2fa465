//! # Configuration Loading Tests

use catalog_cache::core::config::{AppConfig, CacheBackend};
use catalog_cache::core::error::CatalogError;
use std::io::Write;
use std::time::Duration;
use tempfile::NamedTempFile;

fn write_config(content: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(content.as_bytes()).unwrap();
    file
}

#[tokio::test]
async fn test_load_full_config_file() {
    let file = write_config(
        r#"
server:
  bind_address: "127.0.0.1"
  port: 8181
cache:
  backend: redis
  connection_string: "redis://cache.example.com:6379/2"
  key_prefix: "shop:"
  connection_timeout: 3s
  sliding_expiration: 5m
reconnect:
  min_reconnect_interval: 2m
  error_threshold: 45s
  guard_timeout: 10s
retry:
  max_retries: 3
  retry_delay: 1s
logging:
  level: debug
  format: pretty
"#,
    );

    let config = AppConfig::load_from_file(file.path()).await.unwrap();

    assert_eq!(config.server.listen_address(), "127.0.0.1:8181");
    assert_eq!(config.cache.backend, CacheBackend::Redis);
    assert_eq!(config.cache.key_prefix, "shop:");
    assert_eq!(config.cache.connection_timeout, Duration::from_secs(3));
    assert_eq!(config.cache.entry_options().sliding_expiration, Duration::from_secs(300));
    assert_eq!(config.reconnect.min_reconnect_interval, Duration::from_secs(120));
    assert_eq!(config.reconnect.error_threshold, Duration::from_secs(45));
    assert_eq!(config.reconnect.guard_timeout, Duration::from_secs(10));
    assert_eq!(config.retry.max_attempts(), 4);
    assert_eq!(config.logging.format, "pretty");

    let redis = config.cache.redis_store_config();
    assert_eq!(redis.url, "redis://cache.example.com:6379/2");
    assert_eq!(redis.key_prefix, "shop:");
}

#[tokio::test]
async fn test_memory_backend_config() {
    let file = write_config(
        r#"
cache:
  backend: memory
"#,
    );

    let config = AppConfig::load_from_file(file.path()).await.unwrap();
    assert_eq!(config.cache.backend, CacheBackend::Memory);
    assert_eq!(config.retry.max_retries, 2);
}

#[tokio::test]
async fn test_invalid_config_fails_fast() {
    let file = write_config(
        r#"
reconnect:
  guard_timeout: 0s
"#,
    );

    let err = AppConfig::load_from_file(file.path()).await.unwrap_err();
    assert!(matches!(err, CatalogError::Configuration { .. }));
    assert!(err.to_string().contains("guard_timeout"));
}

#[tokio::test]
async fn test_malformed_yaml_is_a_configuration_error() {
    let file = write_config("server: [unterminated");
    let err = AppConfig::load_from_file(file.path()).await.unwrap_err();
    assert!(matches!(err, CatalogError::Configuration { .. }));
}

#[tokio::test]
async fn test_missing_file_is_an_error_when_named_explicitly() {
    let dir = tempfile::tempdir().unwrap();
    let result = AppConfig::load_from_file(dir.path().join("absent.yaml")).await;
    assert!(result.is_err());
}
