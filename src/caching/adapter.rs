//! # Typed Cache Adapter
//!
//! Stores typed values as JSON payloads. Transport goes through the
//! [`RetryExecutor`], so callers only ever see a value, an absence, or a terminal
//! error; transient network errors are handled underneath.

use super::retry::RetryExecutor;
use super::stores::{StoreConnector, StoreHandle};
use super::{CacheError, CacheResult};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Expiration policy applied to every entry written through the adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheEntryOptions {
    /// Entries expire after this long without being read
    #[serde(with = "humantime_serde")]
    pub sliding_expiration: Duration,
}

impl Default for CacheEntryOptions {
    fn default() -> Self {
        Self {
            sliding_expiration: Duration::from_secs(300),
        }
    }
}

/// Typed facade over the remote store
pub struct DistributedCache<C: StoreConnector> {
    executor: RetryExecutor<C>,
    options: CacheEntryOptions,
}

impl<C: StoreConnector> Clone for DistributedCache<C> {
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            options: self.options.clone(),
        }
    }
}

impl<C: StoreConnector> DistributedCache<C> {
    pub fn new(executor: RetryExecutor<C>, options: CacheEntryOptions) -> Self {
        Self { executor, options }
    }

    pub fn executor(&self) -> &RetryExecutor<C> {
        &self.executor
    }

    pub fn options(&self) -> &CacheEntryOptions {
        &self.options
    }

    /// Get the value stored under `key`. `Ok(None)` if absent or expired.
    pub async fn get<T: DeserializeOwned>(&self, key: &str, cancel: &CancellationToken) -> CacheResult<Option<T>> {
        validate_key(key)?;
        let ttl = self.options.sliding_expiration;
        let payload = self
            .executor
            .execute(cancel, |conn| async move { conn.handle().get(key, ttl).await })
            .await?;
        decode(key, payload)
    }

    /// Serialize `value` and store it under `key`
    pub async fn set<T: Serialize + ?Sized>(&self, key: &str, value: &T, cancel: &CancellationToken) -> CacheResult<()> {
        validate_key(key)?;
        let payload = serde_json::to_vec(value)?;
        let payload = payload.as_slice();
        let ttl = self.options.sliding_expiration;
        self.executor
            .execute(cancel, |conn| async move { conn.handle().set(key, payload, ttl).await })
            .await?;
        debug!(key, bytes = payload.len(), "Cached value");
        Ok(())
    }

    /// Delete `key`; no error if it was already absent
    pub async fn remove(&self, key: &str, cancel: &CancellationToken) -> CacheResult<()> {
        validate_key(key)?;
        self.executor
            .execute(cancel, |conn| async move { conn.handle().delete(key).await })
            .await
    }

    pub fn get_blocking<T: DeserializeOwned>(&self, key: &str) -> CacheResult<Option<T>> {
        validate_key(key)?;
        let ttl = self.options.sliding_expiration;
        let payload = self
            .executor
            .execute_blocking(|handle| handle.get_blocking(key, ttl))?;
        decode(key, payload)
    }

    pub fn set_blocking<T: Serialize + ?Sized>(&self, key: &str, value: &T) -> CacheResult<()> {
        validate_key(key)?;
        let payload = serde_json::to_vec(value)?;
        let ttl = self.options.sliding_expiration;
        self.executor
            .execute_blocking(|handle| handle.set_blocking(key, &payload, ttl))?;
        debug!(key, bytes = payload.len(), "Cached value");
        Ok(())
    }

    pub fn remove_blocking(&self, key: &str) -> CacheResult<()> {
        validate_key(key)?;
        self.executor
            .execute_blocking(|handle| handle.delete_blocking(key))
    }
}

fn validate_key(key: &str) -> CacheResult<()> {
    if key.is_empty() {
        return Err(CacheError::InvalidKey {
            message: "Cache key cannot be empty".to_string(),
        });
    }
    Ok(())
}

/// A present payload that does not decode is an error, never an absence
fn decode<T: DeserializeOwned>(key: &str, payload: Option<Vec<u8>>) -> CacheResult<Option<T>> {
    match payload {
        Some(bytes) => {
            let value = serde_json::from_slice(&bytes).map_err(|e| {
                debug!(key, error = %e, "Cached payload does not match the requested type");
                CacheError::Serialization(e)
            })?;
            Ok(Some(value))
        }
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::connection::{ConnectionManager, ReconnectConfig};
    use crate::caching::retry::RetryPolicy;
    use crate::caching::stores::InMemoryConnector;
    use std::collections::HashMap;
    use std::sync::Arc;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        name: String,
        tags: Vec<String>,
        score: Option<f64>,
    }

    async fn cache(connector: &InMemoryConnector) -> DistributedCache<InMemoryConnector> {
        let manager = ConnectionManager::connect(connector.clone(), ReconnectConfig::default())
            .await
            .unwrap();
        DistributedCache::new(
            RetryExecutor::new(Arc::new(manager), RetryPolicy::default()),
            CacheEntryOptions::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_typed_round_trip() {
        let connector = InMemoryConnector::new();
        let cache = cache(&connector).await;
        let cancel = CancellationToken::new();

        let profile = Profile {
            name: "Ada".to_string(),
            tags: vec!["admin".to_string()],
            score: Some(9.5),
        };
        cache.set("profile:1", &profile, &cancel).await.unwrap();
        let cached: Option<Profile> = cache.get("profile:1", &cancel).await.unwrap();
        assert_eq!(cached, Some(profile));

        let mut counters = HashMap::new();
        counters.insert("a".to_string(), 1u64);
        cache.set("counters", &counters, &cancel).await.unwrap();
        let cached: Option<HashMap<String, u64>> = cache.get("counters", &cancel).await.unwrap();
        assert_eq!(cached, Some(counters));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_key_is_absence() {
        let connector = InMemoryConnector::new();
        let cache = cache(&connector).await;
        let cancel = CancellationToken::new();

        let cached: Option<Profile> = cache.get("never-written", &cancel).await.unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_expired_key_is_absence() {
        let connector = InMemoryConnector::new();
        let cache = cache(&connector).await;
        let cancel = CancellationToken::new();

        cache.set("short-lived", &42u32, &cancel).await.unwrap();
        tokio::time::advance(Duration::from_secs(301)).await;
        let cached: Option<u32> = cache.get("short-lived", &cancel).await.unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_malformed_payload_is_an_error() {
        let connector = InMemoryConnector::new();
        let cache = cache(&connector).await;
        let cancel = CancellationToken::new();

        connector.insert_raw("broken", b"{not json", Duration::from_secs(60));
        let result: CacheResult<Option<Profile>> = cache.get("broken", &cancel).await;
        assert!(matches!(result, Err(CacheError::Serialization(_))));
        // Decoding failures are never retried
        assert_eq!(connector.operation_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_remove_is_unconditional() {
        let connector = InMemoryConnector::new();
        let cache = cache(&connector).await;
        let cancel = CancellationToken::new();

        cache.set("k", "value", &cancel).await.unwrap();
        cache.remove("k", &cancel).await.unwrap();
        cache.remove("k", &cancel).await.unwrap();
        let cached: Option<String> = cache.get("k", &cancel).await.unwrap();
        assert!(cached.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_key_rejected() {
        let connector = InMemoryConnector::new();
        let cache = cache(&connector).await;
        let cancel = CancellationToken::new();

        let result: CacheResult<Option<String>> = cache.get("", &cancel).await;
        assert!(matches!(result, Err(CacheError::InvalidKey { .. })));
        assert_eq!(connector.operation_count(), 0);
    }

    #[test]
    fn test_blocking_round_trip() {
        let connector = InMemoryConnector::new();
        let manager = ConnectionManager::connect_blocking(connector.clone(), ReconnectConfig::default()).unwrap();
        let cache = DistributedCache::new(
            RetryExecutor::new(Arc::new(manager), RetryPolicy::default()),
            CacheEntryOptions::default(),
        );

        cache.set_blocking("numbers", &vec![1, 2, 3]).unwrap();
        assert_eq!(cache.get_blocking::<Vec<i32>>("numbers").unwrap(), Some(vec![1, 2, 3]));

        cache.remove_blocking("numbers").unwrap();
        assert_eq!(cache.get_blocking::<Vec<i32>>("numbers").unwrap(), None);
    }
}
