//! # Cache-Aside Service
//!
//! Look in the cache first; on a miss compute the value from its source of
//! record and write it back.
//!
//! There is no coordination between concurrent misses on the same key: each
//! caller computes the value and the last write wins. Sources are expected to be
//! idempotent. The write-back is best-effort: if it fails, the freshly computed
//! value is still returned.

use super::adapter::DistributedCache;
use super::stores::StoreConnector;
use super::CacheError;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Cache-aside statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheAsideStats {
    pub hits: u64,
    pub misses: u64,
    pub write_back_failures: u64,
    pub hit_ratio: f64,
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    write_back_failures: AtomicU64,
}

/// Read-through cache over a [`DistributedCache`]
pub struct ReadThroughCache<C: StoreConnector> {
    cache: DistributedCache<C>,
    counters: Arc<Counters>,
}

impl<C: StoreConnector> Clone for ReadThroughCache<C> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            counters: self.counters.clone(),
        }
    }
}

impl<C: StoreConnector> ReadThroughCache<C> {
    pub fn new(cache: DistributedCache<C>) -> Self {
        Self {
            cache,
            counters: Arc::new(Counters::default()),
        }
    }

    pub fn cache(&self) -> &DistributedCache<C> {
        &self.cache
    }

    /// Return the value cached under `key`, or compute it with `source` and cache it.
    ///
    /// `source` is not called on a hit. A cache read that fails after retries is
    /// returned as an error; a failed write-back is only logged.
    pub async fn get_or_populate<T, E, F, Fut>(
        &self,
        key: &str,
        source: F,
        cancel: &CancellationToken,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(value) = self.cache.get::<T>(key, cancel).await? {
            self.record_hit(key);
            return Ok(value);
        }
        self.record_miss(key);

        let value = source().await?;
        if let Err(e) = self.cache.set(key, &value, cancel).await {
            self.record_write_back_failure(key, &e);
        }
        Ok(value)
    }

    /// Blocking counterpart of [`ReadThroughCache::get_or_populate`]
    pub fn get_or_populate_blocking<T, E, F>(&self, key: &str, source: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        E: From<CacheError>,
        F: FnOnce() -> Result<T, E>,
    {
        if let Some(value) = self.cache.get_blocking::<T>(key)? {
            self.record_hit(key);
            return Ok(value);
        }
        self.record_miss(key);

        let value = source()?;
        if let Err(e) = self.cache.set_blocking(key, &value) {
            self.record_write_back_failure(key, &e);
        }
        Ok(value)
    }

    pub fn stats(&self) -> CacheAsideStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let lookups = hits + misses;
        CacheAsideStats {
            hits,
            misses,
            write_back_failures: self.counters.write_back_failures.load(Ordering::Relaxed),
            hit_ratio: if lookups > 0 {
                hits as f64 / lookups as f64
            } else {
                0.0
            },
        }
    }

    fn record_hit(&self, key: &str) {
        self.counters.hits.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("catalog_cache_hits_total").increment(1);
        debug!(key, "Cache hit");
    }

    fn record_miss(&self, key: &str) {
        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        metrics::counter!("catalog_cache_misses_total").increment(1);
        debug!(key, "Cache miss, loading from source");
    }

    fn record_write_back_failure(&self, key: &str, err: &CacheError) {
        self.counters.write_back_failures.fetch_add(1, Ordering::Relaxed);
        warn!(key, error = %err, "Failed to populate cache; returning the computed value anyway");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::adapter::CacheEntryOptions;
    use crate::caching::connection::{ConnectionManager, ReconnectConfig};
    use crate::caching::retry::{RetryExecutor, RetryPolicy};
    use crate::caching::stores::InMemoryConnector;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    async fn read_through(connector: &InMemoryConnector) -> ReadThroughCache<InMemoryConnector> {
        let manager = ConnectionManager::connect(connector.clone(), ReconnectConfig::default())
            .await
            .unwrap();
        let executor = RetryExecutor::new(Arc::new(manager), RetryPolicy::default());
        ReadThroughCache::new(DistributedCache::new(executor, CacheEntryOptions::default()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_miss_then_hit() {
        let connector = InMemoryConnector::new();
        let cache = read_through(&connector).await;
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        for _ in 0..2 {
            let value: Vec<String> = cache
                .get_or_populate(
                    "names",
                    || async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, CacheError>(vec!["a".to_string(), "b".to_string()])
                    },
                    &cancel,
                )
                .await
                .unwrap();
            assert_eq!(value, vec!["a".to_string(), "b".to_string()]);
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hit_ratio, 0.5);
    }

    #[tokio::test(start_paused = true)]
    async fn test_source_error_is_returned_and_nothing_cached() {
        let connector = InMemoryConnector::new();
        let cache = read_through(&connector).await;
        let cancel = CancellationToken::new();

        let result: Result<u32, CacheError> = cache
            .get_or_populate("k", || async { Err(CacheError::store("source failed")) }, &cancel)
            .await;
        assert!(result.is_err());
        assert!(connector.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_back_failure_still_returns_value() {
        let connector = InMemoryConnector::new();
        let cache = read_through(&connector).await;
        let cancel = CancellationToken::new();

        let value: u32 = cache
            .get_or_populate(
                "k",
                || async {
                    // Store goes down after the read but before the write-back
                    connector.set_reachable(false);
                    Ok::<_, CacheError>(7)
                },
                &cancel,
            )
            .await
            .unwrap();

        assert_eq!(value, 7);
        assert_eq!(cache.stats().write_back_failures, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_store_on_read_is_an_error() {
        let connector = InMemoryConnector::new();
        let cache = read_through(&connector).await;
        let cancel = CancellationToken::new();
        connector.set_reachable(false);

        let result: Result<u32, CacheError> = cache
            .get_or_populate("k", || async { Ok(1) }, &cancel)
            .await;
        assert!(matches!(result, Err(CacheError::Unavailable { .. })));
    }

    #[test]
    fn test_blocking_miss_then_hit() {
        let connector = InMemoryConnector::new();
        let manager = ConnectionManager::connect_blocking(connector.clone(), ReconnectConfig::default()).unwrap();
        let policy = RetryPolicy {
            max_retries: 2,
            retry_delay: Duration::from_millis(1),
        };
        let cache = ReadThroughCache::new(DistributedCache::new(
            RetryExecutor::new(Arc::new(manager), policy),
            CacheEntryOptions::default(),
        ));
        let mut calls = 0;

        for _ in 0..3 {
            let value: String = cache
                .get_or_populate_blocking("greeting", || {
                    calls += 1;
                    Ok::<_, CacheError>("hello".to_string())
                })
                .unwrap();
            assert_eq!(value, "hello");
        }
        assert_eq!(calls, 1);
        assert_eq!(cache.stats().hits, 2);
    }
}
