//! # Retry Executor
//!
//! Runs store operations against the current connection and recovers from
//! transient failures: every transient failure is reported to the
//! [`ConnectionManager`] (which may reconnect) and the operation is retried after
//! a fixed delay, up to `max_retries` times. Fatal failures are returned at once.
//!
//! Cancellation is only observed while waiting between attempts. An attempt that
//! was already sent to the store, or a reconnect in progress, always completes.

use super::connection::{ConnectionManager, LiveConnection};
use super::stores::StoreConnector;
use super::{CacheError, CacheResult};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

/// Bounded retry policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retries: u32,

    /// Fixed delay between attempts
    #[serde(with = "humantime_serde")]
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries + 1
    }
}

/// Executes store operations with reconnect-aware retries
pub struct RetryExecutor<C: StoreConnector> {
    connection: Arc<ConnectionManager<C>>,
    policy: RetryPolicy,
}

impl<C: StoreConnector> Clone for RetryExecutor<C> {
    fn clone(&self) -> Self {
        Self {
            connection: self.connection.clone(),
            policy: self.policy.clone(),
        }
    }
}

impl<C: StoreConnector> RetryExecutor<C> {
    pub fn new(connection: Arc<ConnectionManager<C>>, policy: RetryPolicy) -> Self {
        Self { connection, policy }
    }

    pub fn connection(&self) -> &Arc<ConnectionManager<C>> {
        &self.connection
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` with retries.
    ///
    /// `operation` is called once per attempt with a snapshot of the current
    /// connection, so a retry after a reconnect runs against the new one.
    pub async fn execute<T, F, Fut>(&self, cancel: &CancellationToken, mut operation: F) -> CacheResult<T>
    where
        F: FnMut(Arc<LiveConnection<C::Handle>>) -> Fut,
        Fut: Future<Output = CacheResult<T>>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        loop {
            let (result, reported) = match self.connection_for_attempt().await {
                Ok(connection) => (operation(connection).await, false),
                Err(e) => (Err(e), true),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            // Every transient failure counts as evidence for the error window
            if !reported {
                if let Err(reconnect_err) = self.connection.ensure_connected().await {
                    warn!("Reconnect after failed cache operation did not succeed: {}", reconnect_err);
                }
            }

            if attempt >= max_attempts {
                return Err(self.exhausted(attempt, err));
            }

            warn!(attempt, max_attempts, error = %err, "Transient cache failure, retrying");
            metrics::counter!("catalog_cache_retries_total").increment(1);

            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Cache operation cancelled between attempts");
                    return Err(CacheError::Cancelled);
                }
                _ = tokio::time::sleep(self.policy.retry_delay) => {}
            }
            attempt += 1;
        }
    }

    /// Blocking counterpart of [`RetryExecutor::execute`]
    pub fn execute_blocking<T, F>(&self, mut operation: F) -> CacheResult<T>
    where
        F: FnMut(&C::Handle) -> CacheResult<T>,
    {
        let max_attempts = self.policy.max_attempts();
        let mut attempt = 1;

        loop {
            let (result, reported) = match self.connection_for_attempt_blocking() {
                Ok(connection) => (operation(connection.handle()), false),
                Err(e) => (Err(e), true),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => e,
            };

            if !reported {
                if let Err(reconnect_err) = self.connection.ensure_connected_blocking() {
                    warn!("Reconnect after failed cache operation did not succeed: {}", reconnect_err);
                }
            }

            if attempt >= max_attempts {
                return Err(self.exhausted(attempt, err));
            }

            warn!(attempt, max_attempts, error = %err, "Transient cache failure, retrying");
            metrics::counter!("catalog_cache_retries_total").increment(1);

            std::thread::sleep(self.policy.retry_delay);
            attempt += 1;
        }
    }

    /// Current connection, connecting first if nothing is published yet.
    ///
    /// An error here comes from that connect, which the manager has already
    /// seen, so the caller does not report it again.
    async fn connection_for_attempt(&self) -> CacheResult<Arc<LiveConnection<C::Handle>>> {
        if let Some(connection) = self.connection.current() {
            return Ok(connection);
        }
        self.connection.ensure_connected().await?;
        self.connection.handle()
    }

    fn connection_for_attempt_blocking(&self) -> CacheResult<Arc<LiveConnection<C::Handle>>> {
        if let Some(connection) = self.connection.current() {
            return Ok(connection);
        }
        self.connection.ensure_connected_blocking()?;
        self.connection.handle()
    }

    fn exhausted(&self, attempts: u32, last: CacheError) -> CacheError {
        error!(attempts, error = %last, "Cache operation failed after all retries");
        CacheError::Unavailable {
            attempts,
            source: Box::new(last),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caching::connection::ReconnectConfig;
    use crate::caching::stores::{InMemoryConnector, StoreHandle};
    use std::sync::atomic::{AtomicU32, Ordering};

    const TTL: Duration = Duration::from_secs(60);

    async fn executor(connector: &InMemoryConnector) -> RetryExecutor<InMemoryConnector> {
        let manager = ConnectionManager::connect(connector.clone(), ReconnectConfig::default())
            .await
            .unwrap();
        RetryExecutor::new(Arc::new(manager), RetryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_on_first_attempt() {
        let connector = InMemoryConnector::new();
        let executor = executor(&connector).await;
        let cancel = CancellationToken::new();

        let value = executor
            .execute(&cancel, |conn| async move { conn.handle().get("k", TTL).await })
            .await
            .unwrap();
        assert_eq!(value, None);
        assert_eq!(connector.operation_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_recovers_from_transient_failures() {
        let connector = InMemoryConnector::new();
        let executor = executor(&connector).await;
        let cancel = CancellationToken::new();
        connector.fail_next_operations(2);

        let started = tokio::time::Instant::now();
        executor
            .execute(&cancel, |conn| async move { conn.handle().set("k", b"v", TTL).await })
            .await
            .unwrap();

        assert_eq!(connector.operation_count(), 3);
        // Two fixed delays between three attempts
        assert!(started.elapsed() >= Duration::from_secs(4));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_attempts_are_bounded() {
        let connector = InMemoryConnector::new();
        let executor = executor(&connector).await;
        let cancel = CancellationToken::new();
        connector.fail_next_operations(10);

        let err = executor
            .execute(&cancel, |conn| async move { conn.handle().get("k", TTL).await })
            .await
            .unwrap_err();

        match err {
            CacheError::Unavailable { attempts, source } => {
                assert_eq!(attempts, 3);
                assert!(matches!(*source, CacheError::Connection { .. }));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(connector.operation_count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_errors_are_not_retried() {
        let connector = InMemoryConnector::new();
        let executor = executor(&connector).await;
        let cancel = CancellationToken::new();
        let calls = AtomicU32::new(0);

        let err = executor
            .execute(&cancel, |_conn| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(CacheError::store("WRONGTYPE")) }
            })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Store { .. }));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancellation_between_attempts() {
        let connector = InMemoryConnector::new();
        let executor = executor(&connector).await;
        let cancel = CancellationToken::new();
        connector.fail_next_operations(10);

        let canceller = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            canceller.cancel();
        });

        let err = executor
            .execute(&cancel, |conn| async move { conn.handle().get("k", TTL).await })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Cancelled));
        // The first attempt ran; cancellation cut the wait before the second
        assert_eq!(connector.operation_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lazy_connection_is_established_on_first_attempt() {
        let connector = InMemoryConnector::new();
        let manager = ConnectionManager::new(connector.clone(), ReconnectConfig::default()).unwrap();
        let executor = RetryExecutor::new(Arc::new(manager), RetryPolicy::default());
        let cancel = CancellationToken::new();

        let started = tokio::time::Instant::now();
        executor
            .execute(&cancel, |conn| async move { conn.handle().set("k", b"v", TTL).await })
            .await
            .unwrap();

        assert_eq!(connector.connect_count(), 1);
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_first_connect_dials_once_per_attempt() {
        let connector = InMemoryConnector::new();
        connector.set_reachable(false);
        let manager = Arc::new(ConnectionManager::new(connector.clone(), ReconnectConfig::default()).unwrap());
        let executor = RetryExecutor::new(manager.clone(), RetryPolicy::default());
        let cancel = CancellationToken::new();

        let err = executor
            .execute(&cancel, |conn| async move { conn.handle().get("k", TTL).await })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Unavailable { attempts: 3, .. }));
        assert_eq!(manager.stats().failed_reconnects, 3);
        assert_eq!(connector.operation_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_outage_after_failed_reconnect_does_not_redial() {
        let connector = InMemoryConnector::new();
        let executor = executor(&connector).await;
        let manager = executor.connection().clone();
        let cancel = CancellationToken::new();

        connector.set_reachable(false);
        tokio::time::advance(Duration::from_secs(61)).await;
        manager.ensure_connected().await.unwrap();
        tokio::time::advance(Duration::from_secs(30)).await;
        assert!(manager.ensure_connected().await.is_err());

        let err = executor
            .execute(&cancel, |conn| async move { conn.handle().get("k", TTL).await })
            .await
            .unwrap_err();

        assert!(matches!(err, CacheError::Unavailable { attempts: 3, .. }));
        // Every attempt ran on the old connection; nothing was dialled
        assert_eq!(connector.operation_count(), 3);
        assert_eq!(manager.stats().failed_reconnects, 1);
        assert_eq!(connector.connect_count(), 1);
    }

    #[test]
    fn test_blocking_retries() {
        let connector = InMemoryConnector::new();
        let manager = ConnectionManager::connect_blocking(connector.clone(), ReconnectConfig::default()).unwrap();
        let policy = RetryPolicy {
            max_retries: 2,
            retry_delay: Duration::from_millis(5),
        };
        let executor = RetryExecutor::new(Arc::new(manager), policy);

        connector.fail_next_operations(2);
        executor
            .execute_blocking(|handle| handle.set_blocking("k", b"v", TTL))
            .unwrap();

        connector.fail_next_operations(3);
        let err = executor
            .execute_blocking(|handle| handle.get_blocking("k", TTL))
            .unwrap_err();
        assert!(matches!(err, CacheError::Unavailable { attempts: 3, .. }));
    }
}
