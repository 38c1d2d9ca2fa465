//! # Redis Cache Store
//!
//! Redis implementation of the store boundary. A [`RedisHandle`] wraps one
//! `redis::Client` plus the channels opened from it: a multiplexed async
//! connection for async callers and a plain connection for blocking callers.
//! Whichever channel the connector was asked for is opened (and pinged) eagerly;
//! the other is opened on first use.
//!
//! Sliding expiration maps onto Redis as `SET key value EX ttl` on write and
//! `GETEX key EX ttl` on read, so every hit pushes the expiry forward.

use super::{StoreConnector, StoreHandle};
use crate::caching::{CacheError, CacheResult};
use async_trait::async_trait;
use parking_lot::Mutex;
use redis::aio::MultiplexedConnection;
use redis::{AsyncCommands, Client, Commands};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};

/// Redis store configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RedisStoreConfig {
    /// Redis connection URL
    pub url: String,

    /// Prefix applied to every key
    pub key_prefix: String,

    /// Timeout for establishing a connection
    #[serde(with = "humantime_serde")]
    pub connection_timeout: Duration,
}

impl Default for RedisStoreConfig {
    fn default() -> Self {
        Self {
            url: "redis://localhost:6379".to_string(),
            key_prefix: "catalog:".to_string(),
            connection_timeout: Duration::from_secs(5),
        }
    }
}

/// Opens connections to a Redis server
#[derive(Debug, Clone)]
pub struct RedisConnector {
    config: RedisStoreConfig,
    client: Client,
}

impl RedisConnector {
    /// Create a connector; the URL is validated here, nothing is dialled yet
    pub fn new(config: RedisStoreConfig) -> CacheResult<Self> {
        let client = Client::open(config.url.as_str())
            .map_err(|e| CacheError::configuration(format!("Invalid Redis URL: {}", e)))?;
        Ok(Self { config, client })
    }

    pub fn config(&self) -> &RedisStoreConfig {
        &self.config
    }

    fn new_handle(&self) -> RedisHandle {
        RedisHandle {
            client: self.client.clone(),
            key_prefix: self.config.key_prefix.clone(),
            connection_timeout: self.config.connection_timeout,
            multiplexed: OnceCell::new(),
            blocking: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl StoreConnector for RedisConnector {
    type Handle = RedisHandle;

    async fn connect(&self) -> CacheResult<RedisHandle> {
        let handle = self.new_handle();
        let mut connection = handle.multiplexed().await?;
        let mut ping = redis::cmd("PING");
        tokio::time::timeout(
            self.config.connection_timeout,
            ping.query_async::<_, String>(&mut connection),
        )
        .await
        .map_err(|_| CacheError::connection("timed out waiting for Redis PING"))??;
        info!("Redis cache connected to {}", self.config.url);
        Ok(handle)
    }

    fn connect_blocking(&self) -> CacheResult<RedisHandle> {
        let handle = self.new_handle();
        handle.with_blocking(|conn| redis::cmd("PING").query::<String>(conn))?;
        info!("Redis cache connected to {} (blocking)", self.config.url);
        Ok(handle)
    }

    fn describe(&self) -> String {
        self.config.url.clone()
    }
}

/// One logical connection to Redis
pub struct RedisHandle {
    client: Client,
    key_prefix: String,
    connection_timeout: Duration,
    multiplexed: OnceCell<MultiplexedConnection>,
    blocking: Mutex<Option<redis::Connection>>,
    released: AtomicBool,
}

impl RedisHandle {
    fn full_key(&self, key: &str) -> String {
        format!("{}{}", self.key_prefix, key)
    }

    fn ensure_open(&self) -> CacheResult<()> {
        if self.released.load(Ordering::SeqCst) {
            return Err(CacheError::ConnectionReleased);
        }
        Ok(())
    }

    /// Multiplexed connections are cheap to clone and safe to share
    async fn multiplexed(&self) -> CacheResult<MultiplexedConnection> {
        self.ensure_open()?;
        let connection = self
            .multiplexed
            .get_or_try_init(|| async {
                tokio::time::timeout(
                    self.connection_timeout,
                    self.client.get_multiplexed_async_connection(),
                )
                .await
                .map_err(|_| CacheError::connection("timed out connecting to Redis"))?
                .map_err(CacheError::from)
            })
            .await?;
        Ok(connection.clone())
    }

    /// Run `f` on the blocking connection, opening it first if needed.
    ///
    /// The connection is dropped after a transient failure so a broken socket is
    /// never reused.
    fn with_blocking<T, F>(&self, f: F) -> CacheResult<T>
    where
        F: FnOnce(&mut redis::Connection) -> redis::RedisResult<T>,
    {
        self.ensure_open()?;
        let mut slot = self.blocking.lock();
        if slot.is_none() {
            let connection = self
                .client
                .get_connection_with_timeout(self.connection_timeout)?;
            connection.set_read_timeout(Some(self.connection_timeout))?;
            connection.set_write_timeout(Some(self.connection_timeout))?;
            *slot = Some(connection);
        }

        let result = match slot.as_mut() {
            Some(connection) => f(connection).map_err(CacheError::from),
            None => Err(CacheError::connection_unavailable("blocking connection missing")),
        };

        if matches!(&result, Err(e) if e.is_transient()) {
            *slot = None;
        }
        result
    }
}

#[async_trait]
impl StoreHandle for RedisHandle {
    async fn get(&self, key: &str, sliding_expiration: Duration) -> CacheResult<Option<Vec<u8>>> {
        let mut conn = self.multiplexed().await?;
        let value: Option<Vec<u8>> = redis::cmd("GETEX")
            .arg(self.full_key(key))
            .arg("EX")
            .arg(sliding_expiration.as_secs().max(1))
            .query_async(&mut conn)
            .await?;

        debug!(key, hit = value.is_some(), "Redis GETEX");
        Ok(value)
    }

    async fn set(&self, key: &str, value: &[u8], sliding_expiration: Duration) -> CacheResult<()> {
        let mut conn = self.multiplexed().await?;
        redis::cmd("SET")
            .arg(self.full_key(key))
            .arg(value)
            .arg("EX")
            .arg(sliding_expiration.as_secs().max(1))
            .query_async::<_, ()>(&mut conn)
            .await?;

        debug!(key, ttl = ?sliding_expiration, "Redis SET");
        Ok(())
    }

    async fn delete(&self, key: &str) -> CacheResult<()> {
        let mut conn = self.multiplexed().await?;
        conn.del::<_, ()>(self.full_key(key)).await?;
        Ok(())
    }

    async fn close(&self) -> CacheResult<()> {
        self.close_blocking()
    }

    fn get_blocking(&self, key: &str, sliding_expiration: Duration) -> CacheResult<Option<Vec<u8>>> {
        let full_key = self.full_key(key);
        self.with_blocking(|conn| {
            redis::cmd("GETEX")
                .arg(&full_key)
                .arg("EX")
                .arg(sliding_expiration.as_secs().max(1))
                .query(conn)
        })
    }

    fn set_blocking(&self, key: &str, value: &[u8], sliding_expiration: Duration) -> CacheResult<()> {
        let full_key = self.full_key(key);
        self.with_blocking(|conn| {
            redis::cmd("SET")
                .arg(&full_key)
                .arg(value)
                .arg("EX")
                .arg(sliding_expiration.as_secs().max(1))
                .query::<()>(conn)
        })
    }

    fn delete_blocking(&self, key: &str) -> CacheResult<()> {
        let full_key = self.full_key(key);
        self.with_blocking(|conn| conn.del::<_, ()>(&full_key))
    }

    /// Marks the handle released and drops the blocking connection. The
    /// multiplexed connection closes once the last clone of it is dropped.
    fn close_blocking(&self) -> CacheResult<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Err(CacheError::ConnectionReleased);
        }
        self.blocking.lock().take();
        Ok(())
    }
}
