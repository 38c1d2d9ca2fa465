//! # Cache Stores Module
//!
//! The boundary to the remote key-value store. A [`StoreConnector`] knows how to
//! open a fresh connection; the resulting [`StoreHandle`] issues commands until it
//! is released. The connection manager only ever talks to these two traits, so a
//! Redis deployment and the in-memory store go through identical reconnect logic.
//!
//! Every operation exists in an async and a blocking form. They are separate
//! code paths over the same store, not wrappers around each other.

pub mod memory;
pub mod redis_store;

pub use memory::{InMemoryConnector, InMemoryHandle};
pub use redis_store::{RedisConnector, RedisHandle, RedisStoreConfig};

use super::CacheResult;
use async_trait::async_trait;
use std::time::Duration;

/// Commands against one live connection to the store.
///
/// Implementations must return [`CacheError::ConnectionReleased`](super::CacheError::ConnectionReleased)
/// for any command issued after [`StoreHandle::close`] so callers racing a
/// reconnect get a transient error instead of a silent failure.
#[async_trait]
pub trait StoreHandle: Send + Sync + 'static {
    /// Get the payload stored under `key`, restarting its sliding expiration window.
    ///
    /// `Ok(None)` means the key is absent, which is distinct from an empty payload.
    async fn get(&self, key: &str, sliding_expiration: Duration) -> CacheResult<Option<Vec<u8>>>;

    /// Store `value` under `key`, expiring after `sliding_expiration` without access
    async fn set(&self, key: &str, value: &[u8], sliding_expiration: Duration) -> CacheResult<()>;

    /// Delete `key`; deleting an absent key is not an error
    async fn delete(&self, key: &str) -> CacheResult<()>;

    /// Release the connection
    async fn close(&self) -> CacheResult<()>;

    fn get_blocking(&self, key: &str, sliding_expiration: Duration) -> CacheResult<Option<Vec<u8>>>;

    fn set_blocking(&self, key: &str, value: &[u8], sliding_expiration: Duration) -> CacheResult<()>;

    fn delete_blocking(&self, key: &str) -> CacheResult<()>;

    fn close_blocking(&self) -> CacheResult<()>;
}

/// Factory for brand-new store connections
#[async_trait]
pub trait StoreConnector: Send + Sync + 'static {
    type Handle: StoreHandle;

    /// Open a new connection to the store
    async fn connect(&self) -> CacheResult<Self::Handle>;

    /// Open a new connection to the store from a blocking context
    fn connect_blocking(&self) -> CacheResult<Self::Handle>;

    /// Human-readable description of the target, for logs
    fn describe(&self) -> String;
}
