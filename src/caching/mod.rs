//! # Caching System Module
//!
//! Read-through caching on top of a remote key-value store, with a connection
//! layer that survives transient store outages.
//!
//! ## Architecture
//! The caching system is layered, each layer only talking to the one below it:
//! 1. **Cache-Aside** ([`ReadThroughCache`]): hit returns the cached value, miss
//!    computes it from a source and writes it back
//! 2. **Typed Adapter** ([`DistributedCache`]): serde_json encoding of typed values
//! 3. **Retry Executor** ([`RetryExecutor`]): bounded retries around every store call
//! 4. **Connection Manager** ([`ConnectionManager`]): the single shared connection
//!    and the rate-limited, error-threshold-gated reconnect
//! 5. **Stores**: Redis and in-memory implementations of the store boundary
//!
//! ## Usage Example
//! ```rust,ignore
//! use std::sync::Arc;
//! use catalog_cache::caching::{
//!     CacheEntryOptions, ConnectionManager, DistributedCache, ReadThroughCache,
//!     RetryExecutor, RetryPolicy, ReconnectConfig, RedisConnector,
//! };
//!
//! let connector = RedisConnector::new(redis_config)?;
//! let connection = Arc::new(ConnectionManager::connect(connector, ReconnectConfig::default()).await?);
//! let executor = RetryExecutor::new(connection.clone(), RetryPolicy::default());
//! let cache = ReadThroughCache::new(DistributedCache::new(executor, CacheEntryOptions::default()));
//!
//! let products: Vec<Product> = cache
//!     .get_or_populate("ProductCatalog", || async { load_products().await }, &cancel)
//!     .await?;
//! ```

pub mod adapter;
pub mod cache_aside;
pub mod connection;
pub mod retry;
pub mod stores;

pub use adapter::{CacheEntryOptions, DistributedCache};
pub use cache_aside::{CacheAsideStats, ReadThroughCache};
pub use connection::{
    ConnectionManager, ConnectionStats, ErrorWindow, LiveConnection, ReconnectConfig,
    ReconnectOutcome, SkipReason,
};
pub use retry::{RetryExecutor, RetryPolicy};
pub use stores::{
    InMemoryConnector, InMemoryHandle, RedisConnector, RedisHandle, RedisStoreConfig,
    StoreConnector, StoreHandle,
};

/// Cache operation result
pub type CacheResult<T> = Result<T, CacheError>;

/// Whether retrying an operation can be expected to fix a failure.
///
/// The retry executor only consults this tag, never the concrete variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Tied to connection state; a reconnect and another attempt may succeed
    Transient,
    /// Tied to the request itself; retrying gives the same answer
    Fatal,
}

/// Cache-specific error types
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Connection-level failure reported by the store client
    #[error("Cache connection error: {message}")]
    Connection { message: String },

    /// Socket failure underneath the store client
    #[error("Cache socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// An operation ran against a handle that was already released by a reconnect
    #[error("Cache connection handle was released")]
    ConnectionReleased,

    /// No usable connection handle could be obtained
    #[error("Cache connection unavailable: {reason}")]
    ConnectionUnavailable { reason: String },

    /// All attempts failed with transient errors
    #[error("Cache unavailable after {attempts} attempts: {source}")]
    Unavailable {
        attempts: u32,
        #[source]
        source: Box<CacheError>,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The store rejected the command (wrong type, bad arguments, ...)
    #[error("Cache store error: {message}")]
    Store { message: String },

    #[error("Cache operation timeout")]
    Timeout,

    #[error("Invalid cache key: {message}")]
    InvalidKey { message: String },

    #[error("Cache configuration error: {message}")]
    Configuration { message: String },

    #[error("Cache operation cancelled")]
    Cancelled,
}

impl CacheError {
    pub fn connection<S: Into<String>>(message: S) -> Self {
        Self::Connection {
            message: message.into(),
        }
    }

    pub fn connection_unavailable<S: Into<String>>(reason: S) -> Self {
        Self::ConnectionUnavailable {
            reason: reason.into(),
        }
    }

    pub fn store<S: Into<String>>(message: S) -> Self {
        Self::Store {
            message: message.into(),
        }
    }

    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Classify this error for the retry policy. Timeouts are fatal.
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::Connection { .. }
            | Self::Socket(_)
            | Self::ConnectionReleased
            | Self::ConnectionUnavailable { .. } => ErrorClass::Transient,
            Self::Unavailable { .. }
            | Self::Serialization(_)
            | Self::Store { .. }
            | Self::Timeout
            | Self::InvalidKey { .. }
            | Self::Configuration { .. }
            | Self::Cancelled => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }
}

impl From<redis::RedisError> for CacheError {
    fn from(err: redis::RedisError) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connection_refusal() || err.is_connection_dropped() || err.is_io_error() {
            Self::Connection {
                message: err.to_string(),
            }
        } else {
            Self::Store {
                message: err.to_string(),
            }
        }
    }
}
