//! # Catalog Cache - Core Library Crate
//!
//! Read-through caching of a product catalog over a remote key-value store
//! (Redis in production, an in-memory store for development and tests).
//!
//! ## Layers
//! - `caching::connection`: owns the shared store connection and decides when
//!   a reconnect is warranted (rate limit, sustained-error window, bounded guard)
//! - `caching::retry`: bounded retries of store operations with transient/fatal
//!   classification
//! - `caching::adapter`: typed get/set/remove of serde values with sliding expiration
//! - `caching::cache_aside`: `get_or_populate` on top of the adapter
//! - `catalog`: the product catalog served through the cache
//! - `server`: the axum HTTP surface
//!
//! Every cache operation is available both as an async function and as a
//! blocking `_blocking` variant.

/// Core functionality: error types and configuration
pub mod core;

/// Store connections, retries, the typed cache and the cache-aside service
pub mod caching;

/// Product model, catalog sources and the catalog service
pub mod catalog;

/// Structured logging
pub mod observability;

/// HTTP server and handlers
pub mod server;

/// Main error type used throughout the service
pub use crate::core::error::{CatalogError, CatalogResult};

/// Service configuration
pub use crate::core::config::AppConfig;

pub use caching::{CacheError, CacheResult};
pub use catalog::{CatalogService, CatalogSource, Product, SampleCatalogSource};
pub use server::{AppState, CatalogServer};
