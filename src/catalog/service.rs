//! # Catalog Service
//!
//! Serves the product catalog through the read-through cache. The whole
//! catalog is cached as one entry under [`CATALOG_KEY`].

use super::product::Product;
use super::source::CatalogSource;
use crate::caching::{CacheAsideStats, ReadThroughCache, StoreConnector};
use crate::core::error::{CatalogError, CatalogResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Cache key holding the serialized catalog
pub const CATALOG_KEY: &str = "ProductCatalog";

pub struct CatalogService<C: StoreConnector> {
    cache: ReadThroughCache<C>,
    source: Arc<dyn CatalogSource>,
    key: String,
}

impl<C: StoreConnector> Clone for CatalogService<C> {
    fn clone(&self) -> Self {
        Self {
            cache: self.cache.clone(),
            source: self.source.clone(),
            key: self.key.clone(),
        }
    }
}

impl<C: StoreConnector> CatalogService<C> {
    pub fn builder() -> CatalogServiceBuilder<C> {
        CatalogServiceBuilder::new()
    }

    /// The full catalog, from the cache when present, otherwise from the source
    #[instrument(skip(self, cancel), fields(key = %self.key))]
    pub async fn get_catalog(&self, cancel: &CancellationToken) -> CatalogResult<Vec<Product>> {
        let source = self.source.clone();
        let products: Vec<Product> = self
            .cache
            .get_or_populate(&self.key, || async move { source.load_catalog(cancel).await }, cancel)
            .await?;

        debug!(items = products.len(), "Catalog served");
        Ok(products)
    }

    /// Drop the cached catalog so the next read reloads it from the source
    pub async fn invalidate(&self, cancel: &CancellationToken) -> CatalogResult<()> {
        self.cache.cache().remove(&self.key, cancel).await?;
        Ok(())
    }

    pub fn cache(&self) -> &ReadThroughCache<C> {
        &self.cache
    }

    pub fn cache_stats(&self) -> CacheAsideStats {
        self.cache.stats()
    }
}

/// Builder for [`CatalogService`]; `build` fails if a dependency is missing
pub struct CatalogServiceBuilder<C: StoreConnector> {
    cache: Option<ReadThroughCache<C>>,
    source: Option<Arc<dyn CatalogSource>>,
    key: String,
}

impl<C: StoreConnector> Default for CatalogServiceBuilder<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: StoreConnector> CatalogServiceBuilder<C> {
    pub fn new() -> Self {
        Self {
            cache: None,
            source: None,
            key: CATALOG_KEY.to_string(),
        }
    }

    pub fn cache(mut self, cache: ReadThroughCache<C>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn source<S: CatalogSource + 'static>(mut self, source: S) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    pub fn shared_source(mut self, source: Arc<dyn CatalogSource>) -> Self {
        self.source = Some(source);
        self
    }

    /// Override the cache key (mostly useful to isolate tests sharing a store)
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.key = key.into();
        self
    }

    pub fn build(self) -> CatalogResult<CatalogService<C>> {
        let cache = self
            .cache
            .ok_or_else(|| CatalogError::config("CatalogService requires a cache"))?;
        let source = self
            .source
            .ok_or_else(|| CatalogError::config("CatalogService requires a catalog source"))?;
        if self.key.is_empty() {
            return Err(CatalogError::config("CatalogService key cannot be empty"));
        }

        Ok(CatalogService {
            cache,
            source,
            key: self.key,
        })
    }
}
