//! Sources of record for the product catalog

use super::product::Product;
use crate::core::error::{CatalogError, CatalogResult};
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use tokio_util::sync::CancellationToken;

/// Loads the full catalog from wherever it really lives.
///
/// Called only on a cache miss. Implementations should be idempotent: two
/// concurrent misses may both call it.
#[async_trait]
pub trait CatalogSource: Send + Sync {
    async fn load_catalog(&self, cancel: &CancellationToken) -> CatalogResult<Vec<Product>>;
}

/// Fixed catalog of sample items
#[derive(Debug, Clone)]
pub struct SampleCatalogSource {
    items: usize,
}

impl SampleCatalogSource {
    pub const DEFAULT_ITEMS: usize = 20;

    pub fn new() -> Self {
        Self::with_items(Self::DEFAULT_ITEMS)
    }

    pub fn with_items(items: usize) -> Self {
        Self { items }
    }
}

impl Default for SampleCatalogSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogSource for SampleCatalogSource {
    async fn load_catalog(&self, cancel: &CancellationToken) -> CatalogResult<Vec<Product>> {
        if cancel.is_cancelled() {
            return Err(CatalogError::Cancelled);
        }

        // 45.0, scale kept so it renders as "45.0"
        let price = BigDecimal::new(450.into(), 1);
        let products = (1..=self.items)
            .map(|n| {
                Product::new(
                    format!("product-{}-sku", n),
                    format!("product-{}", n),
                    format!("description-{}", n),
                    price.clone(),
                )
            })
            .collect();

        Ok(products)
    }
}
