//! # Product Catalog
//!
//! The business side of the service: the [`Product`] model, the source of record
//! it is loaded from, and [`CatalogService`], which serves the catalog through
//! the read-through cache.

pub mod product;
pub mod service;
pub mod source;

pub use product::Product;
pub use service::{CatalogService, CatalogServiceBuilder, CATALOG_KEY};
pub use source::{CatalogSource, SampleCatalogSource};
