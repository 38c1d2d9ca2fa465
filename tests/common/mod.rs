//! Shared helpers for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use catalog_cache::caching::{
    CacheEntryOptions, CacheResult, ConnectionManager, DistributedCache, InMemoryConnector,
    InMemoryHandle, ReadThroughCache, ReconnectConfig, RetryExecutor, RetryPolicy, StoreConnector,
};
use catalog_cache::catalog::{CatalogService, CatalogSource, Product, SampleCatalogSource};
use catalog_cache::core::error::CatalogResult;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;

/// Catalog source that counts how often it is asked to load
#[derive(Clone, Default)]
pub struct CountingSource {
    inner: SampleCatalogSource,
    calls: Arc<AtomicUsize>,
}

impl CountingSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSource for CountingSource {
    async fn load_catalog(&self, cancel: &CancellationToken) -> CatalogResult<Vec<Product>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.load_catalog(cancel).await
    }
}

/// In-memory connector whose async `connect` can be held open.
///
/// While gated, `connect` signals [`GatedConnector::wait_until_connecting`] and
/// then blocks until [`GatedConnector::release`] is called.
#[derive(Clone)]
pub struct GatedConnector {
    inner: InMemoryConnector,
    gated: Arc<AtomicBool>,
    gate: Arc<Semaphore>,
    connecting: Arc<Notify>,
}

impl GatedConnector {
    pub fn new(inner: InMemoryConnector) -> Self {
        Self {
            inner,
            gated: Arc::new(AtomicBool::new(false)),
            gate: Arc::new(Semaphore::new(0)),
            connecting: Arc::new(Notify::new()),
        }
    }

    pub fn inner(&self) -> &InMemoryConnector {
        &self.inner
    }

    pub fn close_gate(&self) {
        self.gated.store(true, Ordering::SeqCst);
    }

    pub async fn wait_until_connecting(&self) {
        self.connecting.notified().await;
    }

    pub fn release(&self) {
        self.gated.store(false, Ordering::SeqCst);
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl StoreConnector for GatedConnector {
    type Handle = InMemoryHandle;

    async fn connect(&self) -> CacheResult<InMemoryHandle> {
        if self.gated.load(Ordering::SeqCst) {
            self.connecting.notify_one();
            if let Ok(permit) = self.gate.acquire().await {
                permit.forget();
            }
        }
        self.inner.connect().await
    }

    fn connect_blocking(&self) -> CacheResult<InMemoryHandle> {
        self.inner.connect_blocking()
    }

    fn describe(&self) -> String {
        "memory://gated".to_string()
    }
}

/// Full cache stack over `connector` with default timings
pub async fn read_through<C: StoreConnector>(connector: C) -> (Arc<ConnectionManager<C>>, ReadThroughCache<C>) {
    let manager = Arc::new(
        ConnectionManager::connect(connector, ReconnectConfig::default())
            .await
            .expect("initial connect"),
    );
    let executor = RetryExecutor::new(manager.clone(), RetryPolicy::default());
    let cache = ReadThroughCache::new(DistributedCache::new(executor, CacheEntryOptions::default()));
    (manager, cache)
}

pub async fn catalog_service(
    connector: &InMemoryConnector,
    source: CountingSource,
) -> (Arc<ConnectionManager<InMemoryConnector>>, CatalogService<InMemoryConnector>) {
    let (manager, cache) = read_through(connector.clone()).await;
    let service = CatalogService::builder()
        .cache(cache)
        .source(source)
        .build()
        .expect("catalog service");
    (manager, service)
}
