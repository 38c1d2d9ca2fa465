//! # HTTP Server
//!
//! Exposes the catalog over HTTP with axum:
//! - `GET /api/products` returns the catalog as JSON
//! - `GET /health` reports the store connection and cache statistics
//!
//! Requests are traced with tower-http's `TraceLayer`.

pub mod handlers;

use crate::caching::{ConnectionManager, DistributedCache, ReadThroughCache, RetryExecutor, StoreConnector};
use crate::catalog::{CatalogService, CatalogSource};
use crate::core::config::AppConfig;
use crate::core::error::{CatalogError, CatalogResult};
use axum::routing::get;
use axum::Router;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, instrument};

/// Shared handler state
pub struct AppState<C: StoreConnector> {
    pub catalog: CatalogService<C>,
    pub connection: Arc<ConnectionManager<C>>,
}

impl<C: StoreConnector> Clone for AppState<C> {
    fn clone(&self) -> Self {
        Self {
            catalog: self.catalog.clone(),
            connection: self.connection.clone(),
        }
    }
}

impl<C: StoreConnector> AppState<C> {
    pub fn new(catalog: CatalogService<C>, connection: Arc<ConnectionManager<C>>) -> Self {
        Self { catalog, connection }
    }

    /// Wire the whole cache stack from configuration.
    ///
    /// Connects eagerly, so an unreachable store fails startup.
    pub async fn build<S>(connector: C, config: &AppConfig, source: S) -> CatalogResult<Self>
    where
        S: CatalogSource + 'static,
    {
        let connection = Arc::new(ConnectionManager::connect(connector, config.reconnect.clone()).await?);
        let executor = RetryExecutor::new(connection.clone(), config.retry.clone());
        let cache = ReadThroughCache::new(DistributedCache::new(executor, config.cache.entry_options()));

        let catalog = CatalogService::builder().cache(cache).source(source).build()?;
        Ok(Self::new(catalog, connection))
    }
}

/// Build the application router
pub fn router<C: StoreConnector>(state: AppState<C>) -> Router {
    Router::new()
        .route("/api/products", get(handlers::get_products::<C>))
        .route("/api/Products", get(handlers::get_products::<C>))
        .route("/health", get(handlers::health::<C>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct CatalogServer {
    app: Router,
    listener: TcpListener,
}

impl CatalogServer {
    /// Bind the listener; requests are not served until [`CatalogServer::serve`]
    pub async fn bind<C: StoreConnector>(address: &str, state: AppState<C>) -> CatalogResult<Self> {
        let listener = TcpListener::bind(address)
            .await
            .map_err(|e| CatalogError::internal(format!("Failed to bind server to {}: {}", address, e)))?;

        Ok(Self {
            app: router(state),
            listener,
        })
    }

    pub fn local_addr(&self) -> CatalogResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Serve until `shutdown` resolves, then let in-flight requests finish
    #[instrument(skip_all)]
    pub async fn serve<F>(self, shutdown: F) -> CatalogResult<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!("Catalog HTTP server listening on {}", self.local_addr()?);

        axum::serve(self.listener, self.app)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| CatalogError::internal(format!("Server error: {}", e)))?;

        info!("Catalog HTTP server stopped");
        Ok(())
    }
}
