//! # Catalog Cache - Main Entry Point
//!
//! Serves the product catalog over HTTP, read through a Redis (or in-memory)
//! cache.
//!
//! Startup sequence:
//! 1. Load configuration (`CATALOG_CONFIG_PATH`, then `CATALOG_*` overrides)
//! 2. Initialize structured logging
//! 3. Connect to the store eagerly; an unreachable store fails startup
//! 4. Serve until SIGINT/SIGTERM, drain in-flight requests, release the connection

use anyhow::Context;
use catalog_cache::caching::{InMemoryConnector, RedisConnector, StoreConnector};
use catalog_cache::core::config::{AppConfig, CacheBackend};
use catalog_cache::observability::init_logging;
use catalog_cache::{AppState, CatalogServer, SampleCatalogSource};
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::load().await.context("Failed to load configuration")?;
    init_logging(&config.logging);

    info!("Starting catalog-cache");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let result = match config.cache.backend {
        CacheBackend::Redis => {
            let connector = RedisConnector::new(config.cache.redis_store_config())
                .context("Invalid Redis configuration")?;
            run(connector, &config).await
        }
        CacheBackend::Memory => {
            info!("Using the in-memory cache store");
            run(InMemoryConnector::new(), &config).await
        }
    };

    if let Err(ref e) = result {
        error!("catalog-cache terminated with error: {:#}", e);
    }
    result
}

async fn run<C: StoreConnector>(connector: C, config: &AppConfig) -> anyhow::Result<()> {
    let state = AppState::build(connector, config, SampleCatalogSource::new())
        .await
        .context("Failed to initialize the catalog cache")?;
    let connection = state.connection.clone();

    let server = CatalogServer::bind(&config.server.listen_address(), state).await?;
    server.serve(shutdown_signal()).await?;

    connection.shutdown().await;
    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("Failed to install SIGINT handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, initiating graceful shutdown"),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown"),
    }
}
