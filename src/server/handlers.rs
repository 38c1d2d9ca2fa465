use super::AppState;
use crate::caching::StoreConnector;
use crate::catalog::Product;
use crate::core::error::{CatalogError, CatalogResult};
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::error;

/// `GET /api/products`
///
/// The lookup runs in its own task. If the client disconnects, the handler
/// future is dropped, the guard cancels the token and the lookup stops at its
/// next wait between attempts instead of being torn down mid-request.
pub async fn get_products<C: StoreConnector>(
    State(state): State<AppState<C>>,
) -> CatalogResult<Json<Vec<Product>>> {
    let cancel = CancellationToken::new();
    let _cancel_on_drop = cancel.clone().drop_guard();

    let catalog = state.catalog.clone();
    let products = tokio::spawn(async move { catalog.get_catalog(&cancel).await })
        .await
        .map_err(|e| {
            error!("Catalog lookup task failed: {}", e);
            CatalogError::internal("catalog lookup task failed")
        })??;

    Ok(Json(products))
}

/// `GET /health`
pub async fn health<C: StoreConnector>(State(state): State<AppState<C>>) -> impl IntoResponse {
    let connection = state.connection.stats();
    let status = if connection.connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": if connection.connected { "healthy" } else { "unhealthy" },
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "version": env!("CARGO_PKG_VERSION"),
        "store": state.connection.connector().describe(),
        "connection": connection,
        "cache": state.catalog.cache_stats(),
    });

    (status, Json(body))
}
