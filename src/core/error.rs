//! # Error Handling Module
//!
//! Application-level errors for the catalog service, built with `thiserror`.
//! Store-level failures are [`CacheError`]s; they are folded into
//! [`CatalogError`] at the service boundary, where they also get an HTTP status.
//!
//! ## Mapping to HTTP
//! - Cache unreachable after retries → `503 Service Unavailable`
//! - Catalog source failures → `502 Bad Gateway`
//! - Everything else → `500 Internal Server Error`
//!
//! Responses carry a JSON body of the form
//! `{"error": {"code", "message", "type", "retryable"}}`.

use crate::caching::CacheError;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main result type used throughout the service
pub type CatalogResult<T> = Result<T, CatalogError>;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// Configuration-related errors (invalid config, unreadable file, ...)
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// The cache store could not be reached, even after retries
    #[error("Cache unavailable: {0}")]
    CacheUnavailable(#[source] CacheError),

    /// Any other cache failure (malformed payload, rejected command, ...)
    #[error("Cache error: {0}")]
    Cache(#[source] CacheError),

    /// The catalog source of record failed
    #[error("Catalog source error: {message}")]
    Source { message: String },

    /// The caller went away
    #[error("Request cancelled")]
    Cancelled,

    #[error("Internal server error: {message}")]
    Internal { message: String },

    #[error("I/O error: {message}")]
    Io { message: String },
}

impl CatalogError {
    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Failure of a [`CatalogSource`](crate::catalog::CatalogSource) implementation
    pub fn source_failure<S: Into<String>>(message: S) -> Self {
        Self::Source {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::CacheUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Source { .. } => StatusCode::BAD_GATEWAY,
            // Non-standard "client closed request"; never seen by the client anyway
            Self::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Self::Configuration { .. }
            | Self::Cache(_)
            | Self::Internal { .. }
            | Self::Io { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the client may reasonably retry the request later
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::CacheUnavailable(_) | Self::Source { .. })
    }

    pub fn error_type(&self) -> &'static str {
        match self {
            Self::Configuration { .. } => "configuration_error",
            Self::CacheUnavailable(_) => "cache_unavailable",
            Self::Cache(_) => "cache_error",
            Self::Source { .. } => "catalog_source_error",
            Self::Cancelled => "cancelled",
            Self::Internal { .. } => "internal_error",
            Self::Io { .. } => "io_error",
        }
    }
}

impl From<CacheError> for CatalogError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::Cancelled => Self::Cancelled,
            CacheError::Configuration { message } => Self::Configuration { message },
            err if err.is_transient() || matches!(err, CacheError::Unavailable { .. }) => {
                Self::CacheUnavailable(err)
            }
            err => Self::Cache(err),
        }
    }
}

impl From<std::io::Error> for CatalogError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
        }
    }
}

impl IntoResponse for CatalogError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        let error_response = json!({
            "error": {
                "code": status.as_u16(),
                "message": self.to_string(),
                "type": self.error_type(),
                "retryable": self.is_retryable(),
            }
        });

        (status, Json(error_response)).into_response()
    }
}
