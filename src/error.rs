//! Shared error categories.
//!
//! Each subsystem boundary gets its own `thiserror`-derived enum (store,
//! ingest, model I/O); `AppError` is the top-level error surfaced by the
//! HTTP layer and implements [`axum::response::IntoResponse`] directly so
//! handlers can just `?` their way out.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced by the block store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("pool error: {0}")]
    Pool(String),
}

/// Errors surfaced while building or loading a classifier model.
#[derive(Debug, thiserror::Error)]
pub enum ModelError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed model file: {0}")]
    Malformed(String),
    #[error("unsupported model file version: {0}")]
    UnsupportedVersion(u16),
    #[error("training data error: {0}")]
    Training(String),
}

/// Errors surfaced by the ingest pipeline (listener + backfiller).
#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("upstream returned malformed data: {0}")]
    Decode(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Top-level error type returned by HTTP handlers.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// JSON decode failure or a record missing required fields.
    #[error("malformed input: {0}")]
    MalformedInput(String),
    /// A record's slot precedes every known classifier range.
    #[error("no classifier for slot {0}")]
    NoClassifierForSlot(u64),
    /// Persistence failure other than a unique-constraint violation.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// `DISABLE_CLASSIFIER` is set; classification endpoints are unavailable.
    #[error("classifier is disabled on this server")]
    ClassifierDisabled,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::MalformedInput(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::NoClassifierForSlot(slot) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("no classifier known for slot {slot}"),
            ),
            AppError::Store(e) => {
                tracing::error!(error = %e, "store error handling request");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "internal store error".to_string(),
                )
            }
            AppError::ClassifierDisabled => (
                StatusCode::SERVICE_UNAVAILABLE,
                "classifier is disabled on this server".to_string(),
            ),
        };
        (status, Json(json!({ "error": message }))).into_response()
    }
}
