//! services/api/src/error.rs
//!
//! Defines the primary error type for the entire API service, plus its
//! mapping onto HTTP responses. Transient generation failures carry a
//! `retryable` flag and a suggested wait so clients can back off sensibly.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use crate::config::ConfigError;
use medquiz_core::ports::PortError;

/// The primary error type for the `api` service.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// An error that occurred during configuration loading.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An error that propagated up from one of the core service ports.
    #[error("Service port error: {0}")]
    Port(#[from] PortError),

    /// An error from the underlying database library.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A standard Input/Output error (e.g., binding to a network socket).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A malformed incoming request (missing header, bad id format).
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// A catch-all for any other unexpected errors.
    #[error("An unexpected internal error occurred: {0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, retryable, retry_after_ms, message) = match &self {
            ApiError::Port(PortError::NotFound(msg)) => {
                (StatusCode::NOT_FOUND, false, None, msg.clone())
            }
            ApiError::Port(PortError::ContentUnavailable(msg)) => {
                (StatusCode::UNPROCESSABLE_ENTITY, false, None, msg.clone())
            }
            ApiError::Port(PortError::RateLimited { retry_after_ms }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                true,
                Some(*retry_after_ms),
                self.to_string(),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, false, None, msg.clone()),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                false,
                None,
                self.to_string(),
            ),
        };

        let mut body = json!({
            "error": message,
            "code": status.as_u16(),
            "retryable": retryable,
        });
        if let Some(ms) = retry_after_ms {
            body["retry_after_ms"] = json!(ms);
        }

        (status, Json(body)).into_response()
    }
}
