//! Error types for the delivery service
//!
//! Defines module-specific error types using thiserror for clear error propagation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

/// Main error type for the delivery service
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file loading errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Routing service errors (transient; callers fall back to the heuristic)
    #[error("Routing error: {0}")]
    Routing(String),

    /// Geocoding service errors (transient; callers treat as unresolved)
    #[error("Geocoding error: {0}")]
    Geocoding(String),

    /// Object store upload/delete errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Rejected operation, nothing was written
    #[error("Validation error: {0}")]
    Validation(String),

    /// Invalid state for operation (e.g. illegal status transition)
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Requested resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Other errors
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Convenience Result type using the service Error
pub type Result<T> = std::result::Result<T, Error>;

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = match &self {
            Error::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::InvalidState(_) => StatusCode::CONFLICT,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::Config(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({ "error": self.to_string() }));
        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_maps_to_422() {
        let resp = Error::Validation("too few stops".into()).into_response();
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[test]
    fn not_found_maps_to_404() {
        let resp = Error::NotFound("tour".into()).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
