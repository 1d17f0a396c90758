//! Error handling for the frame ingest server

use crate::bus_ingest::BusClosed;
use crate::frame_schema::ValidationError;
use crate::frame_store::StoreError;
use crate::reprocess::ReprocessError;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;

/// Error types
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Stored payload cannot be parsed
    #[error("Malformed raw message: {0}")]
    MalformedRaw(String),

    /// Bad request parameters
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Ingest worker unavailable
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// SQLx database error
    #[error("SQLx error: {0}")]
    Sqlx(#[from] sqlx::Error),
}

impl From<StoreError> for Error {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Sqlx(e) => Error::Sqlx(e),
        }
    }
}

impl From<ValidationError> for Error {
    fn from(e: ValidationError) -> Self {
        Error::Validation(e.to_string())
    }
}

impl From<ReprocessError> for Error {
    fn from(e: ReprocessError) -> Self {
        match e {
            ReprocessError::NotFound(id) => Error::NotFound(format!("raw message {}", id)),
            ReprocessError::MalformedRaw(msg) => Error::MalformedRaw(msg),
            ReprocessError::Validation(e) => e.into(),
            ReprocessError::Store(e) => e.into(),
        }
    }
}

impl From<BusClosed> for Error {
    fn from(e: BusClosed) -> Self {
        Error::Unavailable(e.to_string())
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status, error_code, message) = match &self {
            Error::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            Error::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            Error::MalformedRaw(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "MALFORMED_RAW",
                msg.clone(),
            ),
            Error::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),
            Error::Unavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "UNAVAILABLE",
                msg.clone(),
            ),
            Error::Http(e) => (StatusCode::BAD_GATEWAY, "HTTP_ERROR", e.to_string()),
            Error::Sqlx(e) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                e.to_string(),
            ),
        };

        if status.is_server_error() {
            tracing::error!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request error"
            );
        } else {
            tracing::warn!(
                status = %status,
                error_code = %error_code,
                message = %message,
                "Request rejected"
            );
        }

        let body = Json(json!({
            "error_code": error_code,
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reprocess_error_status_mapping() {
        let cases = [
            (ReprocessError::NotFound(9), StatusCode::NOT_FOUND),
            (
                ReprocessError::MalformedRaw("eof".into()),
                StatusCode::UNPROCESSABLE_ENTITY,
            ),
            (
                ReprocessError::Validation(ValidationError::new(
                    "cam_id",
                    crate::frame_schema::ValidationIssue::Missing,
                )),
                StatusCode::BAD_REQUEST,
            ),
        ];
        for (err, expected) in cases {
            let response = Error::from(err).into_response();
            assert_eq!(response.status(), expected);
        }
    }

    #[test]
    fn test_bus_closed_is_unavailable() {
        let response = Error::from(BusClosed).into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
