//! Control API errors.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use thiserror::Error;

/// Errors returned by the control API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The session has already terminated; there is nothing to shut down.
    #[error("Sandbox already terminated")]
    AlreadyTerminated,

    /// The control listener could not be bound.
    #[error("Failed to bind control API on {addr}: {reason}")]
    Bind { addr: String, reason: String },

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ApiError {
    /// Machine-readable error code used in JSON bodies.
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::AlreadyTerminated => "already_terminated",
            ApiError::Bind { .. } => "bind_failed",
            ApiError::Io(_) => "io_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::AlreadyTerminated => StatusCode::CONFLICT,
            ApiError::Bind { .. } | ApiError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = serde_json::json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (self.status(), Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_terminated_is_conflict() {
        let err = ApiError::AlreadyTerminated;
        assert_eq!(err.status(), StatusCode::CONFLICT);
        assert_eq!(err.code(), "already_terminated");
        assert_eq!(err.to_string(), "Sandbox already terminated");
    }

    #[test]
    fn test_bind_error_display() {
        let err = ApiError::Bind {
            addr: "127.0.0.1:7070".to_string(),
            reason: "address in use".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Failed to bind control API on 127.0.0.1:7070: address in use"
        );
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[test]
    fn test_into_response_status() {
        let response = ApiError::AlreadyTerminated.into_response();
        assert_eq!(response.status(), StatusCode::CONFLICT);
    }
}
