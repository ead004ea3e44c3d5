//! API error type and its JSON rendering

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use cardtrack_common::Error;
use serde_json::json;
use thiserror::Error;
use tracing::error;

#[derive(Debug, Error)]
pub enum ApiError {
    /// Malformed request that never reached a component (400)
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// Failure reported by a component
    #[error(transparent)]
    Core(#[from] Error),
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    fn status_and_code(&self) -> (StatusCode, &'static str) {
        match self {
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Core(err) => match err {
                Error::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                Error::InvalidAssignee(_) => (StatusCode::BAD_REQUEST, "INVALID_ASSIGNEE"),
                Error::Unauthenticated(_) => (StatusCode::UNAUTHORIZED, "UNAUTHENTICATED"),
                Error::Permission(_) => (StatusCode::FORBIDDEN, "PERMISSION_DENIED"),
                Error::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                Error::NoData(_) => (StatusCode::NOT_FOUND, "NO_DATA"),
                Error::DuplicateKey(_) => (StatusCode::CONFLICT, "DUPLICATE_KEY"),
                Error::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
                Error::Database(_) => (StatusCode::INTERNAL_SERVER_ERROR, "DATABASE_ERROR"),
                Error::Io(_) | Error::Json(_) | Error::Config(_) | Error::Internal(_) => {
                    (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
                }
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = self.status_and_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }

        let body = Json(json!({
            "error": {
                "code": code,
                "message": self.to_string(),
            }
        }));

        (status, body).into_response()
    }
}
