//! API error responses
//!
//! Every failure surfaces as JSON `{error, code}` with a status the UI can
//! react to; storage failures are logged and collapsed into a generic 500.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;
use tracing::error;
use webscan_core::CoreError;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("unauthorized")]
    Unauthorized,

    #[error(transparent)]
    Core(#[from] CoreError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            ApiError::Unauthorized => (
                StatusCode::UNAUTHORIZED,
                "unauthorized",
                self.to_string(),
            ),
            ApiError::Core(core) => match core {
                CoreError::InvalidDomain => {
                    (StatusCode::BAD_REQUEST, "invalid_domain", core.to_string())
                }
                CoreError::QuotaExceeded(_) => (
                    StatusCode::TOO_MANY_REQUESTS,
                    "quota_exceeded",
                    core.to_string(),
                ),
                CoreError::BackendUnavailable(_) => (
                    StatusCode::SERVICE_UNAVAILABLE,
                    "backend_unavailable",
                    "Backend service unavailable".to_string(),
                ),
                CoreError::NotFound(_) => {
                    (StatusCode::NOT_FOUND, "not_found", core.to_string())
                }
                CoreError::InvalidPayload(_) => {
                    (StatusCode::BAD_REQUEST, "invalid_payload", core.to_string())
                }
                CoreError::InvalidSignature => (
                    StatusCode::BAD_REQUEST,
                    "invalid_signature",
                    core.to_string(),
                ),
                CoreError::Storage(detail) => {
                    error!(%detail, "storage error");
                    (
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "internal_error",
                        "Internal server error".to_string(),
                    )
                }
            },
        };

        (status, Json(json!({ "error": message, "code": code }))).into_response()
    }
}
