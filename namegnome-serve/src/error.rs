//! API error type mapping the shared taxonomy onto HTTP responses

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use namegnome_common::Error;
use serde_json::json;
use thiserror::Error as ThisError;

/// API error type
#[derive(Debug, ThisError)]
pub enum ApiError {
    /// Malformed request (422)
    #[error("Validation error: {0}")]
    Validation(String),

    /// Resource not found (404)
    #[error("Not found: {0}")]
    NotFound(String),

    /// Root lock held by another apply (423)
    #[error("Locked by {active_job_id}")]
    Locked {
        active_job_id: String,
        acquired_at: i64,
    },

    /// Plan no longer matches the filesystem (409)
    #[error("Stale plan: {0}")]
    Stale(String),

    /// Providers unreachable after retries (503)
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    /// Internal server error (500)
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        match err {
            Error::Validation(msg) => ApiError::Validation(msg),
            Error::Locked {
                active_job_id,
                acquired_at,
            } => ApiError::Locked {
                active_job_id,
                acquired_at,
            },
            Error::StalePlan(msg) => ApiError::Stale(msg),
            Error::ProviderUnavailable { provider, offline } => {
                ApiError::ProviderUnavailable(format!("{} (offline={})", provider, offline))
            }
            other => ApiError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, body) = match &self {
            ApiError::Validation(msg) => (
                StatusCode::UNPROCESSABLE_ENTITY,
                "VALIDATION_ERROR",
                json!({ "message": msg }),
            ),
            ApiError::NotFound(msg) => (
                StatusCode::NOT_FOUND,
                "NOT_FOUND",
                json!({ "message": msg }),
            ),
            ApiError::Locked {
                active_job_id,
                acquired_at,
            } => (
                StatusCode::LOCKED,
                "LOCKED",
                json!({
                    "message": "another apply holds this root",
                    "active_job_id": active_job_id,
                    "acquired_at": acquired_at,
                }),
            ),
            ApiError::Stale(msg) => (
                StatusCode::CONFLICT,
                "STALE_PLAN",
                json!({ "message": msg }),
            ),
            ApiError::ProviderUnavailable(msg) => (
                StatusCode::SERVICE_UNAVAILABLE,
                "PROVIDER_UNAVAILABLE",
                json!({ "message": msg }),
            ),
            ApiError::Internal(msg) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                json!({ "message": msg }),
            ),
        };

        let mut payload = json!({ "error": { "code": code } });
        if let (Some(error_obj), Some(extra)) = (
            payload.get_mut("error").and_then(|e| e.as_object_mut()),
            body.as_object(),
        ) {
            for (key, value) in extra {
                error_obj.insert(key.clone(), value.clone());
            }
        }

        (status, Json(payload)).into_response()
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
