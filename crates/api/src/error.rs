//! Application-level error type for HTTP handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use mediagen_jobs::{JobStoreError, LifecycleError};
use serde_json::json;

/// Wraps store/lifecycle errors and adds HTTP-specific variants.
/// Implements [`IntoResponse`] to produce consistent JSON error bodies.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Store(#[from] JobStoreError),

    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    /// A request that failed validation before doing any work.
    #[error("Validation failed: {0}")]
    Validation(String),
}

/// Convenience type alias for handler return values.
pub type AppResult<T> = Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::Store(store) => classify_store_error(store),
            AppError::Lifecycle(LifecycleError::Store(store)) => classify_store_error(store),
            AppError::Lifecycle(LifecycleError::Scheduler(err)) => {
                tracing::error!(error = %err, "Scheduler error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal error occurred".to_string(),
                )
            }
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone())
            }
        };

        let body = json!({
            "error": message,
            "code": code,
        });

        (status, axum::Json(body)).into_response()
    }
}

fn classify_store_error(err: &JobStoreError) -> (StatusCode, &'static str, String) {
    match err {
        JobStoreError::NotFound(id) => (
            StatusCode::NOT_FOUND,
            "NOT_FOUND",
            format!("Job {id} not found"),
        ),
        JobStoreError::AlreadyExists(id) => (
            StatusCode::CONFLICT,
            "CONFLICT",
            format!("Job {id} already exists"),
        ),
        JobStoreError::Backend(msg) => {
            tracing::error!(error = %msg, "Job store backend error");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                "An internal error occurred".to_string(),
            )
        }
    }
}
