use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::queue::QueueError;

/// Application-level error type.
/// Implements `IntoResponse` so Axum handlers can return `Result<T, AppError>`.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "NOT_FOUND", msg.clone()),
            AppError::Validation(msg) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR", msg.clone()),
            AppError::Conflict(msg) => (StatusCode::CONFLICT, "CONFLICT", msg.clone()),
            AppError::Database(e) => {
                tracing::error!("Database error: {e}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "DATABASE_ERROR",
                    "A database error occurred".to_string(),
                )
            }
            AppError::Internal(e) => {
                tracing::error!("Internal error: {e:?}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "INTERNAL_ERROR",
                    "An internal server error occurred".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message
            }
        }));

        (status, body).into_response()
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::EmptyBatch => AppError::Validation(err.to_string()),
            QueueError::UnknownBatch(_) | QueueError::UnknownUnit(_) => {
                AppError::NotFound(err.to_string())
            }
            QueueError::NotRetryable(..) => AppError::Conflict(err.to_string()),
        }
    }
}

/// Why one optimization unit attempt did not produce a result.
///
/// Recorded as the unit's error; never propagated to sibling units or the
/// batch aggregate. Serializable because broker workers send it back over Redis.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail", rename_all = "snake_case")]
pub enum OptimizationError {
    /// Backend, cache store or broker unreachable or rate-limited.
    #[error("transient backend error: {0}")]
    TransientBackend(String),

    /// Malformed subject or target payload.
    #[error("invalid input: {0}")]
    PermanentInput(String),

    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The unit's task panicked; caught at the unit boundary.
    #[error("worker panicked: {0}")]
    Panicked(String),

    #[error("cancelled before dispatch")]
    Cancelled,
}

impl OptimizationError {
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OptimizationError::TransientBackend(_)
                | OptimizationError::Timeout { .. }
                | OptimizationError::Panicked(_)
        )
    }

    /// Short machine-readable label for logs, the ledger and API payloads.
    pub fn code(&self) -> &'static str {
        match self {
            OptimizationError::TransientBackend(_) => "transient_backend",
            OptimizationError::PermanentInput(_) => "permanent_input",
            OptimizationError::Timeout { .. } => "timeout",
            OptimizationError::Panicked(_) => "panicked",
            OptimizationError::Cancelled => "cancelled",
        }
    }
}
