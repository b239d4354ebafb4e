use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Errors raised by the cache layer.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Another owner currently holds the named lock.
    #[error("LOCK_NOT_ACQUIRED: {0}")]
    LockNotAcquired(String),

    #[error("Cache store error: {0}")]
    Store(String),
}

impl CacheError {
    pub fn is_lock_not_acquired(&self) -> bool {
        matches!(self, CacheError::LockNotAcquired(_))
    }
}

/// Common error types used across the application.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Too many requests: {0}")]
    TooManyRequests(String),

    #[error("Internal error: {0}")]
    Internal(String),

    /// Explicit status with an optional details string for the client.
    #[error("{message}")]
    Http {
        status: StatusCode,
        message: String,
        details: Option<String>,
    },
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Cache(CacheError::LockNotAcquired(_)) => StatusCode::CONFLICT,
            AppError::Cache(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Auth(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::TooManyRequests(_) => StatusCode::TOO_MANY_REQUESTS,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Http { status, .. } => *status,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "Request failed with an internal error");
        }

        let (message, details) = match self {
            AppError::Cache(CacheError::LockNotAcquired(key)) => (
                "Resource is busy, try again shortly".to_string(),
                Some(key),
            ),
            AppError::Database(_) | AppError::Cache(_) => {
                ("Internal server error".to_string(), None)
            }
            AppError::Config(msg)
            | AppError::Auth(msg)
            | AppError::NotFound(msg)
            | AppError::Validation(msg)
            | AppError::TooManyRequests(msg)
            | AppError::Internal(msg) => (msg, None),
            AppError::Http {
                message, details, ..
            } => (message, details),
        };

        let body = json!({ "error": message, "details": details });
        (status, Json(body)).into_response()
    }
}
