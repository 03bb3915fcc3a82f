use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::time::Duration;
use thiserror::Error;

use crate::response::ErrorResponse;

/// Failure talking to the counter store.
///
/// Never surfaced to clients: admission fails open and telemetry logs and
/// drops it.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("counter store unavailable: {0}")]
    Unavailable(String),

    #[error("counter store call timed out after {0:?}")]
    Timeout(Duration),

    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Startup and process-level failures.
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("drain did not complete within {0:?}")]
    ShutdownTimeout(Duration),
}

pub type Result<T, E = GatewayError> = std::result::Result<T, E>;

/// Errors that become HTTP responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiError {
    RateLimitExceeded,
    Internal,
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::RateLimitExceeded => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            ApiError::RateLimitExceeded => "rate limit exceeded",
            ApiError::Internal => "Internal Server Error",
        }
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.message())
    }
}

impl std::error::Error for ApiError {}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut response = (self.status(), Json(ErrorResponse::new(self.message()))).into_response();
        // Marks the body as already safe for clients.
        response.extensions_mut().insert(self);
        response
    }
}
