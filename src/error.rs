use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("Database error: {0}")]
    Database(#[from] sea_orm::DbErr),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Insufficient balance: {0}")]
    InsufficientBalance(String),

    #[error("Duplicate request: {0}")]
    DuplicateRequest(String),

    #[error("Payment gateway error: {0}")]
    Gateway(String),

    #[error("Integrity violation: {0}")]
    Integrity(String),

    #[error("Daily limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Invalid token: {0}")]
    InvalidToken(String),

    #[error("Token expired")]
    ExpiredToken,

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    /// Stable machine-readable code, also stored in idempotency error snapshots
    pub fn code(&self) -> &'static str {
        match self {
            ApiError::Database(_) => "DATABASE_ERROR",
            ApiError::NotFound(_) => "NOT_FOUND",
            ApiError::Forbidden(_) => "FORBIDDEN",
            ApiError::InvalidState(_) => "INVALID_STATE",
            ApiError::InsufficientBalance(_) => "INSUFFICIENT_BALANCE",
            ApiError::DuplicateRequest(_) => "DUPLICATE_REQUEST",
            ApiError::Gateway(_) => "GATEWAY_ERROR",
            ApiError::Integrity(_) => "INTEGRITY_ERROR",
            ApiError::LimitExceeded(_) => "LIMIT_EXCEEDED",
            ApiError::BadRequest(_) => "BAD_REQUEST",
            ApiError::Unauthorized(_) => "UNAUTHORIZED",
            ApiError::InvalidToken(_) => "INVALID_TOKEN",
            ApiError::ExpiredToken => "TOKEN_EXPIRED",
            ApiError::RateLimitExceeded => "RATE_LIMIT_EXCEEDED",
            ApiError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// Whether a client may safely retry with the same idempotency key
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ApiError::DuplicateRequest(_) | ApiError::Gateway(_) | ApiError::Database(_)
        )
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.code();
        let (status, message) = match self {
            ApiError::Database(ref e) => {
                tracing::error!("Database error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal database error occurred".to_string(),
                )
            }
            ApiError::NotFound(ref msg) => (StatusCode::NOT_FOUND, msg.clone()),
            ApiError::Forbidden(ref msg) => (StatusCode::FORBIDDEN, msg.clone()),
            ApiError::InvalidState(ref msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::InsufficientBalance(ref msg) => {
                (StatusCode::UNPROCESSABLE_ENTITY, msg.clone())
            }
            ApiError::DuplicateRequest(ref msg) => (StatusCode::CONFLICT, msg.clone()),
            ApiError::Gateway(ref msg) => (StatusCode::PAYMENT_REQUIRED, msg.clone()),
            ApiError::Integrity(ref msg) => {
                // Never retried; operators must look at this
                tracing::error!(alert = true, "Integrity violation: {}", msg);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Request rejected due to an integrity violation".to_string(),
                )
            }
            ApiError::LimitExceeded(ref msg) => (StatusCode::TOO_MANY_REQUESTS, msg.clone()),
            ApiError::BadRequest(ref msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            ApiError::Unauthorized(ref msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::InvalidToken(ref msg) => (StatusCode::UNAUTHORIZED, msg.clone()),
            ApiError::ExpiredToken => (
                StatusCode::UNAUTHORIZED,
                "Access token has expired".to_string(),
            ),
            ApiError::RateLimitExceeded => (
                StatusCode::TOO_MANY_REQUESTS,
                "Too many requests, please try again later".to_string(),
            ),
            ApiError::Internal(ref e) => {
                tracing::error!("Internal error: {:?}", e);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_string(),
                )
            }
        };

        let body = json!({
            "success": false,
            "error": {
                "code": code,
                "message": message,
            }
        });

        (status, Json(body)).into_response()
    }
}

// Helper type for results
pub type Result<T> = std::result::Result<T, ApiError>;
