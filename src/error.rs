use axum::{
    extract::rejection::{JsonRejection, PathRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    /// Malformed input. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// The state machine refuses the requested transition.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Not found: {0}")]
    NotFound(String),

    /// The idempotency key already maps to a payment. Callers recover by
    /// replaying the recorded response; this only surfaces as a 409 if a
    /// handler fails to do so.
    #[error("Idempotency key already used")]
    DuplicateKey,

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Canonical user-facing messages, shared between handlers and tests.
pub mod msg {
    pub const PAYMENT_NOT_FOUND: &str = "Payment not found";
    pub const WEBHOOK_NOT_FOUND: &str = "Webhook not found";
    pub const PAYMENT_ALREADY_EXISTS: &str = "Payment already exists";
    pub const AMOUNT_NOT_POSITIVE: &str = "amount must be greater than zero";
    pub const AMOUNT_EXCEEDS_REMAINING: &str = "refund amount exceeds remaining balance";
    pub const EMAIL_REQUIRED: &str = "customer_email is required";
    pub const CURRENCY_INVALID: &str = "currency must be a 3-letter code";
    pub const URL_INVALID: &str = "url must start with http:// or https://";
    pub const EVENTS_REQUIRED: &str = "events must list at least one event type";
    pub const PAYMENT_NOT_REFUNDABLE: &str =
        "payment must be completed or partially refunded to accept a refund";
}

/// Extension for the common `Option -> NotFound` pattern in handlers.
pub trait OptionExt<T> {
    fn or_not_found(self, message: &str) -> Result<T>;
}

impl<T> OptionExt<T> for Option<T> {
    fn or_not_found(self, message: &str) -> Result<T> {
        self.ok_or_else(|| AppError::NotFound(message.to_string()))
    }
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(format!("Invalid request body: {}", rejection.body_text()))
    }
}

impl From<PathRejection> for AppError {
    fn from(rejection: PathRejection) -> Self {
        AppError::Validation(format!("Invalid path parameter: {}", rejection.body_text()))
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    details: Option<String>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error, details) = match &self {
            AppError::Validation(msg) => {
                (StatusCode::BAD_REQUEST, "Validation failed", Some(msg.clone()))
            }
            AppError::InvalidState(msg) => {
                (StatusCode::BAD_REQUEST, "Invalid state", Some(msg.clone()))
            }
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, "Not found", Some(msg.clone())),
            AppError::DuplicateKey => (
                StatusCode::CONFLICT,
                "Conflict",
                Some("Idempotency key already used".to_string()),
            ),
            AppError::Database(e) => {
                tracing::error!("Database error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Pool(e) => {
                tracing::error!("Pool error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Json(e) => {
                tracing::error!("JSON error: {}", e);
                (StatusCode::BAD_REQUEST, "Invalid JSON", Some(e.to_string()))
            }
            AppError::Http(e) => {
                tracing::error!("Outbound HTTP error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, "Internal server error", None)
            }
        };

        let body = ErrorResponse {
            error: error.to_string(),
            details,
        };

        (status, Json(body)).into_response()
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
