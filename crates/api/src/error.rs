//! API error types and handling

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use genpire_billing::BillingError;
use serde_json::json;

/// Application error type
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    // Authentication errors
    #[error("Invalid or expired token")]
    InvalidToken,
    #[error("Authentication required")]
    Unauthorized,

    // Validation errors
    #[error("Invalid request: {0}")]
    BadRequest(String),

    // Resource errors
    #[error("Resource not found")]
    NotFound,
    #[error("Subscription not found")]
    SubscriptionNotFound,

    // Billing errors
    #[error("Payment provider error")]
    Provider(String),
    #[error("Invalid webhook signature")]
    WebhookSignature,

    // Internal errors
    #[error("Database error: {0}")]
    Database(String),
    #[error("Internal server error")]
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            // Authentication
            ApiError::InvalidToken => (StatusCode::UNAUTHORIZED, "INVALID_TOKEN", self.to_string()),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "UNAUTHORIZED", self.to_string()),

            // Validation
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "BAD_REQUEST", msg.clone()),

            // Resources
            ApiError::NotFound => (StatusCode::NOT_FOUND, "NOT_FOUND", self.to_string()),
            ApiError::SubscriptionNotFound => (
                StatusCode::NOT_FOUND,
                "SUBSCRIPTION_NOT_FOUND",
                self.to_string(),
            ),

            // Billing; provider detail stays in the logs, not the response
            ApiError::Provider(_) => (
                StatusCode::BAD_GATEWAY,
                "PROVIDER_ERROR",
                "Payment provider error".to_string(),
            ),
            ApiError::WebhookSignature => (
                StatusCode::UNAUTHORIZED,
                "INVALID_SIGNATURE",
                self.to_string(),
            ),

            // Internal
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "DATABASE_ERROR",
                "Database error".to_string(),
            ),
            ApiError::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL_ERROR",
                self.to_string(),
            ),
        };

        let body = Json(json!({
            "error": {
                "code": code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        tracing::error!("Database error: {:?}", err);
        match err {
            sqlx::Error::RowNotFound => ApiError::NotFound,
            _ => ApiError::Database(err.to_string()),
        }
    }
}

impl From<BillingError> for ApiError {
    fn from(err: BillingError) -> Self {
        match err {
            BillingError::SubscriptionNotFound(_) => ApiError::SubscriptionNotFound,
            BillingError::NotFound(_) => ApiError::NotFound,
            BillingError::InvalidInput(msg) => ApiError::BadRequest(msg),
            BillingError::Unauthorized(_) => ApiError::Unauthorized,
            BillingError::WebhookSignatureInvalid => ApiError::WebhookSignature,
            BillingError::WebhookEventNotSupported(msg) => ApiError::BadRequest(msg),
            BillingError::Provider(msg) => {
                tracing::error!(error = %msg, "Provider error");
                ApiError::Provider(msg)
            }
            BillingError::Database(msg) => {
                tracing::error!(error = %msg, "Billing database error");
                ApiError::Database(msg)
            }
            BillingError::Config(msg) | BillingError::Internal(msg) => {
                tracing::error!(error = %msg, "Billing internal error");
                ApiError::Internal
            }
        }
    }
}

/// Result type alias for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
