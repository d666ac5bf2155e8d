//! API error types with HTTP response mapping.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use messaging::MessagingError;
use orders::OrderError;

/// API-level error type that maps to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    /// Resource not found.
    NotFound(String),
    /// Bad request from the client.
    BadRequest(String),
    /// Order write path error.
    Order(OrderError),
    /// Outbox error.
    Messaging(MessagingError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Order(err) => order_error_to_response(err),
            ApiError::Messaging(err) => messaging_error_to_response(err),
        };

        let body = serde_json::json!({ "error": message });
        (status, axum::Json(body)).into_response()
    }
}

fn order_error_to_response(err: OrderError) -> (StatusCode, String) {
    match &err {
        OrderError::Validation(_) => (StatusCode::BAD_REQUEST, err.to_string()),
        OrderError::CustomerNotFound(_) | OrderError::OrderNotFound(_) => {
            (StatusCode::NOT_FOUND, err.to_string())
        }
        OrderError::InvalidStateTransition { .. } => (StatusCode::CONFLICT, err.to_string()),
        _ if err.is_transient() => {
            tracing::warn!(error = %err, "order request failed on infrastructure");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

fn messaging_error_to_response(err: MessagingError) -> (StatusCode, String) {
    match &err {
        MessagingError::MessageNotFound(_) => (StatusCode::NOT_FOUND, err.to_string()),
        _ if err.is_transient() => {
            tracing::warn!(error = %err, "outbox request failed on infrastructure");
            (StatusCode::SERVICE_UNAVAILABLE, err.to_string())
        }
        _ => {
            tracing::error!(error = %err, "internal server error");
            (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        }
    }
}

impl From<OrderError> for ApiError {
    fn from(err: OrderError) -> Self {
        ApiError::Order(err)
    }
}

impl From<MessagingError> for ApiError {
    fn from(err: MessagingError) -> Self {
        ApiError::Messaging(err)
    }
}

/// Errors that abort process start-up.
#[derive(Debug, thiserror::Error)]
pub enum StartupError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    #[error("Push gateway error: {0}")]
    PushGateway(#[from] notifications::PushDeliveryError),

    #[error("Price service error: {0}")]
    PriceService(#[from] OrderError),

    #[error("Push gateway key missing: PUSH_GATEWAY_URL is set without PUSH_GATEWAY_KEY")]
    MissingPushKey,
}
