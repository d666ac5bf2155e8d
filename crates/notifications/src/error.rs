//! Notification error types.

use thiserror::Error;

/// A push could not be delivered to one device.
#[derive(Debug, Error)]
pub enum PushDeliveryError {
    /// The gateway could not be reached.
    #[error("Push gateway unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    /// The gateway refused the message, e.g. for an expired token.
    #[error("Push gateway rejected message with status {status}: {body}")]
    Rejected { status: u16, body: String },
}

/// Errors that can occur while processing notifications.
#[derive(Debug, Error)]
pub enum NotificationError {
    /// Inbox or broker error.
    #[error("Messaging error: {0}")]
    Messaging(#[from] messaging::MessagingError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result type for notification operations.
pub type Result<T> = std::result::Result<T, NotificationError>;
