use thiserror::Error;

use crate::MessageId;

/// Errors that can occur in the outbox, inbox and broker layers.
#[derive(Debug, Error)]
pub enum MessagingError {
    /// No outbox row exists with the given message id.
    #[error("Outbox message not found: {0}")]
    MessageNotFound(MessageId),

    /// The broker rejected or did not confirm a publish.
    #[error("Publish of message {0} was not confirmed by the broker")]
    NotConfirmed(MessageId),

    /// The broker is unreachable or misbehaving.
    #[error("Broker error: {0}")]
    Broker(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    /// A serialization/deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// An AMQP protocol or connection error occurred.
    #[error("AMQP error: {0}")]
    Amqp(#[from] lapin::Error),
}

impl MessagingError {
    /// Whether retrying the operation later can succeed.
    ///
    /// Infrastructure failures are transient; missing rows and malformed
    /// payloads are not.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::NotConfirmed(_) | Self::Broker(_) | Self::Database(_) | Self::Amqp(_)
        )
    }
}

/// Result type for messaging operations.
pub type Result<T> = std::result::Result<T, MessagingError>;
