//! Per-consumer record of processed message ids.
//!
//! A consumer claims `(consumer, message_id)` before applying its effect and
//! commits the claim together with the effect. A second claim for the same
//! key waits until the first is committed or dropped, then either observes
//! the record (already processed) or takes over.

use async_trait::async_trait;

use crate::{MessageId, Result};

/// An in-progress claim on a message for one consumer.
///
/// Dropping the claim without committing releases it, leaving the message
/// unprocessed.
#[async_trait]
pub trait InboxClaim: Send {
    /// Durably records the message as processed.
    async fn commit(self: Box<Self>) -> Result<()>;
}

/// Deduplication store keyed by `(consumer, message_id)`.
#[async_trait]
pub trait InboxStore: Send + Sync {
    /// Claims a message for a consumer.
    ///
    /// Returns `None` if the message has already been processed by this
    /// consumer.
    async fn claim(&self, consumer: &str, message_id: MessageId)
    -> Result<Option<Box<dyn InboxClaim>>>;

    /// Whether the consumer has processed the message.
    async fn is_processed(&self, consumer: &str, message_id: MessageId) -> Result<bool>;
}
