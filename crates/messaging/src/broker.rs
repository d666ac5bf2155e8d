//! Publish/subscribe interface over the message broker.
//!
//! Delivery is at-least-once: a message is redelivered until a consumer
//! acknowledges it (or the broker dead-letters it). Each consumer group gets
//! its own copy of every message; within a group one subscriber receives it.

use std::pin::Pin;

use async_trait::async_trait;
use futures_core::Stream;

use crate::{MessageId, Result};

/// A message handed to the broker for publishing.
#[derive(Debug, Clone, PartialEq)]
pub struct BrokerMessage {
    pub routing_key: String,
    pub message_id: MessageId,
    pub event_type: String,
    pub payload: Vec<u8>,
}

/// Settles a single delivery.
#[async_trait]
pub trait Acker: Send + Sync {
    /// Confirms processing; the broker forgets the delivery.
    async fn ack(self: Box<Self>) -> Result<()>;

    /// Rejects the delivery. With `requeue` the broker redelivers it,
    /// otherwise it is dropped or dead-lettered.
    async fn nack(self: Box<Self>, requeue: bool) -> Result<()>;
}

/// A message received from a subscription.
pub struct Delivery {
    /// Message id header, when the producer set one.
    pub message_id: Option<MessageId>,
    /// Event type header, when the producer set one.
    pub event_type: Option<String>,
    pub payload: Vec<u8>,
    /// Whether the broker delivered this message before.
    pub redelivered: bool,
    acker: Box<dyn Acker>,
}

impl Delivery {
    /// Creates a delivery settled through `acker`.
    pub fn new(
        message_id: Option<MessageId>,
        event_type: Option<String>,
        payload: Vec<u8>,
        redelivered: bool,
        acker: Box<dyn Acker>,
    ) -> Self {
        Self {
            message_id,
            event_type,
            payload,
            redelivered,
            acker,
        }
    }

    /// Acknowledges the delivery.
    pub async fn ack(self) -> Result<()> {
        self.acker.ack().await
    }

    /// Negatively acknowledges the delivery.
    pub async fn nack(self, requeue: bool) -> Result<()> {
        self.acker.nack(requeue).await
    }
}

impl std::fmt::Debug for Delivery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message_id", &self.message_id)
            .field("event_type", &self.event_type)
            .field("payload_len", &self.payload.len())
            .field("redelivered", &self.redelivered)
            .finish()
    }
}

/// A stream of deliveries for one consumer group.
pub type Subscription = Pin<Box<dyn Stream<Item = Result<Delivery>> + Send>>;

/// Core trait for broker implementations.
#[async_trait]
pub trait Broker: Send + Sync {
    /// Publishes a message, returning once the broker has accepted it
    /// durably. An `Ok` is the acknowledgment the outbox waits for.
    ///
    /// A message no group queue is bound for is not accepted: it fails with
    /// [`MessagingError::NotConfirmed`](crate::MessagingError::NotConfirmed).
    async fn publish(&self, message: BrokerMessage) -> Result<()>;

    /// Declares `group`'s queue and binds it to `routing_key` without
    /// consuming. Run for every group before the first publish.
    async fn declare_group(&self, group: &str, routing_key: &str) -> Result<()>;

    /// Subscribes `group` to messages published under `routing_key`.
    ///
    /// The group's queue is created if needed. Subscribing the same group
    /// twice yields competing consumers on one queue.
    async fn subscribe(&self, group: &str, routing_key: &str) -> Result<Subscription>;
}

/// Routing key for messages of an aggregate type.
pub fn routing_key(aggregate_type: &str) -> String {
    aggregate_type.to_lowercase()
}
