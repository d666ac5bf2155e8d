//! Outbox rows and the store the dispatcher drains.
//!
//! A row is written in the same transaction as the business change it
//! describes. Afterwards only the dispatcher (lock, mark dispatched), the
//! replay operation and the janitor touch it.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use common::IntegrationEvent;
use serde::{Deserialize, Serialize};

use crate::{AggregateId, MessageId, Result};

/// A persisted integration event awaiting (or past) delivery.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub id: MessageId,
    pub aggregate_type: String,
    pub aggregate_id: AggregateId,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub occurred_at: DateTime<Utc>,
    pub dispatched_at: Option<DateTime<Utc>>,
    pub locked_by: Option<String>,
    pub lock_expires_at: Option<DateTime<Utc>>,
    /// Number of times a dispatcher has locked this row.
    pub attempts: i32,
}

impl OutboxMessage {
    /// Builds an undispatched row for an integration event.
    ///
    /// The row id is the event's message id, so consumers and the outbox
    /// agree on the deduplication key.
    pub fn from_event<E: IntegrationEvent>(
        aggregate_id: impl Into<AggregateId>,
        event: &E,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self> {
        Ok(Self {
            id: event.message_id(),
            aggregate_type: E::AGGREGATE_TYPE.to_string(),
            aggregate_id: aggregate_id.into(),
            event_type: E::EVENT_TYPE.to_string(),
            payload: serde_json::to_value(event)?,
            occurred_at,
            dispatched_at: None,
            locked_by: None,
            lock_expires_at: None,
            attempts: 0,
        })
    }

    /// Whether the row has been acknowledged by the broker.
    pub fn is_dispatched(&self) -> bool {
        self.dispatched_at.is_some()
    }

    /// Whether a dispatcher may lock the row at `now`.
    pub fn is_available(&self, now: DateTime<Utc>) -> bool {
        self.dispatched_at.is_none() && self.lock_expires_at.is_none_or(|expires| expires < now)
    }

    /// Decodes the payload back into its event type.
    pub fn decode<E: IntegrationEvent>(&self) -> Result<E> {
        Ok(serde_json::from_value(self.payload.clone())?)
    }
}

/// Persistence for outbox rows.
///
/// Inserts are not part of this trait: they happen inside the producing
/// service's own write transaction.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Leases up to `batch_size` available rows to `instance_id`, oldest
    /// first.
    ///
    /// A row is available when it is not dispatched and has no live lease.
    /// Each leased row has `locked_by = instance_id`, `lock_expires_at =
    /// now + lease` and its attempt counter incremented.
    async fn lock_batch(
        &self,
        instance_id: &str,
        batch_size: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>>;

    /// Records broker acknowledgment of a row and releases its lease.
    ///
    /// Marking an already dispatched row is a no-op.
    async fn mark_dispatched(&self, id: MessageId, now: DateTime<Utc>) -> Result<()>;

    /// Gets a row by id.
    async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>>;

    /// Gets every row produced for an aggregate, oldest first.
    async fn for_aggregate(&self, aggregate_id: AggregateId) -> Result<Vec<OutboxMessage>>;

    /// Counts rows not yet dispatched.
    async fn pending_count(&self) -> Result<u64>;

    /// Deletes dispatched rows whose `dispatched_at` is before `older_than`.
    ///
    /// Returns the number of deleted rows.
    async fn prune_dispatched(&self, older_than: DateTime<Utc>) -> Result<u64>;

    /// Makes a row eligible for dispatch again by clearing its dispatch
    /// timestamp and lease.
    ///
    /// Fails with `MessageNotFound` if the row does not exist.
    async fn replay(&self, id: MessageId) -> Result<()>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderCreated, OrderId, TenantId};

    fn event() -> OrderCreated {
        OrderCreated {
            message_id: MessageId::new(),
            order_id: OrderId::new(),
            order_code: "ORD-20260101000000-000000".to_string(),
            tenant_id: TenantId::new(),
            total_amount: Default::default(),
            created_at: Utc::now(),
            items: vec![],
        }
    }

    #[test]
    fn from_event_copies_envelope_metadata() {
        let event = event();
        let now = Utc::now();
        let message = OutboxMessage::from_event(event.order_id, &event, now).unwrap();

        assert_eq!(message.id, event.message_id);
        assert_eq!(message.aggregate_id, AggregateId::from(event.order_id));
        assert_eq!(message.aggregate_type, "Order");
        assert_eq!(message.event_type, "OrderCreated");
        assert_eq!(message.occurred_at, now);
        assert_eq!(message.attempts, 0);
        assert!(!message.is_dispatched());

        let decoded: OrderCreated = message.decode().unwrap();
        assert_eq!(decoded, event);
    }

    #[test]
    fn availability_follows_lease_and_dispatch() {
        let event = event();
        let now = Utc::now();
        let mut message = OutboxMessage::from_event(event.order_id, &event, now).unwrap();
        assert!(message.is_available(now));

        message.locked_by = Some("a".into());
        message.lock_expires_at = Some(now + Duration::seconds(30));
        assert!(!message.is_available(now));
        assert!(message.is_available(now + Duration::seconds(31)));

        message.dispatched_at = Some(now);
        assert!(!message.is_available(now + Duration::seconds(31)));
    }
}
