//! Integration events shared between the producing and consuming services.
//!
//! These types are the wire contract on the broker. Field names are
//! camelCase on the wire; changing a field is a breaking change for every
//! consumer group.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{MessageId, OrderId, ProductId, TenantId, UnitId};

/// An event published through the outbox.
pub trait IntegrationEvent: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Event type name carried alongside the payload.
    const EVENT_TYPE: &'static str;

    /// Aggregate type the event belongs to. The broker routing key is
    /// derived from it.
    const AGGREGATE_TYPE: &'static str;

    /// Unique id of this message, used as the consumer deduplication key.
    fn message_id(&self) -> MessageId;
}

/// Fact that an order was committed.
///
/// Exactly one of these is produced per order, in the same transaction that
/// persisted the order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub message_id: MessageId,
    pub order_id: OrderId,
    pub order_code: String,
    pub tenant_id: TenantId,
    pub total_amount: Decimal,
    pub created_at: DateTime<Utc>,
    pub items: Vec<OrderCreatedItem>,
}

/// A line of an [`OrderCreated`] event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedItem {
    pub product_id: ProductId,
    pub unit_id: UnitId,
    pub quantity: Decimal,
}

impl IntegrationEvent for OrderCreated {
    const EVENT_TYPE: &'static str = "OrderCreated";
    const AGGREGATE_TYPE: &'static str = "Order";

    fn message_id(&self) -> MessageId {
        self.message_id
    }
}
