//! Shared kernel for the order pipeline: typed identifiers and the
//! integration events exchanged over the broker.

pub mod events;
pub mod types;

pub use events::{IntegrationEvent, OrderCreated, OrderCreatedItem};
pub use types::{
    AggregateId, CustomerId, MessageId, OrderId, ProductId, TenantId, UnitId, UserId,
};
