//! Inventory side of the order pipeline.
//!
//! [`InventoryConsumer`] deducts stock for every `OrderCreated` message,
//! converting sales units to base units. Each message is applied once per
//! the inventory inbox, and concurrent updates to the same product are
//! resolved with optimistic version checks.

pub mod consumer;
pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use consumer::{INVENTORY_CONSUMER, InventoryConsumer, InventoryConsumerConfig, StockChanged};
pub use error::{InventoryError, Result};
pub use memory::InMemoryInventoryStore;
pub use postgres::PostgresInventoryStore;
pub use store::{InventoryRow, InventoryStore, StockTransaction};
