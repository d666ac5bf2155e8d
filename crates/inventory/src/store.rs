//! Stock storage interface.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, ProductId, UnitId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::Result;

/// On-hand stock of a product, in its base unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InventoryRow {
    pub product_id: ProductId,
    pub quantity: Decimal,
    /// Incremented by every successful update.
    pub version: i64,
    pub last_updated: DateTime<Utc>,
}

/// Storage for inventory rows and unit conversions.
#[async_trait]
pub trait InventoryStore: Send + Sync {
    /// Starts a stock transaction.
    async fn begin(&self) -> Result<Box<dyn StockTransaction>>;

    /// Reads the committed row of a product.
    async fn get(&self, product_id: ProductId) -> Result<Option<InventoryRow>>;
}

/// A unit of work over stock rows and the inventory inbox.
///
/// Dropping the transaction without committing discards every change,
/// including the inbox claim.
#[async_trait]
pub trait StockTransaction: Send {
    /// Records `(consumer, message_id)`. Returns false when the message was
    /// already processed; a concurrent claim of the same key waits for the
    /// other transaction to finish.
    async fn claim_message(&mut self, consumer: &str, message_id: MessageId) -> Result<bool>;

    /// Loads the latest row of a product, including this transaction's writes.
    async fn load(&mut self, product_id: ProductId) -> Result<Option<InventoryRow>>;

    /// Returns how many base units one `unit_id` of the product holds.
    async fn conversion_factor(
        &mut self,
        product_id: ProductId,
        unit_id: UnitId,
    ) -> Result<Option<Decimal>>;

    /// Sets the quantity if the row is still at `expected_version`.
    ///
    /// Returns the updated row, or `None` when the version moved on.
    async fn compare_and_set(
        &mut self,
        product_id: ProductId,
        expected_version: i64,
        new_quantity: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<InventoryRow>>;

    async fn commit(self: Box<Self>) -> Result<()>;
}
