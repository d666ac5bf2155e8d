//! Deducts stock for new orders.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use common::{OrderCreated, ProductId, TenantId};
use messaging::MessageHandler;
use notifications::{NotificationHub, tenant_group};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{InventoryError, Result};
use crate::store::{InventoryRow, InventoryStore, StockTransaction};

/// Consumer group and inbox partition of the inventory consumer.
pub const INVENTORY_CONSUMER: &str = "inventory";

/// Hub event sent to a tenant after its stock changed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockChanged {
    pub product_id: ProductId,
    pub new_quantity: Decimal,
}

impl StockChanged {
    pub const EVENT_NAME: &'static str = "StockChanged";
}

/// Configuration for [`InventoryConsumer`].
#[derive(Debug, Clone)]
pub struct InventoryConsumerConfig {
    /// Reloads allowed per line after a version conflict.
    pub max_retries: u32,
}

impl Default for InventoryConsumerConfig {
    fn default() -> Self {
        Self { max_retries: 5 }
    }
}

/// Applies `OrderCreated` to stock.
///
/// Each message is applied once: the inbox claim and every line's update
/// commit in the same transaction. Lines are applied in ascending product
/// order so concurrent messages lock rows in the same order.
pub struct InventoryConsumer {
    store: Arc<dyn InventoryStore>,
    hub: Arc<NotificationHub>,
    config: InventoryConsumerConfig,
}

impl InventoryConsumer {
    pub fn new(
        store: Arc<dyn InventoryStore>,
        hub: Arc<NotificationHub>,
        config: InventoryConsumerConfig,
    ) -> Self {
        Self { store, hub, config }
    }

    /// Applies an order to stock. Returns `None` if the message was already
    /// processed, otherwise the new quantity of every changed product.
    pub async fn apply(&self, event: &OrderCreated) -> Result<Option<BTreeMap<ProductId, Decimal>>> {
        let mut tx = self.store.begin().await?;

        if !tx.claim_message(INVENTORY_CONSUMER, event.message_id).await? {
            tracing::debug!("Already processed");
            return Ok(None);
        }

        let mut items: Vec<_> = event.items.iter().collect();
        items.sort_by_key(|item| item.product_id);

        let mut changed = BTreeMap::new();
        for item in items {
            let factor = match tx.conversion_factor(item.product_id, item.unit_id).await? {
                Some(factor) => factor,
                None => {
                    tracing::warn!(
                        product_id = %item.product_id,
                        unit_id = %item.unit_id,
                        "No unit conversion, assuming base unit"
                    );
                    Decimal::ONE
                }
            };

            let delta = -(item.quantity * factor);
            if let Some(row) = self.apply_line(tx.as_mut(), item.product_id, delta).await? {
                changed.insert(row.product_id, row.quantity);
            }
        }

        tx.commit().await?;
        Ok(Some(changed))
    }

    /// Adds `delta` to a product's stock, reloading on version conflicts.
    async fn apply_line(
        &self,
        tx: &mut dyn StockTransaction,
        product_id: ProductId,
        delta: Decimal,
    ) -> Result<Option<InventoryRow>> {
        let mut attempt = 0;
        loop {
            let Some(row) = tx.load(product_id).await? else {
                tracing::warn!(%product_id, "No inventory row, line skipped");
                return Ok(None);
            };

            let new_quantity = row.quantity + delta;
            if let Some(updated) = tx
                .compare_and_set(product_id, row.version, new_quantity, Utc::now())
                .await?
            {
                if updated.quantity < Decimal::ZERO {
                    tracing::warn!(%product_id, quantity = %updated.quantity, "Stock is negative");
                }
                return Ok(Some(updated));
            }

            metrics::counter!("inventory_stock_conflicts_total").increment(1);
            attempt += 1;
            if attempt > self.config.max_retries {
                return Err(InventoryError::StockConflict {
                    product_id,
                    attempts: attempt,
                });
            }
            tracing::debug!(%product_id, attempt, "Version conflict, reloading");
        }
    }

    fn announce(&self, tenant_id: TenantId, changed: BTreeMap<ProductId, Decimal>) {
        let group = tenant_group(tenant_id);
        for (product_id, quantity) in changed {
            let event = StockChanged {
                product_id,
                new_quantity: quantity.normalize(),
            };
            match serde_json::to_value(&event) {
                Ok(payload) => {
                    self.hub.broadcast(&group, StockChanged::EVENT_NAME, payload);
                }
                Err(e) => tracing::warn!(%product_id, error = %e, "Could not encode StockChanged"),
            }
        }
    }
}

#[async_trait]
impl MessageHandler<OrderCreated> for InventoryConsumer {
    type Error = InventoryError;

    fn name(&self) -> &'static str {
        INVENTORY_CONSUMER
    }

    #[tracing::instrument(skip(self, event), fields(message_id = %event.message_id, order_id = %event.order_id))]
    async fn handle(&self, event: OrderCreated) -> Result<()> {
        match self.apply(&event).await {
            Ok(Some(changed)) => {
                tracing::info!(products = changed.len(), "Stock deducted");
                self.announce(event.tenant_id, changed);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e @ InventoryError::StockConflict { .. }) => {
                tracing::error!(error = %e, "Stock deduction abandoned, leaving message for redelivery");
                Err(e)
            }
            Err(e) => Err(e),
        }
    }
}
