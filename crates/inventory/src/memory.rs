//! In-memory inventory store for tests and single-node development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, ProductId, UnitId};
use messaging::{InMemoryInbox, InMemoryInboxClaim};
use rust_decimal::Decimal;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::Result;
use crate::store::{InventoryRow, InventoryStore, StockTransaction};

#[derive(Default)]
struct State {
    rows: HashMap<ProductId, InventoryRow>,
    conversions: HashMap<(ProductId, UnitId), Decimal>,
}

/// In-memory inventory store.
///
/// A transaction takes a per-product lock on its first write and holds it
/// until commit or drop, the way a row lock behaves in PostgreSQL. Staged
/// writes are applied on commit.
#[derive(Clone)]
pub struct InMemoryInventoryStore {
    state: Arc<RwLock<State>>,
    row_locks: Arc<Mutex<HashMap<ProductId, Arc<Mutex<()>>>>>,
    inbox: InMemoryInbox,
}

impl InMemoryInventoryStore {
    /// Creates a store whose claims are recorded in `inbox`.
    pub fn new(inbox: InMemoryInbox) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            row_locks: Arc::new(Mutex::new(HashMap::new())),
            inbox,
        }
    }

    /// The inbox this store claims messages in.
    pub fn inbox(&self) -> &InMemoryInbox {
        &self.inbox
    }

    /// Sets the on-hand quantity of a product at version 0.
    pub async fn set_stock(&self, product_id: impl Into<ProductId>, quantity: Decimal) {
        let product_id = product_id.into();
        self.state.write().await.rows.insert(
            product_id,
            InventoryRow {
                product_id,
                quantity,
                version: 0,
                last_updated: Utc::now(),
            },
        );
    }

    /// Sets the number of base units in one `unit_id` of a product.
    pub async fn set_conversion(
        &self,
        product_id: impl Into<ProductId>,
        unit_id: impl Into<UnitId>,
        factor_to_base: Decimal,
    ) {
        self.state
            .write()
            .await
            .conversions
            .insert((product_id.into(), unit_id.into()), factor_to_base);
    }

    async fn row_lock(&self, product_id: ProductId) -> Arc<Mutex<()>> {
        self.row_locks
            .lock()
            .await
            .entry(product_id)
            .or_default()
            .clone()
    }
}

#[async_trait]
impl InventoryStore for InMemoryInventoryStore {
    async fn begin(&self) -> Result<Box<dyn StockTransaction>> {
        Ok(Box::new(InMemoryStockTransaction {
            store: self.clone(),
            claim: None,
            locks: HashMap::new(),
            staged: HashMap::new(),
        }))
    }

    async fn get(&self, product_id: ProductId) -> Result<Option<InventoryRow>> {
        Ok(self.state.read().await.rows.get(&product_id).cloned())
    }
}

struct InMemoryStockTransaction {
    store: InMemoryInventoryStore,
    claim: Option<InMemoryInboxClaim>,
    locks: HashMap<ProductId, OwnedMutexGuard<()>>,
    staged: HashMap<ProductId, InventoryRow>,
}

impl InMemoryStockTransaction {
    async fn current(&self, product_id: ProductId) -> Option<InventoryRow> {
        if let Some(row) = self.staged.get(&product_id) {
            return Some(row.clone());
        }
        self.store.state.read().await.rows.get(&product_id).cloned()
    }
}

#[async_trait]
impl StockTransaction for InMemoryStockTransaction {
    async fn claim_message(&mut self, consumer: &str, message_id: MessageId) -> Result<bool> {
        match self.store.inbox.claim_slot(consumer, message_id).await {
            Some(claim) => {
                self.claim = Some(claim);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn load(&mut self, product_id: ProductId) -> Result<Option<InventoryRow>> {
        Ok(self.current(product_id).await)
    }

    async fn conversion_factor(
        &mut self,
        product_id: ProductId,
        unit_id: UnitId,
    ) -> Result<Option<Decimal>> {
        let state = self.store.state.read().await;
        Ok(state.conversions.get(&(product_id, unit_id)).copied())
    }

    async fn compare_and_set(
        &mut self,
        product_id: ProductId,
        expected_version: i64,
        new_quantity: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<InventoryRow>> {
        if !self.locks.contains_key(&product_id) {
            let guard = self.store.row_lock(product_id).await.lock_owned().await;
            self.locks.insert(product_id, guard);
        }

        let Some(current) = self.current(product_id).await else {
            return Ok(None);
        };
        if current.version != expected_version {
            return Ok(None);
        }

        let updated = InventoryRow {
            product_id,
            quantity: new_quantity,
            version: current.version + 1,
            last_updated: now,
        };
        self.staged.insert(product_id, updated.clone());
        Ok(Some(updated))
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let InMemoryStockTransaction {
            store,
            claim,
            locks,
            staged,
        } = *self;

        {
            let mut state = store.state.write().await;
            for (product_id, row) in staged {
                state.rows.insert(product_id, row);
            }
        }

        if let Some(claim) = claim {
            claim.complete();
        }
        drop(locks);
        Ok(())
    }
}
