//! In-memory order store for tests and single-node development.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId};
use messaging::InMemoryOutboxStore;
use rust_decimal::Decimal;
use tokio::sync::RwLock;

use crate::error::{OrderError, Result, ValidationError};
use crate::ledger::{CustomerAccount, DebtLedgerEntry, ledger_balance};
use crate::order::OrderAggregate;
use crate::store::{NewOrder, OrderStore};

#[derive(Default)]
struct State {
    orders: HashMap<OrderId, OrderAggregate>,
    customers: HashMap<CustomerId, CustomerAccount>,
    ledger: Vec<DebtLedgerEntry>,
}

impl State {
    fn recompute_debt(&mut self, customer_id: CustomerId) -> Decimal {
        let debt = ledger_balance(self.ledger.iter().filter(|e| e.customer_id == customer_id));
        if let Some(account) = self.customers.get_mut(&customer_id) {
            account.current_debt = debt;
        }
        debt
    }
}

/// In-memory order store.
///
/// A single write lock covers every submission, standing in for the
/// database transaction. The outbox row is inserted while that lock is held.
#[derive(Clone)]
pub struct InMemoryOrderStore {
    state: Arc<RwLock<State>>,
    outbox: InMemoryOutboxStore,
}

impl InMemoryOrderStore {
    /// Creates a store that writes its outbox rows to `outbox`.
    pub fn new(outbox: InMemoryOutboxStore) -> Self {
        Self {
            state: Arc::new(RwLock::new(State::default())),
            outbox,
        }
    }

    /// The outbox this store writes to.
    pub fn outbox(&self) -> &InMemoryOutboxStore {
        &self.outbox
    }

    /// Returns the number of stored orders.
    pub async fn order_count(&self) -> usize {
        self.state.read().await.orders.len()
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn submit(&self, new_order: NewOrder, credit_limit: Decimal) -> Result<()> {
        let NewOrder {
            order,
            debit,
            outbox,
        } = new_order;

        let mut state = self.state.write().await;

        if let Some(entry) = &debit {
            let current_debt = state
                .customers
                .get(&entry.customer_id)
                .map(|c| c.current_debt)
                .unwrap_or(Decimal::ZERO);

            if current_debt + entry.amount > credit_limit {
                return Err(ValidationError::CreditLimitExceeded {
                    current_debt,
                    order_total: entry.amount,
                    credit_limit,
                }
                .into());
            }
        }

        if let Some(entry) = debit {
            let customer_id = entry.customer_id;
            state
                .customers
                .entry(customer_id)
                .or_insert_with(|| CustomerAccount::new(customer_id, entry.tenant_id));
            state.ledger.push(entry);
            state.recompute_debt(customer_id);
        }

        state.orders.insert(order.id(), order);
        self.outbox.insert(outbox).await;

        Ok(())
    }

    async fn record_repayment(
        &self,
        customer_id: CustomerId,
        amount: Decimal,
        reason: String,
        at: DateTime<Utc>,
    ) -> Result<CustomerAccount> {
        let mut state = self.state.write().await;

        let tenant_id = state
            .customers
            .get(&customer_id)
            .map(|c| c.tenant_id)
            .ok_or(OrderError::CustomerNotFound(customer_id))?;

        state
            .ledger
            .push(DebtLedgerEntry::repayment(customer_id, tenant_id, amount, reason, at));
        state.recompute_debt(customer_id);

        state
            .customers
            .get(&customer_id)
            .cloned()
            .ok_or(OrderError::CustomerNotFound(customer_id))
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<OrderAggregate>> {
        Ok(self.state.read().await.orders.get(&id).cloned())
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<CustomerAccount>> {
        Ok(self.state.read().await.customers.get(&id).cloned())
    }

    async fn ledger(&self, customer_id: CustomerId) -> Result<Vec<DebtLedgerEntry>> {
        let state = self.state.read().await;
        let mut entries: Vec<_> = state
            .ledger
            .iter()
            .filter(|e| e.customer_id == customer_id)
            .cloned()
            .collect();
        entries.sort_by_key(|e| e.created_at);
        Ok(entries)
    }
}
