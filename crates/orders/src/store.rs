//! Persistence interface for the order write path.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId};
use messaging::OutboxMessage;
use rust_decimal::Decimal;

use crate::error::Result;
use crate::ledger::{CustomerAccount, DebtLedgerEntry};
use crate::order::OrderAggregate;

/// Everything a submission writes, committed as one unit.
#[derive(Debug, Clone)]
pub struct NewOrder {
    pub order: OrderAggregate,
    /// Present when the order is paid on credit.
    pub debit: Option<DebtLedgerEntry>,
    /// The `OrderCreated` outbox row.
    pub outbox: OutboxMessage,
}

/// Transactional storage for orders, customer debt and the outbox.
///
/// Implementations must make a submission all-or-nothing: the order, its
/// items, the ledger entry, the recomputed debt and the outbox row become
/// visible together or not at all.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists a new order.
    ///
    /// For debt orders the customer row is created if absent and locked,
    /// and the submission fails with `CreditLimitExceeded` when the new debt
    /// would exceed `credit_limit`.
    async fn submit(&self, new_order: NewOrder, credit_limit: Decimal) -> Result<()>;

    /// Appends a credit entry and returns the updated account.
    ///
    /// Fails with `CustomerNotFound` for a customer without an account.
    async fn record_repayment(
        &self,
        customer_id: CustomerId,
        amount: Decimal,
        reason: String,
        at: DateTime<Utc>,
    ) -> Result<CustomerAccount>;

    async fn get_order(&self, id: OrderId) -> Result<Option<OrderAggregate>>;

    async fn get_customer(&self, id: CustomerId) -> Result<Option<CustomerAccount>>;

    /// Ledger entries of a customer, oldest first.
    async fn ledger(&self, customer_id: CustomerId) -> Result<Vec<DebtLedgerEntry>>;
}
