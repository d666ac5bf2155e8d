//! Customer debt ledger.
//!
//! A customer's `current_debt` is always the signed sum of their ledger
//! entries: debits add, credits subtract. Stores recompute it from the
//! ledger in the same transaction that appends an entry.

use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, TenantId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::order::OrderAggregate;

/// Direction of a ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DebtAction {
    /// Increases the debt (an order paid on credit).
    Debit,
    /// Decreases the debt (a repayment).
    Credit,
}

impl DebtAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            DebtAction::Debit => "Debit",
            DebtAction::Credit => "Credit",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Debit" => Some(DebtAction::Debit),
            "Credit" => Some(DebtAction::Credit),
            _ => None,
        }
    }
}

/// A single movement of a customer's debt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebtLedgerEntry {
    pub id: Uuid,
    pub customer_id: CustomerId,
    pub tenant_id: TenantId,
    pub ref_order_id: Option<OrderId>,
    /// Always positive; the direction is given by `action`.
    pub amount: Decimal,
    pub action: DebtAction,
    pub reason: String,
    pub created_at: DateTime<Utc>,
}

impl DebtLedgerEntry {
    /// Debit for an order paid on credit.
    pub fn debit_for_order(order: &OrderAggregate) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id: order.customer_id(),
            tenant_id: order.tenant_id(),
            ref_order_id: Some(order.id()),
            amount: order.total_amount(),
            action: DebtAction::Debit,
            reason: format!("Order {}", order.order_code()),
            created_at: order.created_at(),
        }
    }

    /// Credit for a repayment.
    pub fn repayment(
        customer_id: CustomerId,
        tenant_id: TenantId,
        amount: Decimal,
        reason: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            customer_id,
            tenant_id,
            ref_order_id: None,
            amount,
            action: DebtAction::Credit,
            reason: reason.into(),
            created_at,
        }
    }

    /// Amount with its sign: positive for debits, negative for credits.
    pub fn signed_amount(&self) -> Decimal {
        match self.action {
            DebtAction::Debit => self.amount,
            DebtAction::Credit => -self.amount,
        }
    }
}

/// Signed sum of a customer's ledger entries.
pub fn ledger_balance<'a>(entries: impl IntoIterator<Item = &'a DebtLedgerEntry>) -> Decimal {
    entries.into_iter().map(DebtLedgerEntry::signed_amount).sum()
}

/// A customer's debt position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerAccount {
    pub id: CustomerId,
    pub tenant_id: TenantId,
    pub current_debt: Decimal,
}

impl CustomerAccount {
    /// A customer with no debt.
    pub fn new(id: CustomerId, tenant_id: TenantId) -> Self {
        Self {
            id,
            tenant_id,
            current_debt: Decimal::ZERO,
        }
    }
}

/// A customer's debt position together with its ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerDebt {
    pub account: CustomerAccount,
    pub entries: Vec<DebtLedgerEntry>,
}
