//! Order commands.

use common::{CustomerId, ProductId, TenantId, UnitId};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::PaymentMethod;

/// A requested order line, before pricing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRequest {
    pub product_id: ProductId,
    pub unit_id: UnitId,
    pub quantity: Decimal,
}

impl LineRequest {
    pub fn new(product_id: impl Into<ProductId>, unit_id: impl Into<UnitId>, quantity: Decimal) -> Self {
        Self {
            product_id: product_id.into(),
            unit_id: unit_id.into(),
            quantity,
        }
    }
}

/// Command to submit a new order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitOrder {
    /// The customer placing the order.
    pub customer_id: CustomerId,

    /// The tenant (store) the order belongs to.
    pub tenant_id: TenantId,

    /// Requested lines. Prices are looked up server-side.
    pub lines: Vec<LineRequest>,

    pub payment_method: PaymentMethod,
}

impl SubmitOrder {
    /// Creates a new SubmitOrder command.
    pub fn new(
        customer_id: CustomerId,
        tenant_id: TenantId,
        lines: Vec<LineRequest>,
        payment_method: PaymentMethod,
    ) -> Self {
        Self {
            customer_id,
            tenant_id,
            lines,
            payment_method,
        }
    }

    /// Returns true if the order is paid on credit.
    pub fn is_debt(&self) -> bool {
        self.payment_method.is_debt()
    }
}

/// Command to record a repayment against a customer's debt.
#[derive(Debug, Clone)]
pub struct RecordRepayment {
    pub customer_id: CustomerId,

    /// Amount repaid. Must be greater than 0.
    pub amount: Decimal,

    /// Free-text reason stored on the ledger entry.
    pub reason: Option<String>,
}

impl RecordRepayment {
    /// Creates a new RecordRepayment command.
    pub fn new(customer_id: CustomerId, amount: Decimal, reason: Option<String>) -> Self {
        Self {
            customer_id,
            amount,
            reason,
        }
    }
}
