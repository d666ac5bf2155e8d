//! Order status and payment method.

use serde::{Deserialize, Serialize};

/// The status of an order.
///
/// ```text
/// Draft ──► Confirmed
/// ```
///
/// The write path confirms an order before persisting it, so stored orders
/// are always `Confirmed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum OrderStatus {
    /// Order is being assembled and priced.
    #[default]
    Draft,

    /// Order is accepted; its lines and total no longer change.
    Confirmed,
}

impl OrderStatus {
    /// Returns true if the order can be confirmed in this status.
    pub fn can_confirm(&self) -> bool {
        matches!(self, OrderStatus::Draft)
    }

    /// Returns the status name as a string.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "Draft",
            OrderStatus::Confirmed => "Confirmed",
        }
    }

    /// Parses a status name as stored by [`as_str`](Self::as_str).
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Draft" => Some(OrderStatus::Draft),
            "Confirmed" => Some(OrderStatus::Confirmed),
            _ => None,
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the customer pays for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PaymentMethod {
    Cash,
    Transfer,
    /// Added to the customer's debt.
    Debt,
}

impl PaymentMethod {
    /// Returns true if the order is paid on credit.
    pub fn is_debt(&self) -> bool {
        matches!(self, PaymentMethod::Debt)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Cash => "Cash",
            PaymentMethod::Transfer => "Transfer",
            PaymentMethod::Debt => "Debt",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Cash" => Some(PaymentMethod::Cash),
            "Transfer" => Some(PaymentMethod::Transfer),
            "Debt" => Some(PaymentMethod::Debt),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
