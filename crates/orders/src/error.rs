//! Order write path error types.

use common::{CustomerId, OrderId, ProductId, UnitId};
use messaging::MessagingError;
use rust_decimal::Decimal;
use thiserror::Error;

use crate::order::OrderStatus;

/// A submission was rejected before anything was persisted.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    /// Order has no lines.
    #[error("Order has no lines")]
    NoLines,

    /// A line has a zero or negative quantity.
    #[error("Invalid quantity {quantity} for product {product_id} (must be greater than 0)")]
    InvalidQuantity {
        product_id: ProductId,
        quantity: Decimal,
    },

    /// The price lookup has no price for a (product, unit) pair.
    #[error("No price for product {product_id} in unit {unit_id}")]
    UnknownPrice {
        product_id: ProductId,
        unit_id: UnitId,
    },

    /// The price lookup returned a negative price.
    #[error("Invalid price {price} for product {product_id} in unit {unit_id}")]
    InvalidPrice {
        product_id: ProductId,
        unit_id: UnitId,
        price: Decimal,
    },

    /// A monetary amount that must be positive was not.
    #[error("Amount must be greater than 0, got {0}")]
    NonPositiveAmount(Decimal),

    /// A debt order would push the customer's debt past the credit limit.
    #[error(
        "Credit limit exceeded: current debt {current_debt} plus {order_total} exceeds {credit_limit}"
    )]
    CreditLimitExceeded {
        current_debt: Decimal,
        order_total: Decimal,
        credit_limit: Decimal,
    },
}

/// Errors that can occur during order operations.
#[derive(Debug, Error)]
pub enum OrderError {
    /// The request was invalid.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Customer not found.
    #[error("Customer not found: {0}")]
    CustomerNotFound(CustomerId),

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// Order is not in the expected state.
    #[error("Invalid state transition: cannot {action} from {current} state")]
    InvalidStateTransition {
        current: OrderStatus,
        action: &'static str,
    },

    /// The product service could not be reached or answered with an error.
    #[error("Price service error: {0}")]
    PriceService(#[from] reqwest::Error),

    /// An error occurred writing the outbox.
    #[error("Messaging error: {0}")]
    Messaging(#[from] MessagingError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl OrderError {
    /// Whether retrying the operation later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::PriceService(_) | Self::Database(_) => true,
            Self::Messaging(e) => e.is_transient(),
            _ => false,
        }
    }
}

/// Result type for order operations.
pub type Result<T> = std::result::Result<T, OrderError>;
