//! Inventory error types.

use common::ProductId;
use thiserror::Error;

/// Errors that can occur while applying stock changes.
#[derive(Debug, Error)]
pub enum InventoryError {
    /// The row kept changing underneath us until the retry budget ran out.
    #[error("Stock conflict on product {product_id} after {attempts} attempts")]
    StockConflict {
        product_id: ProductId,
        attempts: u32,
    },

    /// Inbox or broker error.
    #[error("Messaging error: {0}")]
    Messaging(#[from] messaging::MessagingError),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl InventoryError {
    /// Whether redelivering the message later can succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::StockConflict { .. } | Self::Database(_) => true,
            Self::Messaging(e) => e.is_transient(),
        }
    }
}

/// Convenience type alias for inventory results.
pub type Result<T> = std::result::Result<T, InventoryError>;
