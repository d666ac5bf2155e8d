//! Order write path.
//!
//! This crate provides:
//! - The order aggregate, priced server-side through a [`PriceLookup`]
//! - The customer debt ledger with a credit limit
//! - [`OrderStore`] implementations that persist an order and its
//!   `OrderCreated` outbox row atomically

pub mod error;
pub mod ledger;
pub mod memory;
pub mod order;
pub mod postgres;
pub mod pricing;
pub mod store;

pub use error::{OrderError, Result, ValidationError};
pub use ledger::{CustomerAccount, CustomerDebt, DebtAction, DebtLedgerEntry, ledger_balance};
pub use memory::InMemoryOrderStore;
pub use order::{
    DEFAULT_CREDIT_LIMIT, LineRequest, OrderAggregate, OrderLine, OrderService, OrderStatus,
    PaymentMethod, RecordRepayment, SubmitOrder, SubmitOutcome, order_code,
};
pub use postgres::PostgresOrderStore;
pub use pricing::{HttpPriceLookup, PriceLookup, StaticPriceCatalog};
pub use store::{NewOrder, OrderStore};
