//! Order aggregate and related types.

mod aggregate;
mod commands;
mod service;
mod state;

pub use aggregate::{OrderAggregate, OrderLine, order_code};
pub use commands::{LineRequest, RecordRepayment, SubmitOrder};
pub use service::{DEFAULT_CREDIT_LIMIT, OrderService, SubmitOutcome};
pub use state::{OrderStatus, PaymentMethod};
