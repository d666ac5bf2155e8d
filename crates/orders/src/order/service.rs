//! Order service: the write path for orders and customer debt.

use std::sync::Arc;

use chrono::Utc;
use common::{CustomerId, MessageId, OrderId};
use messaging::OutboxMessage;
use rust_decimal::Decimal;

use crate::error::{OrderError, Result, ValidationError};
use crate::ledger::{CustomerAccount, CustomerDebt, DebtLedgerEntry};
use crate::pricing::PriceLookup;
use crate::store::{NewOrder, OrderStore};

use super::{OrderAggregate, OrderLine, RecordRepayment, SubmitOrder};

/// Default ceiling on a customer's debt.
pub const DEFAULT_CREDIT_LIMIT: i64 = 50_000_000;

/// Result of a successful submission.
#[derive(Debug, Clone, PartialEq)]
pub struct SubmitOutcome {
    pub order_id: OrderId,
    pub order_code: String,
    pub total_amount: Decimal,
}

/// Service for submitting orders and managing customer debt.
///
/// Prices are looked up server-side; the order, its debt entry and the
/// `OrderCreated` outbox row are handed to the store as one unit.
#[derive(Clone)]
pub struct OrderService {
    store: Arc<dyn OrderStore>,
    prices: Arc<dyn PriceLookup>,
    credit_limit: Decimal,
}

impl OrderService {
    /// Creates a new order service with the default credit limit.
    pub fn new(store: Arc<dyn OrderStore>, prices: Arc<dyn PriceLookup>) -> Self {
        Self {
            store,
            prices,
            credit_limit: Decimal::from(DEFAULT_CREDIT_LIMIT),
        }
    }

    /// Sets the credit limit applied to debt orders.
    pub fn with_credit_limit(mut self, credit_limit: Decimal) -> Self {
        self.credit_limit = credit_limit;
        self
    }

    pub fn credit_limit(&self) -> Decimal {
        self.credit_limit
    }

    /// Validates, prices and persists a new order.
    #[tracing::instrument(skip(self, cmd), fields(customer_id = %cmd.customer_id, tenant_id = %cmd.tenant_id))]
    pub async fn submit_order(&self, cmd: SubmitOrder) -> Result<SubmitOutcome> {
        let result = self.try_submit(cmd).await;

        match &result {
            Ok(outcome) => {
                metrics::counter!("orders_submitted_total").increment(1);
                tracing::info!(
                    order_id = %outcome.order_id,
                    order_code = %outcome.order_code,
                    total = %outcome.total_amount,
                    "Order submitted"
                );
            }
            Err(OrderError::Validation(e)) => {
                metrics::counter!("orders_rejected_total").increment(1);
                tracing::info!(reason = %e, "Order rejected");
            }
            Err(e) => {
                tracing::warn!(error = %e, "Order submission failed");
            }
        }

        result
    }

    async fn try_submit(&self, cmd: SubmitOrder) -> Result<SubmitOutcome> {
        if cmd.lines.is_empty() {
            return Err(ValidationError::NoLines.into());
        }

        let mut lines = Vec::with_capacity(cmd.lines.len());
        for request in &cmd.lines {
            if request.quantity <= Decimal::ZERO {
                return Err(ValidationError::InvalidQuantity {
                    product_id: request.product_id,
                    quantity: request.quantity,
                }
                .into());
            }

            let unit_price = self
                .prices
                .unit_price(request.product_id, request.unit_id)
                .await?
                .ok_or(ValidationError::UnknownPrice {
                    product_id: request.product_id,
                    unit_id: request.unit_id,
                })?;
            if unit_price < Decimal::ZERO {
                return Err(ValidationError::InvalidPrice {
                    product_id: request.product_id,
                    unit_id: request.unit_id,
                    price: unit_price,
                }
                .into());
            }

            lines.push(OrderLine::new(
                request.product_id,
                request.unit_id,
                request.quantity,
                unit_price,
            ));
        }

        let now = Utc::now();
        let mut order = OrderAggregate::draft(
            OrderId::new(),
            cmd.tenant_id,
            cmd.customer_id,
            cmd.payment_method,
            lines,
            now,
        )?;
        order.confirm()?;

        let event = order.to_created_event(MessageId::new());
        let outbox = OutboxMessage::from_event(order.id(), &event, now)?;
        // A free debt order owes nothing and leaves the ledger untouched.
        let debit = (order.is_debt() && order.total_amount() > Decimal::ZERO)
            .then(|| DebtLedgerEntry::debit_for_order(&order));

        let outcome = SubmitOutcome {
            order_id: order.id(),
            order_code: order.order_code().to_string(),
            total_amount: order.total_amount(),
        };

        self.store
            .submit(
                NewOrder {
                    order,
                    debit,
                    outbox,
                },
                self.credit_limit,
            )
            .await?;

        Ok(outcome)
    }

    /// Records a repayment and returns the customer's updated account.
    #[tracing::instrument(skip(self, cmd), fields(customer_id = %cmd.customer_id, amount = %cmd.amount))]
    pub async fn record_repayment(&self, cmd: RecordRepayment) -> Result<CustomerAccount> {
        if cmd.amount <= Decimal::ZERO {
            return Err(ValidationError::NonPositiveAmount(cmd.amount).into());
        }

        let reason = cmd.reason.unwrap_or_else(|| "Repayment".to_string());
        let account = self
            .store
            .record_repayment(cmd.customer_id, cmd.amount, reason, Utc::now())
            .await?;

        tracing::info!(current_debt = %account.current_debt, "Repayment recorded");
        Ok(account)
    }

    /// Loads an order.
    pub async fn get_order(&self, id: OrderId) -> Result<OrderAggregate> {
        self.store
            .get_order(id)
            .await?
            .ok_or(OrderError::OrderNotFound(id))
    }

    /// Loads a customer's debt position and ledger.
    pub async fn get_customer_debt(&self, id: CustomerId) -> Result<CustomerDebt> {
        let account = self
            .store
            .get_customer(id)
            .await?
            .ok_or(OrderError::CustomerNotFound(id))?;
        let entries = self.store.ledger(id).await?;

        Ok(CustomerDebt { account, entries })
    }
}
