//! Order aggregate implementation.

use chrono::{DateTime, Utc};
use common::{
    CustomerId, MessageId, OrderCreated, OrderCreatedItem, OrderId, ProductId, TenantId, UnitId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{OrderError, ValidationError};

use super::{OrderStatus, PaymentMethod};

/// A priced line of an order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderLine {
    pub product_id: ProductId,
    pub unit_id: UnitId,
    pub quantity: Decimal,
    /// Server-side price per unit at submission time.
    pub unit_price: Decimal,
}

impl OrderLine {
    pub fn new(product_id: ProductId, unit_id: UnitId, quantity: Decimal, unit_price: Decimal) -> Self {
        Self {
            product_id,
            unit_id,
            quantity,
            unit_price,
        }
    }

    /// Returns quantity × unit price.
    pub fn line_total(&self) -> Decimal {
        self.quantity * self.unit_price
    }
}

/// Order aggregate root.
///
/// Built as a `Draft` from priced lines, confirmed, then persisted. Once
/// confirmed its lines and total are immutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderAggregate {
    id: OrderId,
    tenant_id: TenantId,
    customer_id: CustomerId,
    order_code: String,
    lines: Vec<OrderLine>,
    total_amount: Decimal,
    payment_method: PaymentMethod,
    status: OrderStatus,
    created_at: DateTime<Utc>,
}

impl OrderAggregate {
    /// Creates a draft order from priced lines.
    ///
    /// Rejects an empty order and non-positive quantities. The total is the
    /// sum of the line totals.
    pub fn draft(
        id: OrderId,
        tenant_id: TenantId,
        customer_id: CustomerId,
        payment_method: PaymentMethod,
        lines: Vec<OrderLine>,
        created_at: DateTime<Utc>,
    ) -> Result<Self, ValidationError> {
        if lines.is_empty() {
            return Err(ValidationError::NoLines);
        }

        if let Some(line) = lines.iter().find(|l| l.quantity <= Decimal::ZERO) {
            return Err(ValidationError::InvalidQuantity {
                product_id: line.product_id,
                quantity: line.quantity,
            });
        }

        let total_amount = lines.iter().map(OrderLine::line_total).sum();

        Ok(Self {
            id,
            tenant_id,
            customer_id,
            order_code: order_code(id, created_at),
            lines,
            total_amount,
            payment_method,
            status: OrderStatus::Draft,
            created_at,
        })
    }

    /// Rebuilds a persisted order.
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn restore(
        id: OrderId,
        tenant_id: TenantId,
        customer_id: CustomerId,
        order_code: String,
        lines: Vec<OrderLine>,
        total_amount: Decimal,
        payment_method: PaymentMethod,
        status: OrderStatus,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            tenant_id,
            customer_id,
            order_code,
            lines,
            total_amount,
            payment_method,
            status,
            created_at,
        }
    }

    /// Moves the order from `Draft` to `Confirmed`.
    pub fn confirm(&mut self) -> Result<(), OrderError> {
        if !self.status.can_confirm() {
            return Err(OrderError::InvalidStateTransition {
                current: self.status,
                action: "confirm",
            });
        }
        self.status = OrderStatus::Confirmed;
        Ok(())
    }

    /// Builds the integration event announcing this order.
    pub fn to_created_event(&self, message_id: MessageId) -> OrderCreated {
        OrderCreated {
            message_id,
            order_id: self.id,
            order_code: self.order_code.clone(),
            tenant_id: self.tenant_id,
            total_amount: self.total_amount,
            created_at: self.created_at,
            items: self
                .lines
                .iter()
                .map(|line| OrderCreatedItem {
                    product_id: line.product_id,
                    unit_id: line.unit_id,
                    quantity: line.quantity,
                })
                .collect(),
        }
    }
}

// Query methods
impl OrderAggregate {
    pub fn id(&self) -> OrderId {
        self.id
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn order_code(&self) -> &str {
        &self.order_code
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    pub fn total_amount(&self) -> Decimal {
        self.total_amount
    }

    pub fn payment_method(&self) -> PaymentMethod {
        self.payment_method
    }

    /// Returns true if the order is paid on credit.
    pub fn is_debt(&self) -> bool {
        self.payment_method.is_debt()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Human-readable order code: `ORD-yyyyMMddHHmmss-XXXXXX`.
///
/// The suffix is the first six hex digits of the order id; the timestamp
/// alone repeats for orders placed in the same second.
pub fn order_code(id: OrderId, created_at: DateTime<Utc>) -> String {
    let hex = id.as_uuid().simple().to_string();
    format!(
        "ORD-{}-{}",
        created_at.format("%Y%m%d%H%M%S"),
        hex[..6].to_uppercase()
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn line(product: i32, quantity: i64, price: i64) -> OrderLine {
        OrderLine::new(
            ProductId::new(product),
            UnitId::new(1),
            Decimal::from(quantity),
            Decimal::from(price),
        )
    }

    fn draft(lines: Vec<OrderLine>) -> Result<OrderAggregate, ValidationError> {
        OrderAggregate::draft(
            OrderId::new(),
            TenantId::new(),
            CustomerId::new(),
            PaymentMethod::Cash,
            lines,
            Utc::now(),
        )
    }

    #[test]
    fn test_draft_computes_total() {
        let order = draft(vec![line(1, 5, 1000), line(2, 2, 250)]).unwrap();

        assert_eq!(order.total_amount(), Decimal::from(5500));
        assert_eq!(order.status(), OrderStatus::Draft);
        assert_eq!(order.lines().len(), 2);
    }

    #[test]
    fn test_draft_handles_fractional_quantities() {
        let order = draft(vec![OrderLine::new(
            ProductId::new(1),
            UnitId::new(2),
            Decimal::new(15, 1),
            Decimal::new(1999, 2),
        )])
        .unwrap();

        assert_eq!(order.total_amount(), Decimal::new(29985, 3));
    }

    #[test]
    fn test_empty_order_is_rejected() {
        assert_eq!(draft(vec![]).unwrap_err(), ValidationError::NoLines);
    }

    #[test]
    fn test_non_positive_quantity_is_rejected() {
        let err = draft(vec![line(1, 1, 10), line(7, 0, 10)]).unwrap_err();
        assert_eq!(
            err,
            ValidationError::InvalidQuantity {
                product_id: ProductId::new(7),
                quantity: Decimal::ZERO,
            }
        );

        assert!(draft(vec![line(1, -3, 10)]).is_err());
    }

    #[test]
    fn test_confirm_only_once() {
        let mut order = draft(vec![line(1, 1, 10)]).unwrap();

        order.confirm().unwrap();
        assert_eq!(order.status(), OrderStatus::Confirmed);

        let err = order.confirm().unwrap_err();
        assert!(matches!(
            err,
            OrderError::InvalidStateTransition {
                current: OrderStatus::Confirmed,
                action: "confirm"
            }
        ));
    }

    #[test]
    fn test_created_event_mirrors_order() {
        let order = draft(vec![line(1, 5, 1000)]).unwrap();
        let message_id = MessageId::new();

        let event = order.to_created_event(message_id);

        assert_eq!(event.message_id, message_id);
        assert_eq!(event.order_id, order.id());
        assert_eq!(event.order_code, order.order_code());
        assert_eq!(event.tenant_id, order.tenant_id());
        assert_eq!(event.total_amount, order.total_amount());
        assert_eq!(event.items.len(), 1);
        assert_eq!(event.items[0].quantity, Decimal::from(5));
    }

    #[test]
    fn test_order_code_format() {
        let id = OrderId::from_uuid(Uuid::parse_str("a1b2c3d4-0000-4000-8000-000000000000").unwrap());
        let at = Utc.with_ymd_and_hms(2026, 3, 9, 14, 5, 7).unwrap();

        assert_eq!(order_code(id, at), "ORD-20260309140507-A1B2C3");
    }

    #[test]
    fn test_order_codes_differ_within_same_second() {
        let at = Utc::now();
        assert_ne!(order_code(OrderId::new(), at), order_code(OrderId::new(), at));
    }
}
