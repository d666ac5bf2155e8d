use std::sync::Arc;

use async_trait::async_trait;
use common::OrderCreated;
use messaging::MessageHandler;
use serde_json::json;

use crate::error::NotificationError;
use crate::hub::{NotificationHub, tenant_admins_group};

/// Consumer group of the dashboard fan-out.
pub const FANOUT_CONSUMER: &str = "dashboard";

/// Forwards new orders to the tenant's connected administrators.
///
/// Not inbox-gated; a redelivery shows the toast twice.
pub struct OrderFanoutConsumer {
    hub: Arc<NotificationHub>,
}

impl OrderFanoutConsumer {
    pub fn new(hub: Arc<NotificationHub>) -> Self {
        Self { hub }
    }
}

#[async_trait]
impl MessageHandler<OrderCreated> for OrderFanoutConsumer {
    type Error = NotificationError;

    fn name(&self) -> &'static str {
        FANOUT_CONSUMER
    }

    #[tracing::instrument(skip(self, event), fields(message_id = %event.message_id, order_id = %event.order_id))]
    async fn handle(&self, event: OrderCreated) -> Result<(), NotificationError> {
        let message = format!(
            "New order {} from store {} totalling {} was created",
            event.order_code, event.tenant_id, event.total_amount
        );
        let payload = json!({
            "orderId": event.order_id,
            "orderCode": event.order_code,
            "tenantId": event.tenant_id,
            "totalAmount": event.total_amount,
            "createdAt": event.created_at,
            "message": message,
        });

        let delivered = self.hub.broadcast(
            &tenant_admins_group(event.tenant_id),
            "OrderCreated",
            payload,
        );

        tracing::debug!(delivered, "Order fanned out to admins");
        Ok(())
    }
}
