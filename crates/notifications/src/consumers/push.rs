use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::OrderCreated;
use messaging::{InboxStore, MessageHandler};

use crate::directory::DeviceDirectory;
use crate::error::NotificationError;
use crate::push::{PushGateway, PushNotification, token_suffix};

/// Consumer group and inbox partition of the push consumer.
pub const PUSH_CONSUMER: &str = "push";

/// Builds the notification sent to a tenant owner for a new order.
pub fn new_order_notification(event: &OrderCreated) -> PushNotification {
    PushNotification {
        title: "New order".to_string(),
        body: format!(
            "Order {} was placed for {}",
            event.order_code, event.total_amount
        ),
        data: BTreeMap::from([
            ("orderId".to_string(), event.order_id.to_string()),
            ("orderCode".to_string(), event.order_code.clone()),
            ("type".to_string(), "new_order".to_string()),
        ]),
    }
}

/// Sends a push notification to every device of the tenant owner.
///
/// Gated by the inbox: a message id is notified at most once. Failures for
/// individual devices are logged and do not fail the message.
pub struct PushConsumer {
    inbox: Arc<dyn InboxStore>,
    directory: Arc<dyn DeviceDirectory>,
    gateway: Arc<dyn PushGateway>,
}

impl PushConsumer {
    pub fn new(
        inbox: Arc<dyn InboxStore>,
        directory: Arc<dyn DeviceDirectory>,
        gateway: Arc<dyn PushGateway>,
    ) -> Self {
        Self {
            inbox,
            directory,
            gateway,
        }
    }

    /// Returns the number of devices that accepted the push.
    async fn notify_owner(&self, event: &OrderCreated) -> Result<usize, NotificationError> {
        let Some(owner) = self.directory.owner_for_tenant(event.tenant_id).await? else {
            tracing::info!(tenant_id = %event.tenant_id, "Tenant has no owner, nothing to push");
            return Ok(0);
        };

        let devices = self.directory.tokens_for_user(owner).await?;
        if devices.is_empty() {
            tracing::info!(user_id = %owner, "Owner has no registered devices");
            return Ok(0);
        }

        let notification = new_order_notification(event);
        let mut sent = 0;

        for device in &devices {
            match self.gateway.send(&device.token, &notification).await {
                Ok(()) => {
                    sent += 1;
                    metrics::counter!("push_sent_total").increment(1);
                }
                Err(e) => {
                    metrics::counter!("push_failed_total").increment(1);
                    tracing::warn!(
                        device = %token_suffix(&device.token),
                        platform = %device.platform,
                        error = %e,
                        "Push delivery failed"
                    );
                }
            }
        }

        Ok(sent)
    }
}

#[async_trait]
impl MessageHandler<OrderCreated> for PushConsumer {
    type Error = NotificationError;

    fn name(&self) -> &'static str {
        PUSH_CONSUMER
    }

    #[tracing::instrument(skip(self, event), fields(message_id = %event.message_id, order_id = %event.order_id))]
    async fn handle(&self, event: OrderCreated) -> Result<(), NotificationError> {
        let Some(claim) = self.inbox.claim(PUSH_CONSUMER, event.message_id).await? else {
            tracing::debug!("Already processed");
            return Ok(());
        };

        let sent = self.notify_owner(&event).await?;
        claim.commit().await?;

        tracing::info!(sent, "Order push notifications sent");
        Ok(())
    }
}
