//! Runs a message handler against a broker subscription.
//!
//! Each delivery is decoded and handled on its own task, bounded by a
//! semaphore. A successful handler acknowledges the delivery; a failing one
//! negatively acknowledges it with requeue so the broker redelivers it. A
//! payload that does not decode is rejected without requeue.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde::de::DeserializeOwned;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::{
    Result,
    broker::{Broker, Delivery},
};

/// Handles decoded messages for one consumer group.
#[async_trait]
pub trait MessageHandler<E>: Send + Sync + 'static {
    /// Error returned when a message could not be applied.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Consumer group name. Also the inbox partition key.
    fn name(&self) -> &'static str;

    /// Applies one message. Must be idempotent per message id.
    async fn handle(&self, event: E) -> std::result::Result<(), Self::Error>;
}

/// Configuration for [`run_consumer`].
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Maximum deliveries handled concurrently.
    pub concurrency: usize,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self { concurrency: 8 }
    }
}

/// Outcome of handling a single delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Processed,
    Retried,
    Rejected,
}

impl DeliveryOutcome {
    fn as_str(self) -> &'static str {
        match self {
            Self::Processed => "processed",
            Self::Retried => "retried",
            Self::Rejected => "rejected",
        }
    }
}

/// Decodes, handles and settles one delivery.
pub async fn handle_delivery<E, H>(handler: &H, delivery: Delivery) -> DeliveryOutcome
where
    E: DeserializeOwned + Send + 'static,
    H: MessageHandler<E> + ?Sized,
{
    let consumer = handler.name();

    let outcome = match serde_json::from_slice::<E>(&delivery.payload) {
        Err(e) => {
            tracing::error!(
                consumer,
                message_id = ?delivery.message_id,
                error = %e,
                "Undecodable message rejected"
            );
            settle(delivery.nack(false).await, consumer);
            DeliveryOutcome::Rejected
        }
        Ok(event) => match handler.handle(event).await {
            Ok(()) => {
                settle(delivery.ack().await, consumer);
                DeliveryOutcome::Processed
            }
            Err(e) => {
                tracing::error!(
                    consumer,
                    message_id = ?delivery.message_id,
                    redelivered = delivery.redelivered,
                    error = %e,
                    "Handler failed, message requeued"
                );
                settle(delivery.nack(true).await, consumer);
                DeliveryOutcome::Retried
            }
        },
    };

    metrics::counter!("consumer_messages_total", "consumer" => consumer, "outcome" => outcome.as_str())
        .increment(1);
    outcome
}

fn settle(result: Result<()>, consumer: &str) {
    if let Err(e) = result {
        // The broker redelivers unsettled messages, so this is not fatal.
        tracing::warn!(consumer, error = %e, "Failed to settle delivery");
    }
}

/// Subscribes `handler` to `routing_key` and processes deliveries until
/// `shutdown` is cancelled.
///
/// On shutdown no new deliveries are taken and in-flight ones are awaited.
pub async fn run_consumer<E, H>(
    broker: Arc<dyn Broker>,
    handler: Arc<H>,
    routing_key: &str,
    config: ConsumerConfig,
    shutdown: CancellationToken,
) -> Result<()>
where
    E: DeserializeOwned + Send + 'static,
    H: MessageHandler<E>,
{
    let consumer = handler.name();
    let mut subscription = broker.subscribe(consumer, routing_key).await?;
    let concurrency = config.concurrency.max(1);
    let permits = Arc::new(Semaphore::new(concurrency));

    tracing::info!(consumer, routing_key, concurrency, "Consumer started");

    loop {
        let permit = tokio::select! {
            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => break,
            },
            _ = shutdown.cancelled() => break,
        };

        let delivery = tokio::select! {
            next = subscription.next() => match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    tracing::error!(consumer, error = %e, "Subscription error");
                    if e.is_transient() {
                        continue;
                    }
                    return Err(e);
                }
                None => {
                    tracing::warn!(consumer, "Subscription ended");
                    break;
                }
            },
            _ = shutdown.cancelled() => break,
        };

        let handler = handler.clone();
        tokio::spawn(async move {
            handle_delivery::<E, H>(handler.as_ref(), delivery).await;
            drop(permit);
        });
    }

    // Wait for in-flight handlers.
    let _ = permits.acquire_many(concurrency as u32).await;
    tracing::info!(consumer, "Consumer stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InProcessBroker, MessageId, broker::BrokerMessage};
    use serde::Deserialize;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Debug, Deserialize)]
    struct Ping {
        fail: bool,
    }

    #[derive(Debug, thiserror::Error)]
    #[error("handler failed")]
    struct Boom;

    #[derive(Default)]
    struct Recorder {
        handled: AtomicUsize,
        failed_once: AtomicUsize,
    }

    #[async_trait]
    impl MessageHandler<Ping> for Recorder {
        type Error = Boom;

        fn name(&self) -> &'static str {
            "recorder"
        }

        async fn handle(&self, event: Ping) -> std::result::Result<(), Boom> {
            if event.fail && self.failed_once.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(Boom);
            }
            self.handled.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn ping(fail: bool) -> BrokerMessage {
        BrokerMessage {
            routing_key: "ping".to_string(),
            message_id: MessageId::new(),
            event_type: "Ping".to_string(),
            payload: serde_json::to_vec(&serde_json::json!({ "fail": fail })).unwrap(),
        }
    }

    async fn wait_for(condition: impl Fn() -> bool) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while !condition() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn handles_deliveries_and_retries_failures() {
        let broker = InProcessBroker::default();
        let handler = Arc::new(Recorder::default());
        let shutdown = CancellationToken::new();

        broker.declare("recorder", "ping").await;
        broker.publish(ping(false)).await.unwrap();
        broker.publish(ping(true)).await.unwrap();

        let task = {
            let broker: Arc<dyn Broker> = Arc::new(broker.clone());
            let handler = handler.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                run_consumer::<Ping, _>(broker, handler, "ping", ConsumerConfig::default(), shutdown)
                    .await
            })
        };

        wait_for(|| handler.handled.load(Ordering::SeqCst) == 2).await;
        assert_eq!(handler.failed_once.load(Ordering::SeqCst), 2);

        shutdown.cancel();
        task.await.unwrap().unwrap();
        assert_eq!(broker.depth("recorder").await, 0);
    }

    #[tokio::test]
    async fn undecodable_payload_is_rejected() {
        let broker = InProcessBroker::default();
        let mut sub = broker.subscribe("recorder", "ping").await.unwrap();
        let mut bad = ping(false);
        bad.payload = b"not json".to_vec();
        broker.publish(bad).await.unwrap();

        let delivery = sub.next().await.unwrap().unwrap();
        let outcome = handle_delivery::<Ping, _>(&Recorder::default(), delivery).await;

        assert_eq!(outcome, DeliveryOutcome::Rejected);
        assert_eq!(broker.dead_letters("recorder").await.len(), 1);
    }
}
