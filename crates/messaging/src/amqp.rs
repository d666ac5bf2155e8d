//! AMQP (RabbitMQ) broker implementation.
//!
//! Messages go to a durable topic exchange keyed by routing key. Each
//! consumer group owns a durable quorum queue bound to that key, so groups
//! receive independent copies and instances of one group compete. Publisher
//! confirms are the acknowledgment the outbox waits for. Publishes are
//! mandatory: a message no queue is bound for comes back and counts as
//! unconfirmed. The queue's `x-delivery-limit` bounds redeliveries, after
//! which the message moves to the group's dead-letter queue.

use async_trait::async_trait;
use futures_util::StreamExt;
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions,
        BasicQosOptions, ConfirmSelectOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    publisher_confirm::Confirmation,
    types::{AMQPValue, FieldTable},
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    MessageId, MessagingError, Result,
    broker::{Acker, Broker, BrokerMessage, Delivery, Subscription},
};

/// Configuration for the AMQP connection and topology.
#[derive(Debug, Clone)]
pub struct AmqpConfig {
    /// AMQP connection URL (e.g., amqp://localhost:5672).
    pub url: String,
    /// Topic exchange messages are published to.
    pub exchange: String,
    /// Unacknowledged deliveries per subscription.
    pub prefetch: u16,
    /// Deliveries after which the broker drops or dead-letters a message.
    pub max_deliveries: u32,
}

impl AmqpConfig {
    /// Creates a config with the default exchange and limits.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            exchange: "pipeline.events".to_string(),
            prefetch: 8,
            max_deliveries: 10,
        }
    }
}

/// RabbitMQ-backed implementation of [`Broker`].
pub struct AmqpBroker {
    connection: Connection,
    publisher: Mutex<Channel>,
    config: AmqpConfig,
}

impl AmqpBroker {
    /// Connects, declares the exchange and opens a confirming publish channel.
    pub async fn connect(config: AmqpConfig) -> Result<Self> {
        let connection = Connection::connect(&config.url, ConnectionProperties::default()).await?;

        let publisher = Self::open_publisher(&connection, &config.exchange).await?;

        info!(exchange = %config.exchange, "Connected to AMQP broker");

        Ok(Self {
            connection,
            publisher: Mutex::new(publisher),
            config,
        })
    }

    async fn open_publisher(connection: &Connection, exchange: &str) -> Result<Channel> {
        let channel = connection.create_channel().await?;
        channel
            .exchange_declare(
                exchange,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await?;
        Ok(channel)
    }

    /// Returns the publish channel, reopening it if the broker closed it.
    async fn publisher(&self) -> Result<Channel> {
        let mut channel = self.publisher.lock().await;
        if !channel.status().connected() {
            debug!("Publish channel closed, reopening");
            *channel = Self::open_publisher(&self.connection, &self.config.exchange).await?;
        }
        Ok(channel.clone())
    }

    /// Declares a group's queue, binds it to `routing_key` and sets up its
    /// dead-letter exchange and queue. Idempotent.
    async fn declare_topology(
        &self,
        channel: &Channel,
        group: &str,
        routing_key: &str,
    ) -> Result<()> {
        let dlx = dead_letter_exchange(group);
        let dead = dead_letter_queue(group);

        channel
            .exchange_declare(
                &dlx,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_declare(
                &dead,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;
        channel
            .queue_bind(&dead, &dlx, "", QueueBindOptions::default(), FieldTable::default())
            .await?;

        channel
            .queue_declare(
                group,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                queue_arguments(group, self.config.max_deliveries),
            )
            .await?;
        channel
            .queue_bind(
                group,
                &self.config.exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        debug!(
            queue = %group,
            routing_key = %routing_key,
            dead_letters = %dead,
            "Declared AMQP group queue"
        );
        Ok(())
    }
}

/// Exchange a group's exhausted messages are dead-lettered to.
fn dead_letter_exchange(group: &str) -> String {
    format!("{group}.dlx")
}

/// Queue holding a group's dead letters.
fn dead_letter_queue(group: &str) -> String {
    format!("{group}.dead")
}

/// Arguments of a consumer group queue: quorum type with a redelivery cap
/// and a dead-letter exchange.
fn queue_arguments(group: &str, max_deliveries: u32) -> FieldTable {
    let mut args = FieldTable::default();
    args.insert("x-queue-type".into(), AMQPValue::LongString("quorum".into()));
    args.insert(
        "x-delivery-limit".into(),
        AMQPValue::LongInt(i32::try_from(max_deliveries).unwrap_or(i32::MAX)),
    );
    args.insert(
        "x-dead-letter-exchange".into(),
        AMQPValue::LongString(dead_letter_exchange(group).into()),
    );
    args
}

/// Maps a publisher confirm to the outcome the outbox acts on.
///
/// Only a plain ack counts: a returned (unroutable) message is acked by
/// the broker but reached no queue.
fn confirm_outcome(message_id: MessageId, confirmation: Confirmation) -> Result<()> {
    match confirmation {
        Confirmation::Ack(None) => Ok(()),
        Confirmation::Ack(Some(returned)) => {
            warn!(
                %message_id,
                reply_code = returned.reply_code,
                reply_text = returned.reply_text.as_str(),
                "Message returned unroutable, no queue is bound for it"
            );
            Err(MessagingError::NotConfirmed(message_id))
        }
        Confirmation::Nack(_) | Confirmation::NotRequested => {
            Err(MessagingError::NotConfirmed(message_id))
        }
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    #[tracing::instrument(skip(self, message), fields(routing_key = %message.routing_key, message_id = %message.message_id))]
    async fn publish(&self, message: BrokerMessage) -> Result<()> {
        let channel = self.publisher().await?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2) // persistent
            .with_message_id(message.message_id.to_string().into())
            .with_kind(message.event_type.clone().into());

        let confirmation = channel
            .basic_publish(
                &self.config.exchange,
                &message.routing_key,
                BasicPublishOptions {
                    mandatory: true,
                    ..Default::default()
                },
                &message.payload,
                properties,
            )
            .await?
            .await?;

        confirm_outcome(message.message_id, confirmation)
    }

    async fn declare_group(&self, group: &str, routing_key: &str) -> Result<()> {
        let channel = self.connection.create_channel().await?;
        self.declare_topology(&channel, group, routing_key).await?;
        channel.close(200, "declared").await?;
        Ok(())
    }

    async fn subscribe(&self, group: &str, routing_key: &str) -> Result<Subscription> {
        let channel = self.connection.create_channel().await?;
        channel
            .basic_qos(self.config.prefetch, BasicQosOptions::default())
            .await?;

        self.declare_topology(&channel, group, routing_key).await?;

        let consumer = channel
            .basic_consume(
                group,
                &format!("{group}-{}", Uuid::new_v4()),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %group, routing_key = %routing_key, "Subscribed to AMQP queue");

        let stream = consumer.map(|delivery| -> Result<Delivery> {
            let delivery = delivery?;
            let message_id = delivery
                .properties
                .message_id()
                .as_ref()
                .and_then(|id| Uuid::parse_str(id.as_str()).ok())
                .map(MessageId::from_uuid);
            let event_type = delivery
                .properties
                .kind()
                .as_ref()
                .map(|kind| kind.as_str().to_string());

            Ok(Delivery::new(
                message_id,
                event_type,
                delivery.data,
                delivery.redelivered,
                Box::new(AmqpAcker(delivery.acker)),
            ))
        });

        Ok(Box::pin(stream))
    }
}

struct AmqpAcker(lapin::acker::Acker);

#[async_trait]
impl Acker for AmqpAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        self.0.ack(BasicAckOptions::default()).await?;
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<()> {
        self.0
            .nack(BasicNackOptions {
                requeue,
                ..Default::default()
            })
            .await?;
        Ok(())
    }
}
