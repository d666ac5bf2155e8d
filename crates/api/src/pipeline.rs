//! Assembles the stores, broker and background workers of the pipeline.

use std::sync::Arc;
use std::time::Duration;

use common::{IntegrationEvent, OrderCreated};
use inventory::{
    InMemoryInventoryStore, InventoryConsumer, InventoryConsumerConfig, InventoryStore,
    PostgresInventoryStore,
};
use messaging::{
    AmqpBroker, Broker, ConsumerConfig, DispatcherConfig, InMemoryInbox, InMemoryOutboxStore,
    InProcessBroker, InboxStore, MessageHandler, OutboxDispatcher, OutboxJanitor, OutboxStore,
    PostgresInbox, PostgresOutboxStore, routing_key, run_consumer, run_migrations,
};
use notifications::{
    DeviceDirectory, FANOUT_CONSUMER, HttpPushGateway, InMemoryDeviceDirectory,
    LoggingPushGateway, NotificationHub, OrderFanoutConsumer, PUSH_CONSUMER,
    PostgresDeviceDirectory, PushConsumer, PushGateway,
};
use orders::{
    HttpPriceLookup, InMemoryOrderStore, OrderService, PostgresOrderStore, PriceLookup,
    StaticPriceCatalog,
};
use sqlx::postgres::PgPoolOptions;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::AppState;
use crate::config::Config;
use crate::error::StartupError;

/// Consumer groups subscribed to `OrderCreated`.
pub const ORDER_CONSUMERS: [&str; 3] = [
    inventory::INVENTORY_CONSUMER,
    PUSH_CONSUMER,
    FANOUT_CONSUMER,
];

const JANITOR_INTERVAL: Duration = Duration::from_secs(3600);

/// Routing key `OrderCreated` is published under.
pub fn order_routing_key() -> String {
    routing_key(OrderCreated::AGGREGATE_TYPE)
}

/// Declares the queue of every `OrderCreated` consumer group.
pub async fn declare_order_groups(broker: &dyn Broker) -> messaging::Result<()> {
    let routing_key = order_routing_key();
    for group in ORDER_CONSUMERS {
        broker.declare_group(group, &routing_key).await?;
    }
    Ok(())
}

/// Settings for the background workers.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub instance_id: String,
    pub dispatcher: DispatcherConfig,
    pub consumer: ConsumerConfig,
    pub inventory: InventoryConsumerConfig,
    pub outbox_retention: Duration,
}

impl From<&Config> for WorkerConfig {
    fn from(config: &Config) -> Self {
        Self {
            instance_id: config.instance_id.clone(),
            dispatcher: config.dispatcher(),
            consumer: config.consumer(),
            inventory: config.inventory_consumer(),
            outbox_retention: config.outbox_retention(),
        }
    }
}

/// Every long-lived component of one process.
#[derive(Clone)]
pub struct Pipeline {
    pub orders: OrderService,
    pub outbox: Arc<dyn OutboxStore>,
    pub inbox: Arc<dyn InboxStore>,
    pub inventory: Arc<dyn InventoryStore>,
    pub directory: Arc<dyn DeviceDirectory>,
    pub push: Arc<dyn PushGateway>,
    pub broker: Arc<dyn Broker>,
    pub hub: Arc<NotificationHub>,
}

impl Pipeline {
    /// Connects the backends selected by `config`.
    pub async fn from_config(config: &Config) -> Result<Self, StartupError> {
        let prices = price_lookup(config)?;
        let push = push_gateway(config)?;
        let hub = Arc::new(NotificationHub::new());

        let broker: Arc<dyn Broker> = match config.amqp() {
            Some(amqp) => Arc::new(AmqpBroker::connect(amqp).await?),
            None => {
                tracing::warn!("BROKER_URL not set, using the in-process broker");
                Arc::new(InProcessBroker::new(config.in_process_broker()))
            }
        };
        // Before any dispatcher runs: publishes with no bound queue are refused.
        declare_order_groups(broker.as_ref()).await?;

        let Some(url) = &config.database_url else {
            tracing::warn!("DATABASE_URL not set, using in-memory stores");
            let outbox = InMemoryOutboxStore::new();
            let inbox = InMemoryInbox::new();
            let orders = OrderService::new(
                Arc::new(InMemoryOrderStore::new(outbox.clone())),
                prices,
            )
            .with_credit_limit(config.credit_limit);

            return Ok(Self {
                orders,
                outbox: Arc::new(outbox),
                inbox: Arc::new(inbox.clone()),
                inventory: Arc::new(InMemoryInventoryStore::new(inbox)),
                directory: Arc::new(InMemoryDeviceDirectory::new()),
                push,
                broker,
                hub,
            });
        };

        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .connect(url)
            .await?;
        run_migrations(&pool).await?;
        tracing::info!("Connected to PostgreSQL");

        let orders = OrderService::new(Arc::new(PostgresOrderStore::new(pool.clone())), prices)
            .with_credit_limit(config.credit_limit);

        Ok(Self {
            orders,
            outbox: Arc::new(PostgresOutboxStore::new(pool.clone())),
            inbox: Arc::new(PostgresInbox::new(pool.clone())),
            inventory: Arc::new(PostgresInventoryStore::new(pool.clone())),
            directory: Arc::new(PostgresDeviceDirectory::new(pool)),
            push,
            broker,
            hub,
        })
    }

    /// State shared by the HTTP handlers.
    pub fn app_state(&self) -> AppState {
        AppState {
            orders: self.orders.clone(),
            outbox: self.outbox.clone(),
            hub: self.hub.clone(),
        }
    }

    /// Builds an outbox dispatcher identified by `instance_id`.
    pub fn dispatcher(
        &self,
        instance_id: impl Into<String>,
        config: DispatcherConfig,
    ) -> OutboxDispatcher {
        OutboxDispatcher::new(self.outbox.clone(), self.broker.clone(), instance_id, config)
    }

    /// Spawns the dispatcher, the janitor and every `OrderCreated` consumer.
    ///
    /// The tasks stop once `shutdown` is cancelled; join the returned set to
    /// wait for in-flight work.
    pub fn spawn_workers(&self, config: WorkerConfig, shutdown: CancellationToken) -> JoinSet<()> {
        let mut workers = JoinSet::new();

        let dispatcher = self.dispatcher(config.instance_id.clone(), config.dispatcher.clone());
        let token = shutdown.clone();
        workers.spawn(async move { dispatcher.run(token).await });

        let janitor = OutboxJanitor::new(
            self.outbox.clone(),
            config.outbox_retention,
            JANITOR_INTERVAL,
        );
        let token = shutdown.clone();
        workers.spawn(async move { janitor.run(token).await });

        let inventory = InventoryConsumer::new(
            self.inventory.clone(),
            self.hub.clone(),
            config.inventory.clone(),
        );
        self.spawn_consumer(&mut workers, inventory, &config.consumer, &shutdown);

        let push = PushConsumer::new(
            self.inbox.clone(),
            self.directory.clone(),
            self.push.clone(),
        );
        self.spawn_consumer(&mut workers, push, &config.consumer, &shutdown);

        let fanout = OrderFanoutConsumer::new(self.hub.clone());
        self.spawn_consumer(&mut workers, fanout, &config.consumer, &shutdown);

        workers
    }

    fn spawn_consumer<H>(
        &self,
        workers: &mut JoinSet<()>,
        handler: H,
        config: &ConsumerConfig,
        shutdown: &CancellationToken,
    ) where
        H: MessageHandler<OrderCreated>,
    {
        let broker = self.broker.clone();
        let handler = Arc::new(handler);
        let config = config.clone();
        let shutdown = shutdown.clone();

        workers.spawn(async move {
            let consumer = handler.name();
            let routing_key = order_routing_key();
            let result =
                run_consumer::<OrderCreated, H>(broker, handler, &routing_key, config, shutdown)
                    .await;
            if let Err(e) = result {
                tracing::error!(consumer, error = %e, "Consumer stopped with an error");
            }
        });
    }
}

fn price_lookup(config: &Config) -> Result<Arc<dyn PriceLookup>, StartupError> {
    match &config.price_service_url {
        Some(url) => Ok(Arc::new(HttpPriceLookup::new(url.clone())?)),
        None => {
            tracing::warn!("PRICE_SERVICE_URL not set, every product is unpriced");
            Ok(Arc::new(StaticPriceCatalog::new()))
        }
    }
}

fn push_gateway(config: &Config) -> Result<Arc<dyn PushGateway>, StartupError> {
    match (&config.push_gateway_url, &config.push_gateway_key) {
        (Some(url), Some(key)) => Ok(Arc::new(HttpPushGateway::new(url.clone(), key.clone())?)),
        (Some(_), None) => Err(StartupError::MissingPushKey),
        (None, _) => {
            tracing::warn!("PUSH_GATEWAY_URL not set, push notifications are only logged");
            Ok(Arc::new(LoggingPushGateway))
        }
    }
}
