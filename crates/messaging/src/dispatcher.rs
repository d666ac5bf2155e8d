//! Outbox dispatcher: drains undispatched outbox rows into the broker.
//!
//! Each poll leases a batch of rows to this instance, publishes them with
//! bounded parallelism and marks a row dispatched only after the broker
//! acknowledged it. A failed publish leaves the lease to expire so the row
//! is retried by whichever instance polls next.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

use crate::{
    Result,
    broker::{Broker, BrokerMessage, routing_key},
    outbox::{OutboxMessage, OutboxStore},
};

/// Configuration for [`OutboxDispatcher`].
#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Delay between polls when the previous batch was not full.
    pub poll_interval: Duration,
    /// How long a leased row is reserved for this instance.
    pub lease: Duration,
    /// Maximum rows leased per poll.
    pub batch_size: usize,
    /// Maximum concurrent publishes within a batch.
    pub parallelism: usize,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(1000),
            lease: Duration::from_secs(30),
            batch_size: 50,
            parallelism: 4,
        }
    }
}

/// Outcome of a single dispatch cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchReport {
    /// Rows leased by this cycle.
    pub locked: usize,
    /// Rows the broker acknowledged and that were marked dispatched.
    pub dispatched: usize,
    /// Rows whose publish failed; their lease is left to expire.
    pub failed: usize,
}

/// Background publisher for outbox rows.
pub struct OutboxDispatcher {
    store: Arc<dyn OutboxStore>,
    broker: Arc<dyn Broker>,
    instance_id: String,
    config: DispatcherConfig,
}

impl OutboxDispatcher {
    /// Creates a dispatcher identified by `instance_id` in row leases.
    ///
    /// A batch size or parallelism of zero is raised to one.
    pub fn new(
        store: Arc<dyn OutboxStore>,
        broker: Arc<dyn Broker>,
        instance_id: impl Into<String>,
        mut config: DispatcherConfig,
    ) -> Self {
        config.batch_size = config.batch_size.max(1);
        config.parallelism = config.parallelism.max(1);
        Self {
            store,
            broker,
            instance_id: instance_id.into(),
            config,
        }
    }

    /// The id written to `locked_by` for rows leased by this dispatcher.
    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    /// Runs one dispatch cycle at the current time.
    pub async fn poll_once(&self) -> Result<DispatchReport> {
        self.dispatch_at(Utc::now()).await
    }

    /// Runs one dispatch cycle as if the current time were `now`.
    #[tracing::instrument(skip(self), fields(instance_id = %self.instance_id))]
    pub async fn dispatch_at(&self, now: DateTime<Utc>) -> Result<DispatchReport> {
        let lease = chrono::Duration::from_std(self.config.lease)
            .unwrap_or_else(|_| chrono::Duration::seconds(30));

        let batch = self
            .store
            .lock_batch(&self.instance_id, self.config.batch_size, lease, now)
            .await?;

        let mut report = DispatchReport {
            locked: batch.len(),
            ..Default::default()
        };
        if batch.is_empty() {
            return Ok(report);
        }

        metrics::histogram!("outbox_dispatch_batch_size").record(batch.len() as f64);

        let outcomes: Vec<bool> = futures_util::stream::iter(batch)
            .map(|message| self.publish_one(message, now))
            .buffer_unordered(self.config.parallelism)
            .collect()
            .await;

        for dispatched in outcomes {
            if dispatched {
                report.dispatched += 1;
            } else {
                report.failed += 1;
            }
        }

        tracing::debug!(
            locked = report.locked,
            dispatched = report.dispatched,
            failed = report.failed,
            "Dispatch cycle finished"
        );

        Ok(report)
    }

    async fn publish_one(&self, message: OutboxMessage, now: DateTime<Utc>) -> bool {
        let payload = match serde_json::to_vec(&message.payload) {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(message_id = %message.id, error = %e, "Failed to encode outbox payload");
                metrics::counter!("outbox_publish_failures_total").increment(1);
                return false;
            }
        };

        let outgoing = BrokerMessage {
            routing_key: routing_key(&message.aggregate_type),
            message_id: message.id,
            event_type: message.event_type.clone(),
            payload,
        };

        if let Err(e) = self.broker.publish(outgoing).await {
            tracing::warn!(
                message_id = %message.id,
                attempts = message.attempts,
                error = %e,
                "Publish failed, row will be retried after its lease expires"
            );
            metrics::counter!("outbox_publish_failures_total").increment(1);
            return false;
        }

        // The broker has the message; a failure here only means it may be
        // published again, which consumers tolerate.
        if let Err(e) = self.store.mark_dispatched(message.id, now).await {
            tracing::error!(message_id = %message.id, error = %e, "Failed to mark outbox row dispatched");
            metrics::counter!("outbox_publish_failures_total").increment(1);
            return false;
        }

        metrics::counter!("outbox_dispatched_total").increment(1);
        true
    }

    /// Polls until `shutdown` is cancelled.
    ///
    /// A full batch is followed immediately by another poll; otherwise the
    /// dispatcher sleeps for the poll interval. The batch in progress when
    /// shutdown is requested is finished first.
    pub async fn run(&self, shutdown: CancellationToken) {
        tracing::info!(instance_id = %self.instance_id, "Outbox dispatcher started");

        loop {
            let backlog = match self.poll_once().await {
                Ok(report) => report.locked == self.config.batch_size,
                Err(e) => {
                    tracing::error!(error = %e, "Outbox poll failed");
                    false
                }
            };

            if backlog && !shutdown.is_cancelled() {
                continue;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.cancelled() => {
                    tracing::info!(instance_id = %self.instance_id, "Outbox dispatcher stopped");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{InMemoryOutboxStore, InProcessBroker, MessageId};
    use crate::AggregateId;
    use async_trait::async_trait;
    use common::{OrderCreated, OrderId, TenantId};
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Counts lease attempts against an in-memory store.
    #[derive(Clone, Default)]
    struct CountingStore {
        inner: InMemoryOutboxStore,
        lock_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl OutboxStore for CountingStore {
        async fn lock_batch(
            &self,
            instance_id: &str,
            batch_size: usize,
            lease: chrono::Duration,
            now: DateTime<Utc>,
        ) -> Result<Vec<OutboxMessage>> {
            self.lock_calls.fetch_add(1, Ordering::SeqCst);
            self.inner
                .lock_batch(instance_id, batch_size, lease, now)
                .await
        }

        async fn mark_dispatched(&self, id: MessageId, now: DateTime<Utc>) -> Result<()> {
            self.inner.mark_dispatched(id, now).await
        }

        async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>> {
            self.inner.get(id).await
        }

        async fn for_aggregate(&self, aggregate_id: AggregateId) -> Result<Vec<OutboxMessage>> {
            self.inner.for_aggregate(aggregate_id).await
        }

        async fn pending_count(&self) -> Result<u64> {
            self.inner.pending_count().await
        }

        async fn prune_dispatched(&self, older_than: DateTime<Utc>) -> Result<u64> {
            self.inner.prune_dispatched(older_than).await
        }

        async fn replay(&self, id: MessageId) -> Result<()> {
            self.inner.replay(id).await
        }
    }

    fn order_message(occurred_at: DateTime<Utc>) -> OutboxMessage {
        let event = OrderCreated {
            message_id: MessageId::new(),
            order_id: OrderId::new(),
            order_code: "ORD-test".to_string(),
            tenant_id: TenantId::new(),
            total_amount: Default::default(),
            created_at: occurred_at,
            items: vec![],
        };
        OutboxMessage::from_event(event.order_id, &event, occurred_at).unwrap()
    }

    fn dispatcher(
        store: &InMemoryOutboxStore,
        broker: &InProcessBroker,
        instance_id: &str,
    ) -> OutboxDispatcher {
        OutboxDispatcher::new(
            Arc::new(store.clone()),
            Arc::new(broker.clone()),
            instance_id,
            DispatcherConfig::default(),
        )
    }

    #[tokio::test]
    async fn publishes_and_marks_rows_dispatched() {
        let store = InMemoryOutboxStore::new();
        let broker = InProcessBroker::default();
        let mut sub = broker.subscribe("inventory", "order").await.unwrap();
        let message = order_message(Utc::now());
        store.insert(message.clone()).await;

        let report = dispatcher(&store, &broker, "a").poll_once().await.unwrap();

        assert_eq!(
            report,
            DispatchReport {
                locked: 1,
                dispatched: 1,
                failed: 0
            }
        );
        let row = store.get(message.id).await.unwrap().unwrap();
        assert!(row.is_dispatched());

        let delivery = sub.next().await.unwrap().unwrap();
        assert_eq!(delivery.message_id, Some(message.id));
        assert_eq!(delivery.event_type.as_deref(), Some("OrderCreated"));
        let payload: serde_json::Value = serde_json::from_slice(&delivery.payload).unwrap();
        assert_eq!(payload, message.payload);
    }

    #[tokio::test]
    async fn failed_publish_leaves_row_for_retry_after_lease() {
        let store = InMemoryOutboxStore::new();
        let broker = InProcessBroker::default();
        broker.declare("inventory", "order").await;
        let message = order_message(Utc::now());
        store.insert(message.clone()).await;
        broker.fail_next_publishes(1);

        let dispatcher = dispatcher(&store, &broker, "a");
        let now = Utc::now();
        let first = dispatcher.dispatch_at(now).await.unwrap();
        assert_eq!(first.failed, 1);
        assert!(!store.get(message.id).await.unwrap().unwrap().is_dispatched());

        // Still leased.
        let early = dispatcher
            .dispatch_at(now + chrono::Duration::seconds(1))
            .await
            .unwrap();
        assert_eq!(early.locked, 0);

        let retry = dispatcher
            .dispatch_at(now + chrono::Duration::seconds(31))
            .await
            .unwrap();
        assert_eq!(retry.dispatched, 1);
        assert_eq!(broker.depth("inventory").await, 1);

        let row = store.get(message.id).await.unwrap().unwrap();
        assert_eq!(row.attempts, 2);
    }

    #[tokio::test]
    async fn empty_outbox_is_a_no_op() {
        let store = InMemoryOutboxStore::new();
        let broker = InProcessBroker::default();

        let report = dispatcher(&store, &broker, "a").poll_once().await.unwrap();

        assert_eq!(report, DispatchReport::default());
        assert_eq!(broker.published_count(), 0);
    }

    #[tokio::test]
    async fn run_stops_on_cancellation() {
        let store = InMemoryOutboxStore::new();
        let broker = InProcessBroker::default();
        broker.declare("inventory", "order").await;
        store.insert(order_message(Utc::now())).await;

        let dispatcher = Arc::new(dispatcher(&store, &broker, "a"));
        let shutdown = CancellationToken::new();
        let handle = {
            let dispatcher = dispatcher.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { dispatcher.run(shutdown).await })
        };

        tokio::time::timeout(Duration::from_secs(2), async {
            while store.pending_count().await.unwrap() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn dispatched_at_uses_the_cycle_clock() {
        let store = InMemoryOutboxStore::new();
        let broker = InProcessBroker::default();
        broker.declare("inventory", "order").await;
        let message = order_message(Utc::now());
        store.insert(message.clone()).await;

        let now = Utc::now() + chrono::Duration::hours(2);
        dispatcher(&store, &broker, "a").dispatch_at(now).await.unwrap();

        let row = store.get(message.id).await.unwrap().unwrap();
        assert_eq!(row.dispatched_at, Some(now));
    }

    #[tokio::test]
    async fn zero_batch_size_still_dispatches() {
        let store = InMemoryOutboxStore::new();
        let broker = InProcessBroker::default();
        broker.declare("inventory", "order").await;
        store.insert(order_message(Utc::now())).await;

        let dispatcher = OutboxDispatcher::new(
            Arc::new(store.clone()),
            Arc::new(broker.clone()),
            "a",
            DispatcherConfig {
                batch_size: 0,
                parallelism: 0,
                ..DispatcherConfig::default()
            },
        );
        let report = dispatcher.poll_once().await.unwrap();

        assert_eq!(report.locked, 1);
        assert_eq!(report.dispatched, 1);
        assert_eq!(store.pending_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn zero_batch_size_sleeps_between_idle_polls() {
        let store = CountingStore::default();
        let broker = InProcessBroker::default();
        broker.declare("inventory", "order").await;
        store.inner.insert(order_message(Utc::now())).await;

        let dispatcher = Arc::new(OutboxDispatcher::new(
            Arc::new(store.clone()),
            Arc::new(broker.clone()),
            "a",
            DispatcherConfig {
                poll_interval: Duration::from_secs(5),
                batch_size: 0,
                ..DispatcherConfig::default()
            },
        ));
        let shutdown = CancellationToken::new();
        let handle = {
            let dispatcher = dispatcher.clone();
            let shutdown = shutdown.clone();
            tokio::spawn(async move { dispatcher.run(shutdown).await })
        };

        tokio::time::sleep(Duration::from_millis(300)).await;
        shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .unwrap()
            .unwrap();

        // One full batch of one row, then an empty poll before sleeping.
        assert_eq!(store.lock_calls.load(Ordering::SeqCst), 2);
        assert_eq!(store.inner.pending_count().await.unwrap(), 0);
    }
}
