//! In-process broker for tests and single-node development.
//!
//! Keeps one queue per consumer group. A delivered message stays in flight
//! until it is acknowledged; if the visibility timeout passes first it goes
//! back to the queue. Messages that exceed `max_deliveries` are moved to the
//! group's dead-letter list.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

use crate::{
    MessagingError, Result,
    broker::{Acker, Broker, BrokerMessage, Delivery, Subscription},
};

/// How often an idle subscription re-checks its queue for expired leases.
const IDLE_POLL: Duration = Duration::from_millis(20);

/// Configuration for [`InProcessBroker`].
#[derive(Debug, Clone)]
pub struct InProcessBrokerConfig {
    /// Time a delivery may stay unacknowledged before it is redelivered.
    pub visibility_timeout: Duration,
    /// Deliveries after which a failing message is dead-lettered.
    pub max_deliveries: u32,
}

impl Default for InProcessBrokerConfig {
    fn default() -> Self {
        Self {
            visibility_timeout: Duration::from_secs(30),
            max_deliveries: 10,
        }
    }
}

#[derive(Clone)]
struct Queued {
    message: BrokerMessage,
    deliveries: u32,
}

struct InFlight {
    queued: Queued,
    deadline: Instant,
}

#[derive(Default)]
struct GroupQueue {
    ready: VecDeque<Queued>,
    in_flight: HashMap<u64, InFlight>,
    dead_letters: Vec<BrokerMessage>,
    notify: Arc<Notify>,
}

impl GroupQueue {
    fn requeue_expired(&mut self, now: Instant, max_deliveries: u32) {
        let expired: Vec<u64> = self
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(tag, _)| *tag)
            .collect();

        for tag in expired {
            if let Some(flight) = self.in_flight.remove(&tag) {
                tracing::debug!(
                    message_id = %flight.queued.message.message_id,
                    "Visibility timeout expired, redelivering"
                );
                self.settle_failed(flight.queued, true, max_deliveries);
            }
        }
    }

    fn settle_failed(&mut self, queued: Queued, requeue: bool, max_deliveries: u32) {
        if requeue && queued.deliveries < max_deliveries {
            self.ready.push_back(queued);
            self.notify.notify_one();
        } else {
            tracing::warn!(
                message_id = %queued.message.message_id,
                deliveries = queued.deliveries,
                "Message dead-lettered"
            );
            self.dead_letters.push(queued.message);
        }
    }
}

#[derive(Default)]
struct State {
    /// routing key -> bound consumer groups
    bindings: HashMap<String, HashSet<String>>,
    queues: HashMap<String, GroupQueue>,
    next_tag: u64,
}

struct Inner {
    config: InProcessBrokerConfig,
    state: Mutex<State>,
    published: AtomicUsize,
    failures_to_inject: AtomicUsize,
}

/// In-memory implementation of [`Broker`].
#[derive(Clone)]
pub struct InProcessBroker {
    inner: Arc<Inner>,
}

impl Default for InProcessBroker {
    fn default() -> Self {
        Self::new(InProcessBrokerConfig::default())
    }
}

impl InProcessBroker {
    /// Creates a new broker.
    pub fn new(config: InProcessBrokerConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: Mutex::new(State::default()),
                published: AtomicUsize::new(0),
                failures_to_inject: AtomicUsize::new(0),
            }),
        }
    }

    /// Makes the next `count` publishes fail as if the broker were down.
    pub fn fail_next_publishes(&self, count: usize) {
        self.inner.failures_to_inject.store(count, Ordering::SeqCst);
    }

    /// Number of successfully published messages.
    pub fn published_count(&self) -> usize {
        self.inner.published.load(Ordering::SeqCst)
    }

    /// Messages waiting in or in flight for a group.
    pub async fn depth(&self, group: &str) -> usize {
        let state = self.inner.state.lock().await;
        state
            .queues
            .get(group)
            .map(|q| q.ready.len() + q.in_flight.len())
            .unwrap_or(0)
    }

    /// Messages dead-lettered for a group.
    pub async fn dead_letters(&self, group: &str) -> Vec<BrokerMessage> {
        let state = self.inner.state.lock().await;
        state
            .queues
            .get(group)
            .map(|q| q.dead_letters.clone())
            .unwrap_or_default()
    }

    /// Declares a group's queue and binds it without subscribing.
    pub async fn declare(&self, group: &str, routing_key: &str) {
        let mut state = self.inner.state.lock().await;
        state.queues.entry(group.to_string()).or_default();
        state
            .bindings
            .entry(routing_key.to_string())
            .or_default()
            .insert(group.to_string());
    }

    async fn next_delivery(inner: &Arc<Inner>, group: &str) -> Result<Delivery> {
        loop {
            let notify = {
                let mut state = inner.state.lock().await;
                state.next_tag += 1;
                let tag = state.next_tag;

                let queue = state.queues.get_mut(group).ok_or_else(|| {
                    MessagingError::Broker(format!("queue for group {group} was removed"))
                })?;

                let now = Instant::now();
                queue.requeue_expired(now, inner.config.max_deliveries);

                if let Some(mut queued) = queue.ready.pop_front() {
                    queued.deliveries += 1;
                    let redelivered = queued.deliveries > 1;
                    let message = queued.message.clone();
                    queue.in_flight.insert(
                        tag,
                        InFlight {
                            queued,
                            deadline: now + inner.config.visibility_timeout,
                        },
                    );

                    let acker = InProcessAcker {
                        inner: inner.clone(),
                        group: group.to_string(),
                        tag,
                    };
                    return Ok(Delivery::new(
                        Some(message.message_id),
                        Some(message.event_type),
                        message.payload,
                        redelivered,
                        Box::new(acker),
                    ));
                }

                queue.notify.clone()
            };

            let _ = tokio::time::timeout(IDLE_POLL, notify.notified()).await;
        }
    }
}

#[async_trait]
impl Broker for InProcessBroker {
    async fn publish(&self, message: BrokerMessage) -> Result<()> {
        let injected = self
            .inner
            .failures_to_inject
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        if injected.is_ok() {
            return Err(MessagingError::Broker("broker unavailable".to_string()));
        }

        let mut state = self.inner.state.lock().await;
        let groups: Vec<String> = state
            .bindings
            .get(&message.routing_key)
            .map(|groups| groups.iter().cloned().collect())
            .unwrap_or_default();

        if groups.is_empty() {
            tracing::warn!(
                routing_key = %message.routing_key,
                message_id = %message.message_id,
                "No queue bound for routing key, message returned"
            );
            return Err(MessagingError::NotConfirmed(message.message_id));
        }

        for group in groups {
            if let Some(queue) = state.queues.get_mut(&group) {
                queue.ready.push_back(Queued {
                    message: message.clone(),
                    deliveries: 0,
                });
                queue.notify.notify_one();
            }
        }

        self.inner.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn declare_group(&self, group: &str, routing_key: &str) -> Result<()> {
        self.declare(group, routing_key).await;
        Ok(())
    }

    async fn subscribe(&self, group: &str, routing_key: &str) -> Result<Subscription> {
        self.declare(group, routing_key).await;

        let inner = self.inner.clone();
        let group = group.to_string();
        let stream = futures_util::stream::unfold((inner, group), |(inner, group)| async move {
            let next = Self::next_delivery(&inner, &group).await;
            Some((next, (inner, group)))
        });

        Ok(Box::pin(stream))
    }
}

struct InProcessAcker {
    inner: Arc<Inner>,
    group: String,
    tag: u64,
}

#[async_trait]
impl Acker for InProcessAcker {
    async fn ack(self: Box<Self>) -> Result<()> {
        let mut state = self.inner.state.lock().await;
        if let Some(queue) = state.queues.get_mut(&self.group) {
            // A delivery whose lease already expired was requeued; acking it
            // late does not remove the redelivered copy.
            queue.in_flight.remove(&self.tag);
        }
        Ok(())
    }

    async fn nack(self: Box<Self>, requeue: bool) -> Result<()> {
        let max_deliveries = self.inner.config.max_deliveries;
        let mut state = self.inner.state.lock().await;
        if let Some(queue) = state.queues.get_mut(&self.group)
            && let Some(flight) = queue.in_flight.remove(&self.tag)
        {
            queue.settle_failed(flight.queued, requeue, max_deliveries);
        }
        Ok(())
    }
}
