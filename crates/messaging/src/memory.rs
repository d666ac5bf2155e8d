use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

use crate::{
    AggregateId, MessageId, MessagingError, Result,
    inbox::{InboxClaim, InboxStore},
    outbox::{OutboxMessage, OutboxStore},
};

/// In-memory outbox store for tests and single-node development.
///
/// Provides the same leasing semantics as the PostgreSQL implementation.
#[derive(Clone, Default)]
pub struct InMemoryOutboxStore {
    messages: Arc<RwLock<Vec<OutboxMessage>>>,
}

impl InMemoryOutboxStore {
    /// Creates a new empty in-memory outbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a row. Callers are expected to do this while holding their own
    /// write lock, so the row becomes visible together with their change.
    pub async fn insert(&self, message: OutboxMessage) {
        self.messages.write().await.push(message);
    }

    /// Returns a copy of every row.
    pub async fn all(&self) -> Vec<OutboxMessage> {
        self.messages.read().await.clone()
    }

    /// Returns the total number of rows.
    pub async fn len(&self) -> usize {
        self.messages.read().await.len()
    }

    /// Returns true when the outbox has no rows.
    pub async fn is_empty(&self) -> bool {
        self.messages.read().await.is_empty()
    }
}

#[async_trait]
impl OutboxStore for InMemoryOutboxStore {
    async fn lock_batch(
        &self,
        instance_id: &str,
        batch_size: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>> {
        let mut messages = self.messages.write().await;

        let mut candidates: Vec<usize> = messages
            .iter()
            .enumerate()
            .filter(|(_, m)| m.is_available(now))
            .map(|(i, _)| i)
            .collect();
        candidates.sort_by_key(|&i| messages[i].occurred_at);
        candidates.truncate(batch_size);

        let mut locked = Vec::with_capacity(candidates.len());
        for i in candidates {
            let message = &mut messages[i];
            message.locked_by = Some(instance_id.to_string());
            message.lock_expires_at = Some(now + lease);
            message.attempts += 1;
            locked.push(message.clone());
        }

        Ok(locked)
    }

    async fn mark_dispatched(&self, id: MessageId, now: DateTime<Utc>) -> Result<()> {
        let mut messages = self.messages.write().await;
        if let Some(message) = messages
            .iter_mut()
            .find(|m| m.id == id && m.dispatched_at.is_none())
        {
            message.dispatched_at = Some(now);
            message.locked_by = None;
            message.lock_expires_at = None;
        }
        Ok(())
    }

    async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>> {
        let messages = self.messages.read().await;
        Ok(messages.iter().find(|m| m.id == id).cloned())
    }

    async fn for_aggregate(&self, aggregate_id: AggregateId) -> Result<Vec<OutboxMessage>> {
        let messages = self.messages.read().await;
        let mut rows: Vec<_> = messages
            .iter()
            .filter(|m| m.aggregate_id == aggregate_id)
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.occurred_at);
        Ok(rows)
    }

    async fn pending_count(&self) -> Result<u64> {
        let messages = self.messages.read().await;
        Ok(messages.iter().filter(|m| !m.is_dispatched()).count() as u64)
    }

    async fn prune_dispatched(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let mut messages = self.messages.write().await;
        let before = messages.len();
        messages.retain(|m| m.dispatched_at.is_none_or(|at| at >= older_than));
        Ok((before - messages.len()) as u64)
    }

    async fn replay(&self, id: MessageId) -> Result<()> {
        let mut messages = self.messages.write().await;
        let message = messages
            .iter_mut()
            .find(|m| m.id == id)
            .ok_or(MessagingError::MessageNotFound(id))?;

        message.dispatched_at = None;
        message.locked_by = None;
        message.lock_expires_at = None;
        Ok(())
    }
}

type InboxKey = (String, MessageId);

/// In-memory inbox for tests and single-node development.
///
/// Each key has its own async mutex; a claim holds that mutex until it is
/// committed or dropped, which serializes concurrent deliveries of the same
/// message.
#[derive(Clone, Default)]
pub struct InMemoryInbox {
    records: Arc<RwLock<HashMap<InboxKey, Arc<Mutex<bool>>>>>,
}

impl InMemoryInbox {
    /// Creates a new empty inbox.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of processed records across all consumers.
    pub async fn processed_count(&self) -> usize {
        let records = self.records.read().await;
        let mut count = 0;
        for slot in records.values() {
            if *slot.lock().await {
                count += 1;
            }
        }
        count
    }

    /// Claims a key and returns the concrete claim type.
    ///
    /// Used by stores that commit the inbox record together with their own
    /// in-memory state.
    pub async fn claim_slot(
        &self,
        consumer: &str,
        message_id: MessageId,
    ) -> Option<InMemoryInboxClaim> {
        let slot = {
            let mut records = self.records.write().await;
            records
                .entry((consumer.to_string(), message_id))
                .or_default()
                .clone()
        };

        let guard = slot.lock_owned().await;
        if *guard {
            None
        } else {
            Some(InMemoryInboxClaim { guard })
        }
    }
}

/// Claim held on an [`InMemoryInbox`] key.
pub struct InMemoryInboxClaim {
    guard: OwnedMutexGuard<bool>,
}

impl InMemoryInboxClaim {
    /// Marks the key as processed and releases it.
    pub fn complete(mut self) {
        *self.guard = true;
    }
}

#[async_trait]
impl InboxClaim for InMemoryInboxClaim {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.complete();
        Ok(())
    }
}

#[async_trait]
impl InboxStore for InMemoryInbox {
    async fn claim(
        &self,
        consumer: &str,
        message_id: MessageId,
    ) -> Result<Option<Box<dyn InboxClaim>>> {
        Ok(self
            .claim_slot(consumer, message_id)
            .await
            .map(|claim| Box::new(claim) as Box<dyn InboxClaim>))
    }

    async fn is_processed(&self, consumer: &str, message_id: MessageId) -> Result<bool> {
        let slot = {
            let records = self.records.read().await;
            records.get(&(consumer.to_string(), message_id)).cloned()
        };
        match slot {
            Some(slot) => Ok(*slot.lock().await),
            None => Ok(false),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::{OrderCreated, OrderId, TenantId};

    fn message_at(occurred_at: DateTime<Utc>) -> OutboxMessage {
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

    #[tokio::test]
    async fn lock_batch_takes_oldest_first_and_respects_size() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let newest = message_at(now);
        let oldest = message_at(now - Duration::seconds(10));
        let middle = message_at(now - Duration::seconds(5));
        store.insert(newest.clone()).await;
        store.insert(oldest.clone()).await;
        store.insert(middle.clone()).await;

        let batch = store
            .lock_batch("a", 2, Duration::seconds(30), now)
            .await
            .unwrap();

        let ids: Vec<_> = batch.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![oldest.id, middle.id]);
        assert!(batch.iter().all(|m| m.locked_by.as_deref() == Some("a")));
        assert!(batch.iter().all(|m| m.attempts == 1));
    }

    #[tokio::test]
    async fn leased_rows_are_skipped_until_expiry() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        store.insert(message_at(now)).await;

        let first = store
            .lock_batch("a", 10, Duration::seconds(30), now)
            .await
            .unwrap();
        assert_eq!(first.len(), 1);

        let second = store
            .lock_batch("b", 10, Duration::seconds(30), now + Duration::seconds(5))
            .await
            .unwrap();
        assert!(second.is_empty());

        let after_expiry = store
            .lock_batch("b", 10, Duration::seconds(30), now + Duration::seconds(31))
            .await
            .unwrap();
        assert_eq!(after_expiry.len(), 1);
        assert_eq!(after_expiry[0].locked_by.as_deref(), Some("b"));
        assert_eq!(after_expiry[0].attempts, 2);
    }

    #[tokio::test]
    async fn dispatched_rows_are_never_locked_again() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let message = message_at(now);
        store.insert(message.clone()).await;

        store
            .lock_batch("a", 10, Duration::seconds(30), now)
            .await
            .unwrap();
        store.mark_dispatched(message.id, now).await.unwrap();

        let later = store
            .lock_batch("a", 10, Duration::seconds(30), now + Duration::hours(1))
            .await
            .unwrap();
        assert!(later.is_empty());
        assert_eq!(store.pending_count().await.unwrap(), 0);

        let row = store.get(message.id).await.unwrap().unwrap();
        assert_eq!(row.dispatched_at, Some(now));
        assert!(row.locked_by.is_none());
    }

    #[tokio::test]
    async fn replay_makes_row_available_again() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let message = message_at(now);
        store.insert(message.clone()).await;
        store.mark_dispatched(message.id, now).await.unwrap();

        store.replay(message.id).await.unwrap();

        let batch = store
            .lock_batch("a", 10, Duration::seconds(30), now)
            .await
            .unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].id, message.id);
    }

    #[tokio::test]
    async fn replay_unknown_row_fails() {
        let store = InMemoryOutboxStore::new();
        let id = MessageId::new();

        let result = store.replay(id).await;

        assert!(matches!(result, Err(MessagingError::MessageNotFound(missing)) if missing == id));
    }

    #[tokio::test]
    async fn prune_only_removes_old_dispatched_rows() {
        let store = InMemoryOutboxStore::new();
        let now = Utc::now();
        let old = message_at(now - Duration::days(10));
        let recent = message_at(now);
        let pending = message_at(now - Duration::days(10));
        store.insert(old.clone()).await;
        store.insert(recent.clone()).await;
        store.insert(pending.clone()).await;
        store
            .mark_dispatched(old.id, now - Duration::days(9))
            .await
            .unwrap();
        store.mark_dispatched(recent.id, now).await.unwrap();

        let pruned = store
            .prune_dispatched(now - Duration::days(7))
            .await
            .unwrap();

        assert_eq!(pruned, 1);
        assert!(store.get(old.id).await.unwrap().is_none());
        assert!(store.get(recent.id).await.unwrap().is_some());
        assert!(store.get(pending.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn inbox_claims_once_per_consumer() {
        let inbox = InMemoryInbox::new();
        let id = MessageId::new();

        let claim = inbox.claim("inventory", id).await.unwrap().unwrap();
        claim.commit().await.unwrap();

        assert!(inbox.claim("inventory", id).await.unwrap().is_none());
        assert!(inbox.is_processed("inventory", id).await.unwrap());

        // Other consumers keep their own record.
        assert!(!inbox.is_processed("push", id).await.unwrap());
        assert!(inbox.claim("push", id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn dropped_claim_leaves_message_unprocessed() {
        let inbox = InMemoryInbox::new();
        let id = MessageId::new();

        let claim = inbox.claim("push", id).await.unwrap();
        drop(claim);

        assert!(!inbox.is_processed("push", id).await.unwrap());
        assert!(inbox.claim("push", id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn concurrent_claim_waits_for_first_to_finish() {
        let inbox = InMemoryInbox::new();
        let id = MessageId::new();

        let first = inbox.claim("inventory", id).await.unwrap().unwrap();

        let contender = {
            let inbox = inbox.clone();
            tokio::spawn(async move { inbox.claim("inventory", id).await.unwrap().is_some() })
        };

        tokio::task::yield_now().await;
        first.commit().await.unwrap();

        assert!(!contender.await.unwrap());
        assert_eq!(inbox.processed_count().await, 1);
    }
}
