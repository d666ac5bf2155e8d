use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::{PgConnection, PgPool, Postgres, Row, Transaction, postgres::PgRow};
use uuid::Uuid;

use crate::{
    AggregateId, MessageId, MessagingError, Result,
    inbox::{InboxClaim, InboxStore},
    outbox::{OutboxMessage, OutboxStore},
};

const OUTBOX_COLUMNS: &str = "id, aggregate_type, aggregate_id, event_type, payload, occurred_at, \
     dispatched_at, locked_by, lock_expires_at, attempts";

/// Runs the database migrations for the whole pipeline schema.
pub async fn run_migrations(pool: &PgPool) -> Result<()> {
    sqlx::migrate!("../../migrations").run(pool).await?;
    Ok(())
}

/// Inserts an outbox row on the caller's connection.
///
/// Pass the producing transaction (`&mut *tx`) so the row commits or rolls
/// back together with the business change.
pub async fn insert_outbox_message(conn: &mut PgConnection, message: &OutboxMessage) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO outbox_messages
            (id, aggregate_type, aggregate_id, event_type, payload, occurred_at, attempts)
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        "#,
    )
    .bind(message.id.as_uuid())
    .bind(&message.aggregate_type)
    .bind(message.aggregate_id.as_uuid())
    .bind(&message.event_type)
    .bind(&message.payload)
    .bind(message.occurred_at)
    .bind(message.attempts)
    .execute(conn)
    .await?;

    Ok(())
}

/// Records `(consumer, message_id)` on the caller's connection.
///
/// Returns `false` when the record already exists. Inside a transaction a
/// concurrent insert of the same key blocks until the other transaction
/// finishes.
pub async fn try_record_inbox(
    conn: &mut PgConnection,
    consumer: &str,
    message_id: MessageId,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO inbox_records (consumer_name, message_id, processed_at)
        VALUES ($1, $2, $3)
        ON CONFLICT (consumer_name, message_id) DO NOTHING
        "#,
    )
    .bind(consumer)
    .bind(message_id.as_uuid())
    .bind(now)
    .execute(conn)
    .await?;

    Ok(result.rows_affected() == 1)
}

/// PostgreSQL-backed outbox store.
#[derive(Clone)]
pub struct PostgresOutboxStore {
    pool: PgPool,
}

impl PostgresOutboxStore {
    /// Creates a new PostgreSQL outbox store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_message(row: PgRow) -> Result<OutboxMessage> {
        Ok(OutboxMessage {
            id: MessageId::from_uuid(row.try_get::<Uuid, _>("id")?),
            aggregate_type: row.try_get("aggregate_type")?,
            aggregate_id: AggregateId::from_uuid(row.try_get::<Uuid, _>("aggregate_id")?),
            event_type: row.try_get("event_type")?,
            payload: row.try_get("payload")?,
            occurred_at: row.try_get("occurred_at")?,
            dispatched_at: row.try_get("dispatched_at")?,
            locked_by: row.try_get("locked_by")?,
            lock_expires_at: row.try_get("lock_expires_at")?,
            attempts: row.try_get("attempts")?,
        })
    }
}

#[async_trait]
impl OutboxStore for PostgresOutboxStore {
    async fn lock_batch(
        &self,
        instance_id: &str,
        batch_size: usize,
        lease: Duration,
        now: DateTime<Utc>,
    ) -> Result<Vec<OutboxMessage>> {
        // SKIP LOCKED keeps concurrent dispatchers off each other's candidates.
        let sql = format!(
            r#"
            UPDATE outbox_messages
            SET locked_by = $1, lock_expires_at = $2, attempts = attempts + 1
            WHERE id IN (
                SELECT id FROM outbox_messages
                WHERE dispatched_at IS NULL
                  AND (lock_expires_at IS NULL OR lock_expires_at < $3)
                ORDER BY occurred_at ASC
                LIMIT $4
                FOR UPDATE SKIP LOCKED
            )
            RETURNING {OUTBOX_COLUMNS}
            "#
        );

        let rows = sqlx::query(&sql)
            .bind(instance_id)
            .bind(now + lease)
            .bind(now)
            .bind(batch_size as i64)
            .fetch_all(&self.pool)
            .await?;

        let mut messages = rows
            .into_iter()
            .map(Self::row_to_message)
            .collect::<Result<Vec<_>>>()?;
        messages.sort_by_key(|m| m.occurred_at);
        Ok(messages)
    }

    async fn mark_dispatched(&self, id: MessageId, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE outbox_messages
            SET dispatched_at = $2, locked_by = NULL, lock_expires_at = NULL
            WHERE id = $1 AND dispatched_at IS NULL
            "#,
        )
        .bind(id.as_uuid())
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, id: MessageId) -> Result<Option<OutboxMessage>> {
        let sql = format!("SELECT {OUTBOX_COLUMNS} FROM outbox_messages WHERE id = $1");
        let row = sqlx::query(&sql)
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(Self::row_to_message).transpose()
    }

    async fn for_aggregate(&self, aggregate_id: AggregateId) -> Result<Vec<OutboxMessage>> {
        let sql = format!(
            "SELECT {OUTBOX_COLUMNS} FROM outbox_messages WHERE aggregate_id = $1 ORDER BY occurred_at ASC"
        );
        let rows = sqlx::query(&sql)
            .bind(aggregate_id.as_uuid())
            .fetch_all(&self.pool)
            .await?;

        rows.into_iter().map(Self::row_to_message).collect()
    }

    async fn pending_count(&self) -> Result<u64> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM outbox_messages WHERE dispatched_at IS NULL")
                .fetch_one(&self.pool)
                .await?;

        Ok(count as u64)
    }

    async fn prune_dispatched(&self, older_than: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM outbox_messages WHERE dispatched_at IS NOT NULL AND dispatched_at < $1",
        )
        .bind(older_than)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn replay(&self, id: MessageId) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE outbox_messages
            SET dispatched_at = NULL, locked_by = NULL, lock_expires_at = NULL
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(MessagingError::MessageNotFound(id));
        }
        Ok(())
    }
}

/// PostgreSQL-backed inbox.
///
/// A claim is an open transaction holding the freshly inserted record; it
/// becomes durable on commit and disappears on drop.
#[derive(Clone)]
pub struct PostgresInbox {
    pool: PgPool,
}

impl PostgresInbox {
    /// Creates a new PostgreSQL inbox.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

struct PostgresInboxClaim {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InboxClaim for PostgresInboxClaim {
    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl InboxStore for PostgresInbox {
    async fn claim(
        &self,
        consumer: &str,
        message_id: MessageId,
    ) -> Result<Option<Box<dyn InboxClaim>>> {
        let mut tx = self.pool.begin().await?;

        if try_record_inbox(&mut *tx, consumer, message_id, Utc::now()).await? {
            Ok(Some(Box::new(PostgresInboxClaim { tx })))
        } else {
            tx.rollback().await?;
            Ok(None)
        }
    }

    async fn is_processed(&self, consumer: &str, message_id: MessageId) -> Result<bool> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM inbox_records WHERE consumer_name = $1 AND message_id = $2)",
        )
        .bind(consumer)
        .bind(message_id.as_uuid())
        .fetch_one(&self.pool)
        .await?;

        Ok(exists)
    }
}
