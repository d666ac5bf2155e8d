//! PostgreSQL inventory store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{MessageId, ProductId, UnitId};
use messaging::try_record_inbox;
use rust_decimal::Decimal;
use sqlx::{PgPool, Postgres, Row, Transaction, postgres::PgRow};

use crate::Result;
use crate::store::{InventoryRow, InventoryStore, StockTransaction};

/// PostgreSQL-backed inventory store.
///
/// The inbox record and the stock updates of one message share a
/// transaction.
#[derive(Clone)]
pub struct PostgresInventoryStore {
    pool: PgPool,
}

impl PostgresInventoryStore {
    /// Creates a new PostgreSQL inventory store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_inventory(row: PgRow) -> Result<InventoryRow> {
    Ok(InventoryRow {
        product_id: ProductId::new(row.try_get("product_id")?),
        quantity: row.try_get("quantity")?,
        version: row.try_get("version")?,
        last_updated: row.try_get("last_updated")?,
    })
}

#[async_trait]
impl InventoryStore for PostgresInventoryStore {
    async fn begin(&self) -> Result<Box<dyn StockTransaction>> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(PostgresStockTransaction { tx }))
    }

    async fn get(&self, product_id: ProductId) -> Result<Option<InventoryRow>> {
        sqlx::query(
            "SELECT product_id, quantity, version, last_updated FROM inventory WHERE product_id = $1",
        )
        .bind(product_id.as_i32())
        .fetch_optional(&self.pool)
        .await?
        .map(row_to_inventory)
        .transpose()
    }
}

struct PostgresStockTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl StockTransaction for PostgresStockTransaction {
    async fn claim_message(&mut self, consumer: &str, message_id: MessageId) -> Result<bool> {
        Ok(try_record_inbox(&mut *self.tx, consumer, message_id, Utc::now()).await?)
    }

    async fn load(&mut self, product_id: ProductId) -> Result<Option<InventoryRow>> {
        sqlx::query(
            "SELECT product_id, quantity, version, last_updated FROM inventory WHERE product_id = $1",
        )
        .bind(product_id.as_i32())
        .fetch_optional(&mut *self.tx)
        .await?
        .map(row_to_inventory)
        .transpose()
    }

    async fn conversion_factor(
        &mut self,
        product_id: ProductId,
        unit_id: UnitId,
    ) -> Result<Option<Decimal>> {
        Ok(sqlx::query_scalar(
            "SELECT factor_to_base FROM unit_conversions WHERE product_id = $1 AND unit_id = $2",
        )
        .bind(product_id.as_i32())
        .bind(unit_id.as_i32())
        .fetch_optional(&mut *self.tx)
        .await?)
    }

    async fn compare_and_set(
        &mut self,
        product_id: ProductId,
        expected_version: i64,
        new_quantity: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<InventoryRow>> {
        sqlx::query(
            r#"
            UPDATE inventory
            SET quantity = $3, version = version + 1, last_updated = $4
            WHERE product_id = $1 AND version = $2
            RETURNING product_id, quantity, version, last_updated
            "#,
        )
        .bind(product_id.as_i32())
        .bind(expected_version)
        .bind(new_quantity)
        .bind(now)
        .fetch_optional(&mut *self.tx)
        .await?
        .map(row_to_inventory)
        .transpose()
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }
}
