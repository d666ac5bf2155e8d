//! PostgreSQL order store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{CustomerId, OrderId, ProductId, TenantId, UnitId};
use messaging::insert_outbox_message;
use rust_decimal::Decimal;
use sqlx::{PgConnection, PgPool, Row, postgres::PgRow};
use uuid::Uuid;

use crate::error::{OrderError, Result, ValidationError};
use crate::ledger::{CustomerAccount, DebtAction, DebtLedgerEntry};
use crate::order::{OrderAggregate, OrderLine, OrderStatus, PaymentMethod};
use crate::store::{NewOrder, OrderStore};

/// PostgreSQL-backed order store.
///
/// Each submission runs in one transaction that also inserts the outbox row.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

/// Locks the customer row and returns its debt, or `None` if absent.
async fn lock_customer(conn: &mut PgConnection, id: CustomerId) -> Result<Option<(TenantId, Decimal)>> {
    let row = sqlx::query("SELECT tenant_id, current_debt FROM customers WHERE id = $1 FOR UPDATE")
        .bind(id.as_uuid())
        .fetch_optional(conn)
        .await?;

    row.map(|row| -> Result<(TenantId, Decimal)> {
        Ok((
            TenantId::from_uuid(row.try_get::<Uuid, _>("tenant_id")?),
            row.try_get::<Decimal, _>("current_debt")?,
        ))
    })
    .transpose()
}

async fn insert_ledger_entry(conn: &mut PgConnection, entry: &DebtLedgerEntry) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO debt_ledger
            (id, customer_id, tenant_id, ref_order_id, amount, action, reason, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(entry.id)
    .bind(entry.customer_id.as_uuid())
    .bind(entry.tenant_id.as_uuid())
    .bind(entry.ref_order_id.map(|id| id.as_uuid()))
    .bind(entry.amount)
    .bind(entry.action.as_str())
    .bind(&entry.reason)
    .bind(entry.created_at)
    .execute(conn)
    .await?;

    Ok(())
}

/// Sets `current_debt` to the ledger sum and returns it.
async fn recompute_debt(conn: &mut PgConnection, customer_id: CustomerId) -> Result<Decimal> {
    let row = sqlx::query(
        r#"
        UPDATE customers
        SET current_debt = COALESCE((
            SELECT SUM(CASE WHEN action = 'Debit' THEN amount ELSE -amount END)
            FROM debt_ledger
            WHERE customer_id = $1
        ), 0)
        WHERE id = $1
        RETURNING current_debt
        "#,
    )
    .bind(customer_id.as_uuid())
    .fetch_one(conn)
    .await?;

    Ok(row.try_get("current_debt")?)
}

async fn insert_order(conn: &mut PgConnection, order: &OrderAggregate) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO orders
            (id, tenant_id, customer_id, order_code, total_amount, payment_method, status, created_at)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        "#,
    )
    .bind(order.id().as_uuid())
    .bind(order.tenant_id().as_uuid())
    .bind(order.customer_id().as_uuid())
    .bind(order.order_code())
    .bind(order.total_amount())
    .bind(order.payment_method().as_str())
    .bind(order.status().as_str())
    .bind(order.created_at())
    .execute(&mut *conn)
    .await?;

    for (line_no, line) in order.lines().iter().enumerate() {
        sqlx::query(
            r#"
            INSERT INTO order_items
                (order_id, line_no, product_id, unit_id, quantity, unit_price)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(order.id().as_uuid())
        .bind(line_no as i32)
        .bind(line.product_id.as_i32())
        .bind(line.unit_id.as_i32())
        .bind(line.quantity)
        .bind(line.unit_price)
        .execute(&mut *conn)
        .await?;
    }

    Ok(())
}

fn decode_error(column: &str, value: String) -> OrderError {
    OrderError::Database(sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: format!("unexpected value {value:?}").into(),
    })
}

fn row_to_entry(row: PgRow) -> Result<DebtLedgerEntry> {
    let action: String = row.try_get("action")?;
    Ok(DebtLedgerEntry {
        id: row.try_get("id")?,
        customer_id: CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
        tenant_id: TenantId::from_uuid(row.try_get::<Uuid, _>("tenant_id")?),
        ref_order_id: row
            .try_get::<Option<Uuid>, _>("ref_order_id")?
            .map(OrderId::from_uuid),
        amount: row.try_get("amount")?,
        action: DebtAction::parse(&action).ok_or_else(|| decode_error("action", action.clone()))?,
        reason: row.try_get("reason")?,
        created_at: row.try_get("created_at")?,
    })
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    #[tracing::instrument(skip(self, new_order), fields(order_id = %new_order.order.id()))]
    async fn submit(&self, new_order: NewOrder, credit_limit: Decimal) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        insert_order(&mut *tx, &new_order.order).await?;

        if let Some(entry) = &new_order.debit {
            sqlx::query(
                r#"
                INSERT INTO customers (id, tenant_id, current_debt)
                VALUES ($1, $2, 0)
                ON CONFLICT (id) DO NOTHING
                "#,
            )
            .bind(entry.customer_id.as_uuid())
            .bind(entry.tenant_id.as_uuid())
            .execute(&mut *tx)
            .await?;

            let (_, current_debt) = lock_customer(&mut *tx, entry.customer_id)
                .await?
                .ok_or(OrderError::CustomerNotFound(entry.customer_id))?;

            if current_debt + entry.amount > credit_limit {
                return Err(ValidationError::CreditLimitExceeded {
                    current_debt,
                    order_total: entry.amount,
                    credit_limit,
                }
                .into());
            }

            insert_ledger_entry(&mut *tx, entry).await?;
            recompute_debt(&mut *tx, entry.customer_id).await?;
        }

        insert_outbox_message(&mut *tx, &new_order.outbox).await?;

        tx.commit().await?;
        Ok(())
    }

    #[tracing::instrument(skip(self, reason))]
    async fn record_repayment(
        &self,
        customer_id: CustomerId,
        amount: Decimal,
        reason: String,
        at: DateTime<Utc>,
    ) -> Result<CustomerAccount> {
        let mut tx = self.pool.begin().await?;

        let (tenant_id, _) = lock_customer(&mut *tx, customer_id)
            .await?
            .ok_or(OrderError::CustomerNotFound(customer_id))?;

        let entry = DebtLedgerEntry::repayment(customer_id, tenant_id, amount, reason, at);
        insert_ledger_entry(&mut *tx, &entry).await?;
        let current_debt = recompute_debt(&mut *tx, customer_id).await?;

        tx.commit().await?;

        Ok(CustomerAccount {
            id: customer_id,
            tenant_id,
            current_debt,
        })
    }

    async fn get_order(&self, id: OrderId) -> Result<Option<OrderAggregate>> {
        let Some(row) = sqlx::query(
            r#"
            SELECT tenant_id, customer_id, order_code, total_amount, payment_method, status, created_at
            FROM orders
            WHERE id = $1
            "#,
        )
        .bind(id.as_uuid())
        .fetch_optional(&self.pool)
        .await?
        else {
            return Ok(None);
        };

        let lines = sqlx::query(
            r#"
            SELECT product_id, unit_id, quantity, unit_price
            FROM order_items
            WHERE order_id = $1
            ORDER BY line_no
            "#,
        )
        .bind(id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(|line| -> Result<OrderLine> {
            Ok(OrderLine::new(
                ProductId::new(line.try_get("product_id")?),
                UnitId::new(line.try_get("unit_id")?),
                line.try_get("quantity")?,
                line.try_get("unit_price")?,
            ))
        })
        .collect::<Result<Vec<_>>>()?;

        let payment_method: String = row.try_get("payment_method")?;
        let status: String = row.try_get("status")?;

        Ok(Some(OrderAggregate::restore(
            id,
            TenantId::from_uuid(row.try_get::<Uuid, _>("tenant_id")?),
            CustomerId::from_uuid(row.try_get::<Uuid, _>("customer_id")?),
            row.try_get("order_code")?,
            lines,
            row.try_get("total_amount")?,
            PaymentMethod::parse(&payment_method)
                .ok_or_else(|| decode_error("payment_method", payment_method.clone()))?,
            OrderStatus::parse(&status).ok_or_else(|| decode_error("status", status.clone()))?,
            row.try_get("created_at")?,
        )))
    }

    async fn get_customer(&self, id: CustomerId) -> Result<Option<CustomerAccount>> {
        let row = sqlx::query("SELECT tenant_id, current_debt FROM customers WHERE id = $1")
            .bind(id.as_uuid())
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| -> Result<CustomerAccount> {
            Ok(CustomerAccount {
                id,
                tenant_id: TenantId::from_uuid(row.try_get::<Uuid, _>("tenant_id")?),
                current_debt: row.try_get("current_debt")?,
            })
        })
        .transpose()
    }

    async fn ledger(&self, customer_id: CustomerId) -> Result<Vec<DebtLedgerEntry>> {
        sqlx::query(
            r#"
            SELECT id, customer_id, tenant_id, ref_order_id, amount, action, reason, created_at
            FROM debt_ledger
            WHERE customer_id = $1
            ORDER BY created_at, id
            "#,
        )
        .bind(customer_id.as_uuid())
        .fetch_all(&self.pool)
        .await?
        .into_iter()
        .map(row_to_entry)
        .collect()
    }
}
