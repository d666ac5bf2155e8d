//! PostgreSQL integration tests for the device directory and the push
//! consumer's inbox gate.
//!
//! Run with:
//!
//! ```bash
//! cargo test -p notifications --test postgres_integration
//! ```

use std::sync::Arc;

use chrono::Utc;
use common::{MessageId, OrderCreated, OrderId, TenantId, UserId};
use messaging::{InboxStore, MessageHandler, PostgresInbox};
use notifications::{
    DeviceDirectory, PUSH_CONSUMER, PostgresDeviceDirectory, PushConsumer, RecordingPushGateway,
};
use rust_decimal::Decimal;
use serial_test::serial;
use sqlx::PgPool;
use testcontainers::{ContainerAsync, runners::AsyncRunner};
use testcontainers_modules::postgres::Postgres;
use tokio::sync::OnceCell;

/// Shared container info - container stays alive for all tests
struct ContainerInfo {
    #[allow(dead_code)] // Container must stay alive for tests
    container: ContainerAsync<Postgres>,
    connection_string: String,
}

/// Global shared container
static CONTAINER: OnceCell<Arc<ContainerInfo>> = OnceCell::const_new();

async fn get_container_info() -> Arc<ContainerInfo> {
    CONTAINER
        .get_or_init(|| async {
            let container = Postgres::default().start().await.unwrap();

            let host = container.get_host().await.unwrap();
            let port = container.get_host_port_ipv4(5432).await.unwrap();

            let connection_string =
                format!("postgres://postgres:postgres@{}:{}/postgres", host, port);

            let temp_pool = PgPool::connect(&connection_string).await.unwrap();
            sqlx::raw_sql(include_str!("../../../migrations/0001_order_pipeline.sql"))
                .execute(&temp_pool)
                .await
                .unwrap();
            temp_pool.close().await;

            Arc::new(ContainerInfo {
                container,
                connection_string,
            })
        })
        .await
        .clone()
}

/// Get a fresh pool with cleared directory and inbox tables
async fn get_test_pool() -> PgPool {
    let info = get_container_info().await;

    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&info.connection_string)
        .await
        .unwrap();

    sqlx::query("TRUNCATE TABLE tenant_owners, device_tokens, inbox_records")
        .execute(&pool)
        .await
        .unwrap();

    pool
}

async fn register(pool: &PgPool, tenant_id: TenantId, owner: UserId, tokens: &[&str]) {
    sqlx::query("INSERT INTO tenant_owners (tenant_id, user_id) VALUES ($1, $2)")
        .bind(tenant_id.as_uuid())
        .bind(owner.as_uuid())
        .execute(pool)
        .await
        .unwrap();

    for token in tokens {
        sqlx::query(
            "INSERT INTO device_tokens (user_id, token, platform, last_active_at) VALUES ($1, $2, 'ios', $3)",
        )
        .bind(owner.as_uuid())
        .bind(*token)
        .bind(Utc::now())
        .execute(pool)
        .await
        .unwrap();
    }
}

fn order_created(tenant_id: TenantId) -> OrderCreated {
    OrderCreated {
        message_id: MessageId::new(),
        order_id: OrderId::new(),
        order_code: "ORD-20260309140507-A1B2C3".to_string(),
        tenant_id,
        total_amount: Decimal::from(42),
        created_at: Utc::now(),
        items: vec![],
    }
}

#[tokio::test]
#[serial]
async fn directory_resolves_owner_and_tokens() {
    let pool = get_test_pool().await;
    let directory = PostgresDeviceDirectory::new(pool.clone());
    let tenant_id = TenantId::new();
    let owner = UserId::new();

    register(&pool, tenant_id, owner, &["token-a", "token-b"]).await;

    assert_eq!(directory.owner_for_tenant(tenant_id).await.unwrap(), Some(owner));
    assert_eq!(directory.owner_for_tenant(TenantId::new()).await.unwrap(), None);

    let mut tokens: Vec<String> = directory
        .tokens_for_user(owner)
        .await
        .unwrap()
        .into_iter()
        .map(|d| d.token)
        .collect();
    tokens.sort();
    assert_eq!(tokens, vec!["token-a", "token-b"]);
}

#[tokio::test]
#[serial]
async fn push_consumer_is_gated_by_postgres_inbox() {
    let pool = get_test_pool().await;
    let tenant_id = TenantId::new();
    register(&pool, tenant_id, UserId::new(), &["token-a"]).await;

    let inbox = PostgresInbox::new(pool.clone());
    let gateway = RecordingPushGateway::new();
    let consumer = PushConsumer::new(
        Arc::new(inbox.clone()),
        Arc::new(PostgresDeviceDirectory::new(pool.clone())),
        Arc::new(gateway.clone()),
    );
    let event = order_created(tenant_id);

    consumer.handle(event.clone()).await.unwrap();
    consumer.handle(event.clone()).await.unwrap();

    assert_eq!(gateway.sent().await.len(), 1);
    assert!(inbox.is_processed(PUSH_CONSUMER, event.message_id).await.unwrap());
}
