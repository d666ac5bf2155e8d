//! Integration tests: OrderCreated → stock deduction and StockChanged
//! broadcasts.

use std::sync::Arc;

use chrono::Utc;
use common::{MessageId, OrderCreated, OrderCreatedItem, OrderId, TenantId};
use inventory::{
    INVENTORY_CONSUMER, InMemoryInventoryStore, InventoryConsumer, InventoryConsumerConfig,
    InventoryStore, StockChanged,
};
use messaging::{InMemoryInbox, InboxStore, MessageHandler};
use notifications::{NotificationHub, tenant_group};
use rust_decimal::Decimal;

struct TestHarness {
    store: InMemoryInventoryStore,
    hub: Arc<NotificationHub>,
    consumer: Arc<InventoryConsumer>,
}

impl TestHarness {
    async fn new() -> Self {
        let store = InMemoryInventoryStore::new(InMemoryInbox::new());
        store.set_stock(1, Decimal::from(100)).await;
        store.set_stock(2, Decimal::from(10)).await;
        store.set_conversion(1, 1, Decimal::ONE).await;
        store.set_conversion(2, 1, Decimal::ONE).await;

        let hub = Arc::new(NotificationHub::new());
        let consumer = Arc::new(InventoryConsumer::new(
            Arc::new(store.clone()),
            hub.clone(),
            InventoryConsumerConfig::default(),
        ));

        Self {
            store,
            hub,
            consumer,
        }
    }

    async fn quantity(&self, product_id: i32) -> Decimal {
        self.store
            .get(product_id.into())
            .await
            .unwrap()
            .unwrap()
            .quantity
    }

    async fn version(&self, product_id: i32) -> i64 {
        self.store
            .get(product_id.into())
            .await
            .unwrap()
            .unwrap()
            .version
    }
}

fn order_created(tenant_id: TenantId, items: &[(i32, i32, Decimal)]) -> OrderCreated {
    OrderCreated {
        message_id: MessageId::new(),
        order_id: OrderId::new(),
        order_code: "ORD-20260309140507-A1B2C3".to_string(),
        tenant_id,
        total_amount: Decimal::from(100),
        created_at: Utc::now(),
        items: items
            .iter()
            .map(|(product, unit, quantity)| OrderCreatedItem {
                product_id: (*product).into(),
                unit_id: (*unit).into(),
                quantity: *quantity,
            })
            .collect(),
    }
}

#[tokio::test]
async fn test_order_deducts_stock_and_notifies_tenant() {
    let h = TestHarness::new().await;
    let tenant_id = TenantId::new();

    let (conn, mut rx) = h.hub.on_connect();
    h.hub.join_group(conn, &tenant_group(tenant_id));
    let (other, mut other_rx) = h.hub.on_connect();
    h.hub.join_group(other, &tenant_group(TenantId::new()));

    h.consumer
        .handle(order_created(tenant_id, &[(1, 1, Decimal::from(5))]))
        .await
        .unwrap();

    assert_eq!(h.quantity(1).await, Decimal::from(95));
    assert_eq!(h.version(1).await, 1);

    let event = rx.try_recv().unwrap();
    assert_eq!(event.event, StockChanged::EVENT_NAME);
    let changed: StockChanged = serde_json::from_value(event.payload).unwrap();
    assert_eq!(changed.product_id, 1.into());
    assert_eq!(changed.new_quantity, Decimal::from(95));
    assert!(rx.try_recv().is_err());
    assert!(other_rx.try_recv().is_err());
}

#[tokio::test]
async fn test_redelivered_message_deducts_once() {
    let h = TestHarness::new().await;
    let event = order_created(TenantId::new(), &[(1, 1, Decimal::from(5))]);

    h.consumer.handle(event.clone()).await.unwrap();
    h.consumer.handle(event.clone()).await.unwrap();

    assert_eq!(h.quantity(1).await, Decimal::from(95));
    assert_eq!(h.version(1).await, 1);
    assert!(
        h.store
            .inbox()
            .is_processed(INVENTORY_CONSUMER, event.message_id)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_redelivery_does_not_broadcast_again() {
    let h = TestHarness::new().await;
    let tenant_id = TenantId::new();
    let (conn, mut rx) = h.hub.on_connect();
    h.hub.join_group(conn, &tenant_group(tenant_id));

    let event = order_created(tenant_id, &[(1, 1, Decimal::from(5))]);
    h.consumer.handle(event.clone()).await.unwrap();
    h.consumer.handle(event).await.unwrap();

    assert!(rx.try_recv().is_ok());
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn test_concurrent_orders_on_same_product_both_apply() {
    let h = TestHarness::new().await;
    let first = order_created(TenantId::new(), &[(2, 1, Decimal::from(3))]);
    let second = order_created(TenantId::new(), &[(2, 1, Decimal::from(4))]);

    let (a, b) = tokio::join!(
        {
            let consumer = h.consumer.clone();
            let event = first.clone();
            tokio::spawn(async move { consumer.handle(event).await })
        },
        {
            let consumer = h.consumer.clone();
            let event = second.clone();
            tokio::spawn(async move { consumer.handle(event).await })
        }
    );
    a.unwrap().unwrap();
    b.unwrap().unwrap();

    assert_eq!(h.quantity(2).await, Decimal::from(3));
    assert_eq!(h.version(2).await, 2);

    let inbox = h.store.inbox();
    assert!(inbox.is_processed(INVENTORY_CONSUMER, first.message_id).await.unwrap());
    assert!(inbox.is_processed(INVENTORY_CONSUMER, second.message_id).await.unwrap());
}

#[tokio::test]
async fn test_many_concurrent_orders_never_lose_updates() {
    let h = TestHarness::new().await;
    let consumer = Arc::new(InventoryConsumer::new(
        Arc::new(h.store.clone()),
        h.hub.clone(),
        InventoryConsumerConfig { max_retries: 50 },
    ));

    let mut handles = Vec::new();
    for _ in 0..20 {
        let consumer = consumer.clone();
        let event = order_created(
            TenantId::new(),
            &[(1, 1, Decimal::from(2)), (2, 1, Decimal::ONE)],
        );
        handles.push(tokio::spawn(async move { consumer.handle(event).await }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    assert_eq!(h.quantity(1).await, Decimal::from(60));
    assert_eq!(h.version(1).await, 20);
    assert_eq!(h.quantity(2).await, Decimal::from(-10));
    assert_eq!(h.version(2).await, 20);
}

#[tokio::test]
async fn test_missing_inventory_row_is_skipped() {
    let h = TestHarness::new().await;
    let event = order_created(
        TenantId::new(),
        &[(99, 1, Decimal::from(5)), (1, 1, Decimal::from(5))],
    );

    h.consumer.handle(event.clone()).await.unwrap();

    assert!(h.store.get(99.into()).await.unwrap().is_none());
    assert_eq!(h.quantity(1).await, Decimal::from(95));
    assert!(
        h.store
            .inbox()
            .is_processed(INVENTORY_CONSUMER, event.message_id)
            .await
            .unwrap()
    );
}

#[tokio::test]
async fn test_stock_may_go_negative() {
    let h = TestHarness::new().await;

    h.consumer
        .handle(order_created(TenantId::new(), &[(2, 1, Decimal::from(15))]))
        .await
        .unwrap();

    assert_eq!(h.quantity(2).await, Decimal::from(-5));
}

#[tokio::test]
async fn test_units_are_converted_to_base_units() {
    let h = TestHarness::new().await;
    // a box of product 1 holds 12 pieces
    h.store.set_conversion(1, 2, Decimal::from(12)).await;

    h.consumer
        .handle(order_created(TenantId::new(), &[(1, 2, Decimal::new(25, 1))]))
        .await
        .unwrap();

    assert_eq!(h.quantity(1).await, Decimal::from(70));
}

#[tokio::test]
async fn test_missing_conversion_uses_base_unit() {
    let h = TestHarness::new().await;

    h.consumer
        .handle(order_created(TenantId::new(), &[(1, 7, Decimal::from(4))]))
        .await
        .unwrap();

    assert_eq!(h.quantity(1).await, Decimal::from(96));
}

#[tokio::test]
async fn test_repeated_product_lines_accumulate() {
    let h = TestHarness::new().await;
    let tenant_id = TenantId::new();
    let (conn, mut rx) = h.hub.on_connect();
    h.hub.join_group(conn, &tenant_group(tenant_id));

    h.consumer
        .handle(order_created(
            tenant_id,
            &[(1, 1, Decimal::from(5)), (1, 1, Decimal::from(10))],
        ))
        .await
        .unwrap();

    assert_eq!(h.quantity(1).await, Decimal::from(85));
    assert_eq!(h.version(1).await, 2);

    let event = rx.try_recv().unwrap();
    let changed: StockChanged = serde_json::from_value(event.payload).unwrap();
    assert_eq!(changed.new_quantity, Decimal::from(85));
    assert!(rx.try_recv().is_err());
}
