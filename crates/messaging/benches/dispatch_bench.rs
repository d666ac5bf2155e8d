use std::sync::Arc;

use chrono::Utc;
use common::{OrderCreated, OrderCreatedItem, OrderId, ProductId, TenantId, UnitId};
use criterion::{Criterion, criterion_group, criterion_main};
use messaging::{
    DispatcherConfig, InMemoryOutboxStore, InProcessBroker, MessageId, OutboxDispatcher,
    OutboxMessage,
};

fn make_message() -> OutboxMessage {
    let event = OrderCreated {
        message_id: MessageId::new(),
        order_id: OrderId::new(),
        order_code: "ORD-20260101000000-abcdef".to_string(),
        tenant_id: TenantId::new(),
        total_amount: rust_decimal::Decimal::new(12_500, 2),
        created_at: Utc::now(),
        items: vec![OrderCreatedItem {
            product_id: ProductId::new(1),
            unit_id: UnitId::new(1),
            quantity: rust_decimal::Decimal::from(5),
        }],
    };
    OutboxMessage::from_event(event.order_id, &event, Utc::now()).unwrap()
}

fn bench_dispatch_batch(c: &mut Criterion, batch_size: usize) {
    let rt = tokio::runtime::Runtime::new().unwrap();

    c.bench_function(&format!("dispatcher/dispatch_batch_{batch_size}"), |b| {
        b.iter(|| {
            rt.block_on(async {
                let store = InMemoryOutboxStore::new();
                let broker = InProcessBroker::default();
                broker.declare("inventory", "order").await;
                for _ in 0..batch_size {
                    store.insert(make_message()).await;
                }

                let dispatcher = OutboxDispatcher::new(
                    Arc::new(store),
                    Arc::new(broker),
                    "bench",
                    DispatcherConfig {
                        batch_size,
                        ..Default::default()
                    },
                );
                dispatcher.poll_once().await.unwrap();
            });
        });
    });
}

fn bench_dispatch_batch_1(c: &mut Criterion) {
    bench_dispatch_batch(c, 1);
}

fn bench_dispatch_batch_50(c: &mut Criterion) {
    bench_dispatch_batch(c, 50);
}

fn bench_lock_batch_from_backlog(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let store = InMemoryOutboxStore::new();

    // Pre-populate a backlog of 1000 rows
    rt.block_on(async {
        for _ in 0..1000 {
            store.insert(make_message()).await;
        }
    });

    c.bench_function("outbox/lock_batch_from_1000", |b| {
        b.iter(|| {
            rt.block_on(async {
                use messaging::OutboxStore;
                // A fresh timestamp past the previous lease keeps every row available.
                let now = Utc::now() + chrono::Duration::days(1);
                store
                    .lock_batch("bench", 50, chrono::Duration::zero(), now)
                    .await
                    .unwrap();
            });
        });
    });
}

criterion_group!(
    benches,
    bench_dispatch_batch_1,
    bench_dispatch_batch_50,
    bench_lock_batch_from_backlog,
);
criterion_main!(benches);
