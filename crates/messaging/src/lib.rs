//! Reliable messaging for the order pipeline: the transactional outbox and
//! its dispatcher, per-consumer inbox deduplication, and the broker
//! interface with in-process and AMQP implementations.

pub mod amqp;
pub mod broker;
pub mod consumer;
pub mod dispatcher;
pub mod error;
pub mod in_process;
pub mod inbox;
pub mod janitor;
pub mod memory;
pub mod outbox;
pub mod postgres;

pub use amqp::{AmqpBroker, AmqpConfig};
pub use broker::{Acker, Broker, BrokerMessage, Delivery, Subscription, routing_key};
pub use common::{AggregateId, MessageId};
pub use consumer::{ConsumerConfig, DeliveryOutcome, MessageHandler, handle_delivery, run_consumer};
pub use dispatcher::{DispatchReport, DispatcherConfig, OutboxDispatcher};
pub use error::{MessagingError, Result};
pub use in_process::{InProcessBroker, InProcessBrokerConfig};
pub use inbox::{InboxClaim, InboxStore};
pub use janitor::OutboxJanitor;
pub use memory::{InMemoryInbox, InMemoryInboxClaim, InMemoryOutboxStore};
pub use outbox::{OutboxMessage, OutboxStore};
pub use postgres::{
    PostgresInbox, PostgresOutboxStore, insert_outbox_message, run_migrations, try_record_inbox,
};
