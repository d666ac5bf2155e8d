//! Notifications for the order pipeline.
//!
//! This crate provides:
//! - [`NotificationHub`], the realtime connection and group registry
//! - [`PushGateway`] implementations and the [`DeviceDirectory`] of owners
//! - [`PushConsumer`] and [`OrderFanoutConsumer`], which react to
//!   `OrderCreated`

pub mod consumers;
pub mod directory;
pub mod error;
pub mod hub;
pub mod push;

pub use consumers::{
    FANOUT_CONSUMER, OrderFanoutConsumer, PUSH_CONSUMER, PushConsumer, new_order_notification,
};
pub use directory::{DeviceDirectory, DeviceToken, InMemoryDeviceDirectory, PostgresDeviceDirectory};
pub use error::{NotificationError, PushDeliveryError, Result};
pub use hub::{
    ConnectionId, DEFAULT_CONNECTION_BUFFER, HubEvent, NotificationHub, tenant_admins_group,
    tenant_group,
};
pub use push::{
    HttpPushGateway, LoggingPushGateway, PushGateway, PushNotification, RecordingPushGateway,
};
