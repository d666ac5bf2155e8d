//! Consumers of `OrderCreated` that notify people.

mod fanout;
mod push;

pub use fanout::{FANOUT_CONSUMER, OrderFanoutConsumer};
pub use push::{PUSH_CONSUMER, PushConsumer, new_order_notification};
