//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use inventory::InventoryConsumerConfig;
use messaging::{AmqpConfig, ConsumerConfig, DispatcherConfig, InProcessBrokerConfig};
use orders::DEFAULT_CREDIT_LIMIT;
use rust_decimal::Decimal;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

impl FromStr for LogFormat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "text" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(()),
        }
    }
}

/// Server configuration with sensible defaults.
///
/// Every field is read from an upper-case environment variable of the same
/// name (`port` from `PORT`, `dispatcher_batch_size` from
/// `DISPATCHER_BATCH_SIZE`, ...). Values that do not parse fall back to the
/// default. Optional URLs select a backend: without `DATABASE_URL` the stores
/// live in memory, without `BROKER_URL` the broker runs in-process.
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,

    pub database_url: Option<String>,
    pub database_max_connections: u32,

    pub broker_url: Option<String>,
    pub broker_exchange: String,

    /// Identifies this process in outbox leases.
    pub instance_id: String,
    pub dispatcher_poll_interval_ms: u64,
    pub dispatcher_lease_secs: u64,
    pub dispatcher_batch_size: usize,
    pub dispatcher_parallelism: usize,

    pub consumer_concurrency: usize,
    pub consumer_max_deliveries: u32,
    pub stock_conflict_max_retries: u32,

    pub credit_limit: Decimal,
    pub outbox_retention_hours: u64,

    pub price_service_url: Option<String>,
    pub push_gateway_url: Option<String>,
    pub push_gateway_key: Option<String>,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let defaults = Self::default();
        let parsed = |key: &str| Parsed(lookup(key));
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            host: non_empty("HOST").unwrap_or(defaults.host),
            port: parsed("PORT").or(defaults.port),
            log_level: non_empty("RUST_LOG").unwrap_or(defaults.log_level),
            log_format: parsed("LOG_FORMAT").or(defaults.log_format),
            database_url: non_empty("DATABASE_URL"),
            database_max_connections: parsed("DATABASE_MAX_CONNECTIONS")
                .or(defaults.database_max_connections),
            broker_url: non_empty("BROKER_URL"),
            broker_exchange: non_empty("BROKER_EXCHANGE").unwrap_or(defaults.broker_exchange),
            instance_id: non_empty("INSTANCE_ID").unwrap_or(defaults.instance_id),
            dispatcher_poll_interval_ms: parsed("DISPATCHER_POLL_INTERVAL_MS")
                .or(defaults.dispatcher_poll_interval_ms),
            dispatcher_lease_secs: parsed("DISPATCHER_LEASE_SECS")
                .or(defaults.dispatcher_lease_secs),
            dispatcher_batch_size: parsed("DISPATCHER_BATCH_SIZE")
                .or(defaults.dispatcher_batch_size),
            dispatcher_parallelism: parsed("DISPATCHER_PARALLELISM")
                .or(defaults.dispatcher_parallelism),
            consumer_concurrency: parsed("CONSUMER_CONCURRENCY").or(defaults.consumer_concurrency),
            consumer_max_deliveries: parsed("CONSUMER_MAX_DELIVERIES")
                .or(defaults.consumer_max_deliveries),
            stock_conflict_max_retries: parsed("STOCK_CONFLICT_MAX_RETRIES")
                .or(defaults.stock_conflict_max_retries),
            credit_limit: parsed("CREDIT_LIMIT").or(defaults.credit_limit),
            outbox_retention_hours: parsed("OUTBOX_RETENTION_HOURS")
                .or(defaults.outbox_retention_hours),
            price_service_url: non_empty("PRICE_SERVICE_URL"),
            push_gateway_url: non_empty("PUSH_GATEWAY_URL"),
            push_gateway_key: non_empty("PUSH_GATEWAY_KEY"),
        }
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn dispatcher(&self) -> DispatcherConfig {
        DispatcherConfig {
            poll_interval: Duration::from_millis(self.dispatcher_poll_interval_ms),
            lease: Duration::from_secs(self.dispatcher_lease_secs),
            batch_size: self.dispatcher_batch_size,
            parallelism: self.dispatcher_parallelism,
        }
    }

    pub fn consumer(&self) -> ConsumerConfig {
        ConsumerConfig {
            concurrency: self.consumer_concurrency,
        }
    }

    pub fn inventory_consumer(&self) -> InventoryConsumerConfig {
        InventoryConsumerConfig {
            max_retries: self.stock_conflict_max_retries,
        }
    }

    /// AMQP settings, when a broker URL is configured.
    pub fn amqp(&self) -> Option<AmqpConfig> {
        self.broker_url.as_ref().map(|url| AmqpConfig {
            url: url.clone(),
            exchange: self.broker_exchange.clone(),
            prefetch: u16::try_from(self.consumer_concurrency).unwrap_or(u16::MAX),
            max_deliveries: self.consumer_max_deliveries,
        })
    }

    pub fn in_process_broker(&self) -> InProcessBrokerConfig {
        InProcessBrokerConfig {
            max_deliveries: self.consumer_max_deliveries,
            ..InProcessBrokerConfig::default()
        }
    }

    pub fn outbox_retention(&self) -> Duration {
        Duration::from_secs(self.outbox_retention_hours * 3600)
    }
}

/// A raw variable that parses on demand.
struct Parsed(Option<String>);

impl Parsed {
    fn or<T: FromStr>(self, default: T) -> T {
        self.0
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }
}

impl Default for Config {
    fn default() -> Self {
        let dispatcher = DispatcherConfig::default();
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Text,
            database_url: None,
            database_max_connections: 10,
            broker_url: None,
            broker_exchange: "pipeline.events".to_string(),
            instance_id: format!("dispatcher-{}", uuid::Uuid::new_v4()),
            dispatcher_poll_interval_ms: 1000,
            dispatcher_lease_secs: 30,
            dispatcher_batch_size: dispatcher.batch_size,
            dispatcher_parallelism: dispatcher.parallelism,
            consumer_concurrency: ConsumerConfig::default().concurrency,
            consumer_max_deliveries: 10,
            stock_conflict_max_retries: InventoryConsumerConfig::default().max_retries,
            credit_limit: Decimal::from(DEFAULT_CREDIT_LIMIT),
            outbox_retention_hours: 168,
            price_service_url: None,
            push_gateway_url: None,
            push_gateway_key: None,
        }
    }
}
