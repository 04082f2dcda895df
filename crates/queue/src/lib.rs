//! Task queue for the notification pipeline
//!
//! The [`TaskQueue`] trait is the broker contract the notificator publishes
//! to and the sender service consumes from. Two brokers implement it:
//!
//! - [`InMemoryTaskQueue`]: single-process broker for tests and dev mode,
//!   with a `restart` hook to exercise durability
//! - [`PostgresTaskQueue`]: durable broker on PostgreSQL tables
//!
//! [`Consumer`] drives a [`DeliveryHandler`] from any broker, acking only
//! what the handler accepts.

pub mod broker;
pub mod consumer;
pub mod memory;
pub mod postgres;

pub use broker::{
    AckMode, BrokerConfig, Delivery, ExchangeKind, QueueError, QueueStats, TaskQueue,
};
pub use consumer::{
    Backoff, Consumer, ConsumerConfig, ConsumerStats, DeliveryHandler, HandlerOutcome,
    PollerConfig,
};
pub use memory::InMemoryTaskQueue;
pub use postgres::PostgresTaskQueue;

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_millis().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}
