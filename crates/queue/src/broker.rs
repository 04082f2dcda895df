//! TaskQueue trait definition

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Error type for queue operations
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    #[error("queue not found: {0}")]
    QueueNotFound(String),

    #[error("exchange not found: {0}")]
    ExchangeNotFound(String),

    /// Redeclaration with different properties
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),

    /// Publish matched no bound queue
    #[error("message to exchange '{exchange}' with routing key '{routing_key}' is unroutable")]
    Unroutable {
        exchange: String,
        routing_key: String,
    },

    /// Ack/nack for a delivery that is not outstanding
    #[error("unknown delivery tag: {0}")]
    UnknownDelivery(Uuid),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Exchange routing strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExchangeKind {
    /// Route to queues whose binding key equals the routing key
    Direct,
    /// Route to every bound queue, ignoring the routing key
    Fanout,
}

impl std::fmt::Display for ExchangeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Fanout => write!(f, "fanout"),
        }
    }
}

impl std::str::FromStr for ExchangeKind {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct" => Ok(Self::Direct),
            "fanout" => Ok(Self::Fanout),
            other => Err(QueueError::Serialization(format!(
                "unknown exchange kind: {other}"
            ))),
        }
    }
}

/// How deliveries are acknowledged
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AckMode {
    /// Removed from the queue as soon as it is handed out
    Auto,
    /// Stays outstanding until acked or nacked
    #[default]
    Manual,
}

/// A message handed to a consumer
#[derive(Debug, Clone)]
pub struct Delivery {
    /// Identifies this hand-out for ack/nack. A redelivery gets a new tag.
    pub delivery_tag: Uuid,
    pub queue: String,
    pub payload: Vec<u8>,
    /// True if the message was handed out before
    pub redelivered: bool,
    /// Number of times the message has been handed out, including this one
    pub delivery_count: u32,
    pub published_at: DateTime<Utc>,
}

/// Counts for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub ready: u64,
    pub unacked: u64,
    pub dead: u64,
}

/// Broker operations the notification pipeline relies on.
///
/// Reliability contract:
/// - durable queues and exchanges survive a broker restart, non-durable ones do not
/// - a message persists until acked
/// - outstanding messages go back to ready on nack with requeue, on consumer
///   cancel, or once the redelivery timeout passes
/// - a consumer never holds more than the prefetch count of unacked messages
#[async_trait]
pub trait TaskQueue: Send + Sync + 'static {
    /// Create a queue, or confirm an existing one has the same durability.
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), QueueError>;

    /// Create an exchange, or confirm an existing one has the same kind and durability.
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), QueueError>;

    /// Route messages from `exchange` to `queue`. Idempotent.
    async fn bind_queue(
        &self,
        queue: &str,
        routing_key: &str,
        exchange: &str,
    ) -> Result<(), QueueError>;

    /// Limit unacked deliveries per consumer. 0 means unlimited.
    async fn set_qos(&self, prefetch_count: u16) -> Result<(), QueueError>;

    /// Publish one message. The empty exchange name routes directly to the
    /// queue named by `routing_key`.
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), QueueError>;

    /// Hand out the next ready message, if any and if the consumer is under
    /// its prefetch limit. Never blocks.
    async fn fetch(
        &self,
        queue: &str,
        consumer_tag: &str,
        ack_mode: AckMode,
    ) -> Result<Option<Delivery>, QueueError>;

    async fn ack(&self, delivery_tag: Uuid) -> Result<(), QueueError>;

    /// Reject an outstanding delivery. Without `requeue` the message is dead-lettered.
    async fn nack(&self, delivery_tag: Uuid, requeue: bool) -> Result<(), QueueError>;

    /// Requeue everything the consumer still holds. Returns the number requeued.
    async fn cancel(&self, consumer_tag: &str) -> Result<u64, QueueError>;

    async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError>;
}

/// Broker-side settings shared by the implementations
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerConfig {
    /// Outstanding deliveries older than this are handed out again
    #[serde(with = "crate::duration_millis")]
    pub redelivery_timeout: Duration,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            redelivery_timeout: Duration::from_secs(30),
        }
    }
}

impl BrokerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_redelivery_timeout(mut self, timeout: Duration) -> Self {
        self.redelivery_timeout = timeout;
        self
    }
}
