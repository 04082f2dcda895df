//! Queue consumer with adaptive polling
//!
//! Pulls deliveries one at a time, hands them to a handler, and acks only
//! when the handler says so. Polls back off exponentially while the queue is
//! empty and reset as soon as a message arrives.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, trace, warn};

use crate::broker::{AckMode, Delivery, QueueError, TaskQueue};

/// Polling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollerConfig {
    /// Poll interval right after a message was received
    #[serde(with = "crate::duration_millis")]
    pub min_interval: Duration,

    /// Poll interval ceiling while idle
    #[serde(with = "crate::duration_millis")]
    pub max_interval: Duration,

    /// Backoff multiplier when no message was available
    pub backoff_multiplier: f64,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(50),
            max_interval: Duration::from_secs(2),
            backoff_multiplier: 1.5,
        }
    }
}

impl PollerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_interval(mut self, interval: Duration) -> Self {
        self.min_interval = interval;
        self
    }

    pub fn with_max_interval(mut self, interval: Duration) -> Self {
        self.max_interval = interval;
        self
    }

    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier.max(1.0);
        self
    }
}

/// Tracks the current poll interval
#[derive(Debug)]
pub struct Backoff {
    config: PollerConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: PollerConfig) -> Self {
        Self {
            current: config.min_interval,
            config,
        }
    }

    pub fn current(&self) -> Duration {
        self.current
    }

    pub fn reset(&mut self) {
        self.current = self.config.min_interval;
    }

    pub fn increase(&mut self) {
        let next =
            Duration::from_secs_f64(self.current.as_secs_f64() * self.config.backoff_multiplier);
        self.current = next.min(self.config.max_interval);
    }
}

/// What the handler decided about a delivery
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Processed; ack it
    Ack,
    /// Failed; leave it unacked so the broker redelivers it
    Retry,
    /// Unprocessable; dead-letter it
    Reject,
}

/// Processes one delivery
#[async_trait]
pub trait DeliveryHandler: Send + Sync + 'static {
    async fn handle(&self, delivery: &Delivery) -> HandlerOutcome;
}

/// Consumer settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConsumerConfig {
    pub queue: String,
    /// Identifies this consumer to the broker; unacked messages are tied to it
    pub consumer_tag: String,
    pub ack_mode: AckMode,
    pub poller: PollerConfig,
}

impl ConsumerConfig {
    pub fn new(queue: impl Into<String>, consumer_tag: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            consumer_tag: consumer_tag.into(),
            ack_mode: AckMode::Manual,
            poller: PollerConfig::default(),
        }
    }

    pub fn with_ack_mode(mut self, ack_mode: AckMode) -> Self {
        self.ack_mode = ack_mode;
        self
    }

    pub fn with_poller(mut self, poller: PollerConfig) -> Self {
        self.poller = poller;
        self
    }
}

/// Totals for one consumer run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acked: u64,
    pub retried: u64,
    pub rejected: u64,
    pub fetch_errors: u64,
}

/// Drains a queue into a handler until cancelled
pub struct Consumer {
    queue: Arc<dyn TaskQueue>,
    config: ConsumerConfig,
}

impl Consumer {
    pub fn new(queue: Arc<dyn TaskQueue>, config: ConsumerConfig) -> Self {
        Self { queue, config }
    }

    pub fn config(&self) -> &ConsumerConfig {
        &self.config
    }

    /// Consume until `cancel` fires.
    ///
    /// A delivery being handled when cancellation arrives is finished first.
    /// On exit the consumer is cancelled at the broker, which requeues any
    /// message it still holds.
    #[instrument(skip_all, fields(queue = %self.config.queue, consumer = %self.config.consumer_tag))]
    pub async fn run<H: DeliveryHandler + ?Sized>(
        &self,
        handler: &H,
        cancel: CancellationToken,
    ) -> ConsumerStats {
        let mut stats = ConsumerStats::default();
        let mut backoff = Backoff::new(self.config.poller.clone());

        info!("consumer started");

        while !cancel.is_cancelled() {
            match self
                .queue
                .fetch(
                    &self.config.queue,
                    &self.config.consumer_tag,
                    self.config.ack_mode,
                )
                .await
            {
                Ok(Some(delivery)) => {
                    backoff.reset();
                    self.dispatch(handler, &delivery, &mut stats).await;
                    continue;
                }
                Ok(None) => {
                    backoff.increase();
                    trace!(
                        interval_ms = backoff.current().as_millis(),
                        "no message available, backing off"
                    );
                }
                Err(e) => {
                    stats.fetch_errors += 1;
                    backoff.increase();
                    warn!(error = %e, "fetch failed");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff.current()) => {}
                _ = cancel.cancelled() => {
                    debug!("cancellation received while waiting");
                }
            }
        }

        match self.queue.cancel(&self.config.consumer_tag).await {
            Ok(requeued) if requeued > 0 => info!(requeued, "returned unacked messages"),
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to cancel consumer at broker"),
        }

        info!(
            acked = stats.acked,
            retried = stats.retried,
            rejected = stats.rejected,
            "consumer stopped"
        );
        stats
    }

    async fn dispatch<H: DeliveryHandler + ?Sized>(
        &self,
        handler: &H,
        delivery: &Delivery,
        stats: &mut ConsumerStats,
    ) {
        let outcome = handler.handle(delivery).await;

        if self.config.ack_mode == AckMode::Auto {
            // already removed by the broker
            match outcome {
                HandlerOutcome::Ack => stats.acked += 1,
                HandlerOutcome::Retry => stats.retried += 1,
                HandlerOutcome::Reject => stats.rejected += 1,
            }
            return;
        }

        let result: Result<(), QueueError> = match outcome {
            HandlerOutcome::Ack => {
                stats.acked += 1;
                self.queue.ack(delivery.delivery_tag).await
            }
            HandlerOutcome::Retry => {
                stats.retried += 1;
                debug!(delivery_tag = %delivery.delivery_tag, "left unacked for redelivery");
                Ok(())
            }
            HandlerOutcome::Reject => {
                stats.rejected += 1;
                self.queue.nack(delivery.delivery_tag, false).await
            }
        };

        if let Err(e) = result {
            warn!(delivery_tag = %delivery.delivery_tag, error = %e, "failed to settle delivery");
        }
    }
}
