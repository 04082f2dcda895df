//! In-memory implementation of TaskQueue for testing
//!
//! Keeps all broker state behind one lock so every operation is atomic.
//! `restart` simulates a broker restart: non-durable queues and exchanges
//! vanish, outstanding deliveries on surviving queues become ready again.

use std::collections::{HashMap, HashSet, VecDeque};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::broker::*;

#[derive(Debug, Clone)]
struct Message {
    id: Uuid,
    payload: Vec<u8>,
    delivery_count: u32,
    published_at: DateTime<Utc>,
}

struct Outstanding {
    queue: String,
    consumer_tag: String,
    delivered_at: Instant,
    message: Message,
}

struct QueueState {
    durable: bool,
    ready: VecDeque<Message>,
    dead: Vec<Message>,
}

struct ExchangeState {
    kind: ExchangeKind,
    durable: bool,
    /// (queue, binding key)
    bindings: HashSet<(String, String)>,
}

#[derive(Default)]
struct BrokerState {
    queues: HashMap<String, QueueState>,
    exchanges: HashMap<String, ExchangeState>,
    outstanding: HashMap<Uuid, Outstanding>,
    prefetch: u16,
}

impl BrokerState {
    fn requeue_where(&mut self, pred: impl Fn(&Outstanding) -> bool) -> u64 {
        let tags: Vec<Uuid> = self
            .outstanding
            .iter()
            .filter(|(_, o)| pred(o))
            .map(|(tag, _)| *tag)
            .collect();

        let mut requeued = 0;
        for tag in tags {
            if let Some(o) = self.outstanding.remove(&tag) {
                if let Some(q) = self.queues.get_mut(&o.queue) {
                    q.ready.push_front(o.message);
                    requeued += 1;
                }
            }
        }
        requeued
    }

    fn in_flight(&self, consumer_tag: &str) -> usize {
        self.outstanding
            .values()
            .filter(|o| o.consumer_tag == consumer_tag)
            .count()
    }
}

/// In-memory broker
///
/// Provides the same contract as the PostgreSQL queue.
///
/// ```
/// use calendar_queue::InMemoryTaskQueue;
///
/// let queue = InMemoryTaskQueue::new();
/// ```
pub struct InMemoryTaskQueue {
    state: Mutex<BrokerState>,
    config: BrokerConfig,
}

impl Default for InMemoryTaskQueue {
    fn default() -> Self {
        Self::with_config(BrokerConfig::default())
    }
}

impl InMemoryTaskQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: BrokerConfig) -> Self {
        Self {
            state: Mutex::new(BrokerState::default()),
            config,
        }
    }

    /// Simulate a broker restart.
    pub fn restart(&self) {
        let mut state = self.state.lock();

        state.queues.retain(|_, q| q.durable);
        state.exchanges.retain(|_, x| x.durable);

        let surviving: HashSet<String> = state.queues.keys().cloned().collect();
        for exchange in state.exchanges.values_mut() {
            exchange.bindings.retain(|(q, _)| surviving.contains(q));
        }

        let requeued = state.requeue_where(|_| true);

        info!(
            queues = state.queues.len(),
            exchanges = state.exchanges.len(),
            requeued,
            "in-memory broker restarted"
        );
    }

    /// Payloads rejected without requeue
    pub fn dead_letters(&self, queue: &str) -> Vec<Vec<u8>> {
        self.state
            .lock()
            .queues
            .get(queue)
            .map(|q| q.dead.iter().map(|m| m.payload.clone()).collect())
            .unwrap_or_default()
    }

    pub fn queue_exists(&self, queue: &str) -> bool {
        self.state.lock().queues.contains_key(queue)
    }
}

#[async_trait]
impl TaskQueue for InMemoryTaskQueue {
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        match state.queues.get(name) {
            Some(existing) if existing.durable != durable => {
                Err(QueueError::PreconditionFailed(format!(
                    "queue '{name}' already declared with durable={}",
                    existing.durable
                )))
            }
            Some(_) => Ok(()),
            None => {
                state.queues.insert(
                    name.to_string(),
                    QueueState {
                        durable,
                        ready: VecDeque::new(),
                        dead: Vec::new(),
                    },
                );
                debug!(queue = name, durable, "declared queue");
                Ok(())
            }
        }
    }

    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        match state.exchanges.get(name) {
            Some(existing) if existing.kind != kind || existing.durable != durable => {
                Err(QueueError::PreconditionFailed(format!(
                    "exchange '{name}' already declared as {} durable={}",
                    existing.kind, existing.durable
                )))
            }
            Some(_) => Ok(()),
            None => {
                state.exchanges.insert(
                    name.to_string(),
                    ExchangeState {
                        kind,
                        durable,
                        bindings: HashSet::new(),
                    },
                );
                debug!(exchange = name, %kind, durable, "declared exchange");
                Ok(())
            }
        }
    }

    async fn bind_queue(
        &self,
        queue: &str,
        routing_key: &str,
        exchange: &str,
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(QueueError::QueueNotFound(queue.to_string()));
        }
        let x = state
            .exchanges
            .get_mut(exchange)
            .ok_or_else(|| QueueError::ExchangeNotFound(exchange.to_string()))?;
        x.bindings
            .insert((queue.to_string(), routing_key.to_string()));
        Ok(())
    }

    async fn set_qos(&self, prefetch_count: u16) -> Result<(), QueueError> {
        self.state.lock().prefetch = prefetch_count;
        Ok(())
    }

    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), QueueError> {
        let mut state = self.state.lock();

        let targets: Vec<String> = if exchange.is_empty() {
            state
                .queues
                .contains_key(routing_key)
                .then(|| vec![routing_key.to_string()])
                .unwrap_or_default()
        } else {
            let x = state
                .exchanges
                .get(exchange)
                .ok_or_else(|| QueueError::ExchangeNotFound(exchange.to_string()))?;
            let mut queues: Vec<String> = x
                .bindings
                .iter()
                .filter(|(_, key)| x.kind == ExchangeKind::Fanout || key == routing_key)
                .map(|(q, _)| q.clone())
                .collect();
            queues.sort();
            queues.dedup();
            queues
        };

        if targets.is_empty() {
            return Err(QueueError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }

        let published_at = Utc::now();
        for name in &targets {
            if let Some(q) = state.queues.get_mut(name) {
                q.ready.push_back(Message {
                    id: Uuid::now_v7(),
                    payload: payload.to_vec(),
                    delivery_count: 0,
                    published_at,
                });
            }
        }
        Ok(())
    }

    async fn fetch(
        &self,
        queue: &str,
        consumer_tag: &str,
        ack_mode: AckMode,
    ) -> Result<Option<Delivery>, QueueError> {
        let mut state = self.state.lock();
        if !state.queues.contains_key(queue) {
            return Err(QueueError::QueueNotFound(queue.to_string()));
        }

        let timeout = self.config.redelivery_timeout;
        let expired = state
            .requeue_where(|o| o.queue == queue && o.delivered_at.elapsed() >= timeout);
        if expired > 0 {
            debug!(queue, expired, "redelivering timed out messages");
        }

        let prefetch = state.prefetch as usize;
        if ack_mode == AckMode::Manual && prefetch > 0 && state.in_flight(consumer_tag) >= prefetch
        {
            return Ok(None);
        }

        let Some(mut message) = state
            .queues
            .get_mut(queue)
            .and_then(|q| q.ready.pop_front())
        else {
            return Ok(None);
        };

        message.delivery_count += 1;
        // fresh per hand-out, so a late ack for a timed-out delivery cannot settle its redelivery
        let delivery_tag = Uuid::now_v7();
        let delivery = Delivery {
            delivery_tag,
            queue: queue.to_string(),
            payload: message.payload.clone(),
            redelivered: message.delivery_count > 1,
            delivery_count: message.delivery_count,
            published_at: message.published_at,
        };

        if ack_mode == AckMode::Manual {
            state.outstanding.insert(
                delivery_tag,
                Outstanding {
                    queue: queue.to_string(),
                    consumer_tag: consumer_tag.to_string(),
                    delivered_at: Instant::now(),
                    message,
                },
            );
        }

        Ok(Some(delivery))
    }

    async fn ack(&self, delivery_tag: Uuid) -> Result<(), QueueError> {
        self.state
            .lock()
            .outstanding
            .remove(&delivery_tag)
            .map(|_| ())
            .ok_or(QueueError::UnknownDelivery(delivery_tag))
    }

    async fn nack(&self, delivery_tag: Uuid, requeue: bool) -> Result<(), QueueError> {
        let mut state = self.state.lock();
        let o = state
            .outstanding
            .remove(&delivery_tag)
            .ok_or(QueueError::UnknownDelivery(delivery_tag))?;
        if let Some(q) = state.queues.get_mut(&o.queue) {
            if requeue {
                q.ready.push_front(o.message);
            } else {
                q.dead.push(o.message);
            }
        }
        Ok(())
    }

    async fn cancel(&self, consumer_tag: &str) -> Result<u64, QueueError> {
        let requeued = self
            .state
            .lock()
            .requeue_where(|o| o.consumer_tag == consumer_tag);
        if requeued > 0 {
            debug!(consumer_tag, requeued, "requeued unacked messages of cancelled consumer");
        }
        Ok(requeued)
    }

    async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        let state = self.state.lock();
        let q = state
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::QueueNotFound(queue.to_string()))?;
        Ok(QueueStats {
            ready: q.ready.len() as u64,
            unacked: state
                .outstanding
                .values()
                .filter(|o| o.queue == queue)
                .count() as u64,
            dead: q.dead.len() as u64,
        })
    }
}
