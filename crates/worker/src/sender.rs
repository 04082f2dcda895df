// Sender service
// Decision: Ack only after the sender reports success
// Decision: Undecodable payloads are rejected (dead-lettered), not redelivered forever
//
// Consumes notification tasks and hands each event to an EventSender.

use std::sync::Arc;

use async_trait::async_trait;
use calendar_core::{Counter, Event, EventSender, MetricsSink};
use calendar_queue::{
    AckMode, Consumer, ConsumerConfig, ConsumerStats, Delivery, DeliveryHandler, HandlerOutcome,
    PollerConfig, TaskQueue,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

pub struct SenderService {
    sender: Arc<dyn EventSender>,
    metrics: Arc<dyn MetricsSink>,
}

impl SenderService {
    pub fn new(sender: Arc<dyn EventSender>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { sender, metrics }
    }

    /// Consume `queue_name` with manual acks until `cancel` fires.
    pub async fn run(
        &self,
        queue: Arc<dyn TaskQueue>,
        queue_name: &str,
        consumer_tag: &str,
        poller: PollerConfig,
        cancel: CancellationToken,
    ) -> ConsumerStats {
        let config = ConsumerConfig::new(queue_name, consumer_tag)
            .with_ack_mode(AckMode::Manual)
            .with_poller(poller);
        Consumer::new(queue, config).run(self, cancel).await
    }
}

#[async_trait]
impl DeliveryHandler for SenderService {
    async fn handle(&self, delivery: &Delivery) -> HandlerOutcome {
        let event: Event = match serde_json::from_slice(&delivery.payload) {
            Ok(event) => event,
            Err(e) => {
                warn!(
                    delivery_tag = %delivery.delivery_tag,
                    error = %e,
                    "undecodable notification task"
                );
                self.metrics.incr(Counter::TasksFailed);
                return HandlerOutcome::Reject;
            }
        };

        match self.sender.send(&event).await {
            Ok(()) => {
                debug!(
                    event_id = %event.id,
                    redelivered = delivery.redelivered,
                    "notification sent"
                );
                self.metrics.incr(Counter::TasksDelivered);
                HandlerOutcome::Ack
            }
            Err(e) => {
                warn!(event_id = %event.id, error = %e, "notification send failed");
                self.metrics.incr(Counter::TasksFailed);
                HandlerOutcome::Retry
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calendar_core::{CountingMetrics, EventDraft, SendError};
    use chrono::{Duration, Utc};
    use std::sync::atomic::{AtomicBool, Ordering};
    use uuid::Uuid;

    struct FlakySender {
        fail: AtomicBool,
    }

    #[async_trait]
    impl EventSender for FlakySender {
        async fn send(&self, _event: &Event) -> Result<(), SendError> {
            if self.fail.load(Ordering::SeqCst) {
                Err(SendError::Transport("smtp down".into()))
            } else {
                Ok(())
            }
        }
    }

    fn delivery(payload: Vec<u8>) -> Delivery {
        Delivery {
            delivery_tag: Uuid::now_v7(),
            queue: "notification.tasks".into(),
            payload,
            redelivered: false,
            delivery_count: 1,
            published_at: Utc::now(),
        }
    }

    fn event_payload() -> Vec<u8> {
        let start = Utc::now() + Duration::hours(1);
        let event = Event::new(
            "alice",
            EventDraft::new("standup", "daily", start, start + Duration::minutes(15)),
        )
        .unwrap();
        serde_json::to_vec(&event).unwrap()
    }

    fn service(fail: bool) -> (SenderService, Arc<CountingMetrics>) {
        let metrics = Arc::new(CountingMetrics::new());
        let sender = Arc::new(FlakySender {
            fail: AtomicBool::new(fail),
        });
        (SenderService::new(sender, metrics.clone()), metrics)
    }

    #[tokio::test]
    async fn test_success_acks() {
        let (service, metrics) = service(false);
        let outcome = service.handle(&delivery(event_payload())).await;
        assert_eq!(outcome, HandlerOutcome::Ack);
        assert_eq!(metrics.get(Counter::TasksDelivered), 1);
    }

    #[tokio::test]
    async fn test_send_failure_is_retried() {
        let (service, metrics) = service(true);
        let outcome = service.handle(&delivery(event_payload())).await;
        assert_eq!(outcome, HandlerOutcome::Retry);
        assert_eq!(metrics.get(Counter::TasksFailed), 1);
        assert_eq!(metrics.get(Counter::TasksDelivered), 0);
    }

    #[tokio::test]
    async fn test_garbage_payload_is_rejected() {
        let (service, metrics) = service(false);
        let outcome = service.handle(&delivery(b"not json".to_vec())).await;
        assert_eq!(outcome, HandlerOutcome::Reject);
        assert_eq!(metrics.get(Counter::TasksFailed), 1);
    }
}
