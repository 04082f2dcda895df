// Notificator
// Decision: A failed publish ends the batch; the rest is picked up next tick
// Decision: A failed mark after a successful publish is only logged; the event
//           is published again next tick and consumers dedupe by event id
//
// Periodically scans the event store for unnotified events starting within
// the lookahead window, publishes one task per event and marks it notified.

use std::sync::Arc;
use std::time::Duration;

use calendar_core::{Counter, Event, EventStore, MetricsSink, StoreError};
use calendar_queue::{ExchangeKind, QueueError, TaskQueue};
use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{DEFAULT_EXCHANGE_NAME, DEFAULT_QUEUE_NAME};

/// Where the notificator is in its cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificatorState {
    Idle,
    Scanning,
    Publishing,
    Marking,
}

impl std::fmt::Display for NotificatorState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Scanning => write!(f, "scanning"),
            Self::Publishing => write!(f, "publishing"),
            Self::Marking => write!(f, "marking"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NotificatorConfig {
    pub queue_name: String,
    pub exchange_name: String,
    pub exchange_kind: ExchangeKind,
    /// Key used both for the binding and for every publish
    pub routing_key: String,
    pub durable: bool,
    pub prefetch_count: u16,
    pub tick_interval: Duration,
    /// Events starting no later than now + window are due
    pub window: chrono::Duration,
}

impl Default for NotificatorConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_QUEUE_NAME.to_string(),
            exchange_name: DEFAULT_EXCHANGE_NAME.to_string(),
            exchange_kind: ExchangeKind::Fanout,
            routing_key: DEFAULT_QUEUE_NAME.to_string(),
            durable: true,
            prefetch_count: 1,
            tick_interval: Duration::from_secs(5),
            window: chrono::Duration::hours(24),
        }
    }
}

impl NotificatorConfig {
    pub fn with_tick_interval(mut self, interval: Duration) -> Self {
        self.tick_interval = interval;
        self
    }

    pub fn with_window(mut self, window: chrono::Duration) -> Self {
        self.window = window;
        self
    }

    pub fn with_queue(mut self, queue: impl Into<String>, exchange: impl Into<String>) -> Self {
        self.queue_name = queue.into();
        self.routing_key = self.queue_name.clone();
        self.exchange_name = exchange.into();
        self
    }
}

/// Result of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub due: usize,
    pub published: usize,
    pub marked: usize,
    pub mark_failures: usize,
    /// The batch ended early on a publish failure
    pub aborted: bool,
}

pub struct Notificator {
    store: Arc<dyn EventStore>,
    queue: Arc<dyn TaskQueue>,
    metrics: Arc<dyn MetricsSink>,
    config: NotificatorConfig,
    state: watch::Sender<NotificatorState>,
}

impl Notificator {
    pub fn new(
        store: Arc<dyn EventStore>,
        queue: Arc<dyn TaskQueue>,
        metrics: Arc<dyn MetricsSink>,
        config: NotificatorConfig,
    ) -> Self {
        let (state, _) = watch::channel(NotificatorState::Idle);
        Self {
            store,
            queue,
            metrics,
            config,
            state,
        }
    }

    pub fn config(&self) -> &NotificatorConfig {
        &self.config
    }

    pub fn state(&self) -> NotificatorState {
        *self.state.borrow()
    }

    /// Observe state transitions
    pub fn subscribe(&self) -> watch::Receiver<NotificatorState> {
        self.state.subscribe()
    }

    fn set_state(&self, next: NotificatorState) {
        self.state.send_replace(next);
    }

    /// Declare queue and exchange, bind them and set QoS. Idempotent.
    #[instrument(skip(self), fields(queue = %self.config.queue_name, exchange = %self.config.exchange_name))]
    pub async fn setup(&self) -> Result<(), QueueError> {
        let c = &self.config;
        self.queue.declare_queue(&c.queue_name, c.durable).await?;
        self.queue
            .declare_exchange(&c.exchange_name, c.exchange_kind, true)
            .await?;
        self.queue
            .bind_queue(&c.queue_name, &c.routing_key, &c.exchange_name)
            .await?;
        self.queue.set_qos(c.prefetch_count).await?;
        info!("notification queue ready");
        Ok(())
    }

    /// Run one scan/publish/mark cycle as of `now`.
    #[instrument(skip(self))]
    pub async fn scan_once(&self, now: DateTime<Utc>) -> Result<ScanReport, StoreError> {
        self.set_state(NotificatorState::Scanning);
        let due = match self.store.list_due(now, self.config.window).await {
            Ok(due) => due,
            Err(e) => {
                self.set_state(NotificatorState::Idle);
                return Err(e);
            }
        };

        let mut report = ScanReport {
            due: due.len(),
            ..ScanReport::default()
        };

        for event in &due {
            self.set_state(NotificatorState::Publishing);
            if let Err(e) = self.publish(event).await {
                warn!(event_id = %event.id, error = %e, "publish failed, ending batch");
                self.metrics.incr(Counter::NotificationsPublishFailed);
                report.aborted = true;
                break;
            }
            report.published += 1;
            self.metrics.incr(Counter::NotificationsPublished);

            self.set_state(NotificatorState::Marking);
            match self.store.mark_notified(event.id).await {
                Ok(()) => report.marked += 1,
                Err(e) => {
                    error!(event_id = %event.id, error = %e, "failed to mark event notified");
                    self.metrics.incr(Counter::NotificationsMarkFailed);
                    report.mark_failures += 1;
                }
            }
        }

        self.set_state(NotificatorState::Idle);
        if report.due > 0 {
            info!(
                due = report.due,
                published = report.published,
                marked = report.marked,
                aborted = report.aborted,
                "notification scan finished"
            );
        }
        Ok(report)
    }

    async fn publish(&self, event: &Event) -> Result<(), QueueError> {
        let payload =
            serde_json::to_vec(event).map_err(|e| QueueError::Serialization(e.to_string()))?;
        self.queue
            .publish(&self.config.exchange_name, &self.config.routing_key, &payload)
            .await?;
        debug!(event_id = %event.id, owner = %event.owner, "published notification task");
        Ok(())
    }

    /// Set up the queue, then scan every tick until cancelled.
    ///
    /// A scan in progress when cancellation arrives runs to completion.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), QueueError> {
        self.setup().await?;

        let mut ticker = tokio::time::interval(self.config.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!(
            tick_secs = self.config.tick_interval.as_secs(),
            window_hours = self.config.window.num_hours(),
            "notificator started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once(Utc::now()).await {
                        error!(error = %e, "notification scan failed");
                    }
                }
            }
        }

        info!("notificator stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use calendar_core::{CountingMetrics, EventDraft, TimeRange};
    use calendar_queue::{AckMode, InMemoryTaskQueue, QueueStats};
    use calendar_storage::InMemoryEventStore;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 8, 0, 0).unwrap()
    }

    fn event_in(owner: &str, hours: i64) -> Event {
        let start = now() + chrono::Duration::hours(hours);
        Event::new(
            owner,
            EventDraft::new("meeting", "agenda", start, start + chrono::Duration::minutes(30)),
        )
        .unwrap()
    }

    struct Harness {
        store: Arc<InMemoryEventStore>,
        queue: Arc<InMemoryTaskQueue>,
        metrics: Arc<CountingMetrics>,
        notificator: Notificator,
    }

    async fn harness() -> Harness {
        let store = Arc::new(InMemoryEventStore::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let metrics = Arc::new(CountingMetrics::new());
        let notificator = Notificator::new(
            store.clone(),
            queue.clone(),
            metrics.clone(),
            NotificatorConfig::default(),
        );
        notificator.setup().await.unwrap();
        Harness {
            store,
            queue,
            metrics,
            notificator,
        }
    }

    #[tokio::test]
    async fn test_setup_is_idempotent() {
        let h = harness().await;
        h.notificator.setup().await.unwrap();
        assert_eq!(
            h.queue.stats(DEFAULT_QUEUE_NAME).await.unwrap(),
            QueueStats::default()
        );
    }

    #[tokio::test]
    async fn test_due_event_published_and_marked_once() {
        let h = harness().await;
        let soon = event_in("alice", 2);
        let later = event_in("alice", 48);
        h.store.save(&soon).await.unwrap();
        h.store.save(&later).await.unwrap();

        let report = h.notificator.scan_once(now()).await.unwrap();
        assert_eq!(report.due, 1);
        assert_eq!(report.published, 1);
        assert_eq!(report.marked, 1);
        assert!(h.store.get(soon.id, "alice").await.unwrap().notified);

        let report = h.notificator.scan_once(now()).await.unwrap();
        assert_eq!(report, ScanReport::default());

        let d = h
            .queue
            .fetch(DEFAULT_QUEUE_NAME, "t", AckMode::Manual)
            .await
            .unwrap()
            .unwrap();
        let task: Event = serde_json::from_slice(&d.payload).unwrap();
        assert_eq!(task.id, soon.id);
        assert_eq!(task.owner, "alice");
        assert_eq!(h.metrics.get(Counter::NotificationsPublished), 1);
        assert_eq!(h.notificator.state(), NotificatorState::Idle);
    }

    #[tokio::test]
    async fn test_past_unnotified_events_are_due() {
        let h = harness().await;
        let missed = event_in("alice", -3);
        h.store.save(&missed).await.unwrap();

        let report = h.notificator.scan_once(now()).await.unwrap();
        assert_eq!(report.published, 1);
    }

    #[tokio::test]
    async fn test_publish_failure_leaves_event_unnotified() {
        let store = Arc::new(InMemoryEventStore::new());
        let queue = Arc::new(InMemoryTaskQueue::new());
        let metrics = Arc::new(CountingMetrics::new());
        // never set up: every publish fails with ExchangeNotFound
        let notificator = Notificator::new(
            store.clone(),
            queue.clone(),
            metrics.clone(),
            NotificatorConfig::default(),
        );
        let a = event_in("alice", 1);
        let b = event_in("bob", 2);
        store.save(&a).await.unwrap();
        store.save(&b).await.unwrap();

        let report = notificator.scan_once(now()).await.unwrap();
        assert!(report.aborted);
        assert_eq!(report.published, 0);
        assert!(!store.get(a.id, "alice").await.unwrap().notified);
        assert!(!store.get(b.id, "bob").await.unwrap().notified);
        assert_eq!(metrics.get(Counter::NotificationsPublishFailed), 1);

        // once the broker is ready the same events go out
        notificator.setup().await.unwrap();
        let report = notificator.scan_once(now()).await.unwrap();
        assert_eq!(report.published, 2);
        assert_eq!(report.marked, 2);
    }

    /// Store whose mark_notified always fails
    struct StuckMarks(InMemoryEventStore);

    #[async_trait]
    impl EventStore for StuckMarks {
        async fn save(&self, event: &Event) -> Result<(), StoreError> {
            self.0.save(event).await
        }
        async fn get(&self, id: Uuid, owner: &str) -> Result<Event, StoreError> {
            self.0.get(id, owner).await
        }
        async fn list_since(
            &self,
            owner: &str,
            since: DateTime<Utc>,
        ) -> Result<Vec<Event>, StoreError> {
            self.0.list_since(owner, since).await
        }
        async fn count_overlapping(
            &self,
            owner: &str,
            range: &TimeRange,
            exclude: Option<Uuid>,
        ) -> Result<u64, StoreError> {
            self.0.count_overlapping(owner, range, exclude).await
        }
        async fn update(&self, event: &Event) -> Result<Event, StoreError> {
            self.0.update(event).await
        }
        async fn delete(&self, id: Uuid, owner: &str) -> Result<(), StoreError> {
            self.0.delete(id, owner).await
        }
        async fn delete_ended_before(
            &self,
            owner: &str,
            cutoff: DateTime<Utc>,
        ) -> Result<u64, StoreError> {
            self.0.delete_ended_before(owner, cutoff).await
        }
        async fn delete_all_ended_before(
            &self,
            cutoff: DateTime<Utc>,
        ) -> Result<u64, StoreError> {
            self.0.delete_all_ended_before(cutoff).await
        }
        async fn list_due(
            &self,
            now: DateTime<Utc>,
            window: chrono::Duration,
        ) -> Result<Vec<Event>, StoreError> {
            self.0.list_due(now, window).await
        }
        async fn mark_notified(&self, _id: Uuid) -> Result<(), StoreError> {
            Err(StoreError::Database("connection reset".into()))
        }
    }

    #[tokio::test]
    async fn test_mark_failure_republishes_next_tick() {
        let store = Arc::new(StuckMarks(InMemoryEventStore::new()));
        let queue = Arc::new(InMemoryTaskQueue::new());
        let metrics = Arc::new(CountingMetrics::new());
        let notificator = Notificator::new(
            store.clone(),
            queue.clone(),
            metrics.clone(),
            NotificatorConfig::default(),
        );
        notificator.setup().await.unwrap();
        store.save(&event_in("alice", 1)).await.unwrap();

        let first = notificator.scan_once(now()).await.unwrap();
        assert_eq!((first.published, first.mark_failures), (1, 1));
        let second = notificator.scan_once(now()).await.unwrap();
        assert_eq!(second.published, 1);

        assert_eq!(queue.stats(DEFAULT_QUEUE_NAME).await.unwrap().ready, 2);
        assert_eq!(metrics.get(Counter::NotificationsMarkFailed), 2);
    }

    #[tokio::test]
    async fn test_state_transitions() {
        let h = harness().await;
        h.store.save(&event_in("alice", 1)).await.unwrap();

        let mut rx = h.notificator.subscribe();
        let seen = tokio::spawn(async move {
            let mut states = Vec::new();
            while rx.changed().await.is_ok() {
                let s = *rx.borrow_and_update();
                states.push(s);
                if s == NotificatorState::Idle {
                    break;
                }
            }
            states
        });

        h.notificator.scan_once(now()).await.unwrap();
        let states = seen.await.unwrap();
        assert_eq!(states.last(), Some(&NotificatorState::Idle));
        assert_eq!(h.notificator.state(), NotificatorState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_cancel() {
        let h = harness().await;
        h.store.save(&event_in("alice", -1)).await.unwrap();
        let notificator = Arc::new(h.notificator);
        let cancel = CancellationToken::new();

        let task = {
            let notificator = notificator.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { notificator.run(cancel).await })
        };

        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        task.await.unwrap().unwrap();

        // real clock is used for "now"; the past event was still due
        assert_eq!(h.queue.stats(DEFAULT_QUEUE_NAME).await.unwrap().ready, 1);
        assert_eq!(notificator.state(), NotificatorState::Idle);
    }
}
