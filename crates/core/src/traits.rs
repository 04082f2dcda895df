// Collaborator traits
//
// The event service, notificator and sender service only ever talk to these
// traits. Backends:
// - In-memory implementations for tests and single-process setups
// - PostgreSQL implementation for production (calendar-storage)
// - Stream and webhook senders (calendar-worker)

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::error::{SendError, StoreError};
use crate::event::{Event, TimeRange};

// ============================================================================
// EventStore - Durable keyed storage of events
// ============================================================================

/// Storage for calendar events.
///
/// Every owner-scoped operation matches on `(id, owner)` together, so an
/// event of another owner is indistinguishable from a missing one.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Persist a new event.
    async fn save(&self, event: &Event) -> Result<(), StoreError>;

    /// Fetch one event by `(id, owner)`.
    async fn get(&self, id: Uuid, owner: &str) -> Result<Event, StoreError>;

    /// Events of `owner` with `start_time >= since`, ordered by start time.
    async fn list_since(&self, owner: &str, since: DateTime<Utc>)
        -> Result<Vec<Event>, StoreError>;

    /// Number of `owner`'s events intersecting `range`, ignoring `exclude`.
    async fn count_overlapping(
        &self,
        owner: &str,
        range: &TimeRange,
        exclude: Option<Uuid>,
    ) -> Result<u64, StoreError>;

    /// Replace title, text and times of `(event.id, event.owner)`.
    ///
    /// The stored `notified` flag is kept; the returned event reflects it.
    async fn update(&self, event: &Event) -> Result<Event, StoreError>;

    /// Delete one event by `(id, owner)`.
    async fn delete(&self, id: Uuid, owner: &str) -> Result<(), StoreError>;

    /// Delete `owner`'s events with `end_time < cutoff`.
    async fn delete_ended_before(
        &self,
        owner: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError>;

    /// Delete events of every owner with `end_time < cutoff`.
    async fn delete_all_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Unnotified events with `start_time <= now + window`, oldest first.
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<Event>, StoreError>;

    /// Set `notified = true`. Idempotent.
    async fn mark_notified(&self, id: Uuid) -> Result<(), StoreError>;
}

// ============================================================================
// EventSender - Terminal delivery sink
// ============================================================================

/// Delivers one notification. No retries; the queue redelivers on failure.
#[async_trait]
pub trait EventSender: Send + Sync + 'static {
    async fn send(&self, event: &Event) -> Result<(), SendError>;
}
