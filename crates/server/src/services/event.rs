// Event service for business logic
//
// Validates caller input, enforces the per-owner non-overlap rule and writes
// through to the event store. Every operation is scoped to the caller's owner
// except the administrative retention purge.

use std::sync::Arc;

use calendar_core::{
    Counter, Event, EventDraft, EventError, EventStore, MetricsSink, Result, TimeRange,
};
use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

pub struct EventService {
    store: Arc<dyn EventStore>,
    metrics: Arc<dyn MetricsSink>,
}

fn require_owner(owner: &str) -> Result<&str> {
    let owner = owner.trim();
    if owner.is_empty() {
        return Err(EventError::Unauthenticated);
    }
    Ok(owner)
}

impl EventService {
    pub fn new(store: Arc<dyn EventStore>, metrics: Arc<dyn MetricsSink>) -> Self {
        Self { store, metrics }
    }

    async fn ensure_free(&self, owner: &str, range: &TimeRange, exclude: Option<Uuid>) -> Result<()> {
        let overlapping = self.store.count_overlapping(owner, range, exclude).await?;
        if overlapping > 0 {
            debug!(owner, overlapping, "interval is taken");
            return Err(EventError::Overlap);
        }
        Ok(())
    }

    #[instrument(skip(self, draft), fields(start = %draft.start_time, end = %draft.end_time))]
    pub async fn create(&self, owner: &str, draft: EventDraft) -> Result<Event> {
        let owner = require_owner(owner)?;
        let event = Event::new(owner, draft)?;
        self.ensure_free(owner, &event.range(), None).await?;

        self.store.save(&event).await?;
        self.metrics.incr(Counter::EventsCreated);
        info!(event_id = %event.id, "event created");
        Ok(event)
    }

    /// Replace title, text and times. `notified` is kept as stored.
    #[instrument(skip(self, draft))]
    pub async fn update(&self, owner: &str, id: &str, draft: EventDraft) -> Result<Event> {
        let owner = require_owner(owner)?;
        let id = EventError::parse_id(id)?;
        let range = draft.validate()?;

        // existence first, so a missing id reports NotFound rather than Overlap
        self.store.get(id, owner).await?;
        self.ensure_free(owner, &range, Some(id)).await?;

        let candidate = Event {
            id,
            owner: owner.to_string(),
            title: draft.title,
            text: draft.text,
            start_time: range.start(),
            end_time: range.end(),
            notified: false,
        };
        let updated = self.store.update(&candidate).await?;
        self.metrics.incr(Counter::EventsUpdated);
        info!(event_id = %id, "event updated");
        Ok(updated)
    }

    #[instrument(skip(self))]
    pub async fn delete(&self, owner: &str, id: &str) -> Result<()> {
        let owner = require_owner(owner)?;
        let id = EventError::parse_id(id)?;
        self.store.delete(id, owner).await?;
        self.metrics.incr(Counter::EventsDeleted);
        info!(event_id = %id, "event deleted");
        Ok(())
    }

    /// Delete the owner's events that ended before `cutoff`.
    #[instrument(skip(self))]
    pub async fn delete_older_than(&self, owner: &str, cutoff: DateTime<Utc>) -> Result<u64> {
        let owner = require_owner(owner)?;
        let removed = self.store.delete_ended_before(owner, cutoff).await?;
        if removed > 0 {
            self.metrics.increment(Counter::EventsPurged, removed);
            info!(removed, "purged old events");
        }
        Ok(removed)
    }

    pub async fn get(&self, owner: &str, id: &str) -> Result<Event> {
        let owner = require_owner(owner)?;
        let id = EventError::parse_id(id)?;
        Ok(self.store.get(id, owner).await?)
    }

    /// Events starting at or after `since`, earliest first.
    pub async fn list_since(&self, owner: &str, since: DateTime<Utc>) -> Result<Vec<Event>> {
        let owner = require_owner(owner)?;
        Ok(self.store.list_since(owner, since).await?)
    }

    /// Retention purge across every owner.
    #[instrument(skip(self))]
    pub async fn purge_all_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let removed = self.store.delete_all_ended_before(cutoff).await?;
        if removed > 0 {
            self.metrics.increment(Counter::EventsPurged, removed);
        }
        Ok(removed)
    }
}
