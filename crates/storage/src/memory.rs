// In-memory EventStore
// Decision: Use parking_lot for thread-safe access
//
// Same semantics as the PostgreSQL store, including the overlap backstop:
// the conflict check and the write happen under one write lock.

use std::collections::HashMap;

use async_trait::async_trait;
use calendar_core::{Event, EventStore, StoreError, TimeRange};
use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

/// In-memory event store. All data is lost on restart.
#[derive(Default)]
pub struct InMemoryEventStore {
    events: RwLock<HashMap<Uuid, Event>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored events across all owners
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    fn conflicts(
        events: &HashMap<Uuid, Event>,
        owner: &str,
        range: &TimeRange,
        exclude: Option<Uuid>,
    ) -> usize {
        events
            .values()
            .filter(|e| e.owner == owner && Some(e.id) != exclude && e.range().overlaps(range))
            .count()
    }
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn save(&self, event: &Event) -> Result<(), StoreError> {
        let mut events = self.events.write();
        if events.contains_key(&event.id) {
            return Err(StoreError::Duplicate(event.id));
        }
        if Self::conflicts(&events, &event.owner, &event.range(), None) > 0 {
            return Err(StoreError::Conflict(format!(
                "owner {} already has an event in this interval",
                event.owner
            )));
        }
        events.insert(event.id, event.clone());
        Ok(())
    }

    async fn get(&self, id: Uuid, owner: &str) -> Result<Event, StoreError> {
        self.events
            .read()
            .get(&id)
            .filter(|e| e.owner == owner)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_since(
        &self,
        owner: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Event>, StoreError> {
        let mut list: Vec<Event> = self
            .events
            .read()
            .values()
            .filter(|e| e.owner == owner && e.start_time >= since)
            .cloned()
            .collect();
        list.sort_by_key(|e| (e.start_time, e.id));
        Ok(list)
    }

    async fn count_overlapping(
        &self,
        owner: &str,
        range: &TimeRange,
        exclude: Option<Uuid>,
    ) -> Result<u64, StoreError> {
        Ok(Self::conflicts(&self.events.read(), owner, range, exclude) as u64)
    }

    async fn update(&self, event: &Event) -> Result<Event, StoreError> {
        let mut events = self.events.write();
        let notified = match events.get(&event.id) {
            Some(existing) if existing.owner == event.owner => existing.notified,
            _ => return Err(StoreError::NotFound(event.id)),
        };
        if Self::conflicts(&events, &event.owner, &event.range(), Some(event.id)) > 0 {
            return Err(StoreError::Conflict(format!(
                "owner {} already has an event in this interval",
                event.owner
            )));
        }
        let updated = Event {
            notified,
            ..event.clone()
        };
        events.insert(event.id, updated.clone());
        Ok(updated)
    }

    async fn delete(&self, id: Uuid, owner: &str) -> Result<(), StoreError> {
        let mut events = self.events.write();
        match events.get(&id) {
            Some(e) if e.owner == owner => {
                events.remove(&id);
                Ok(())
            }
            _ => Err(StoreError::NotFound(id)),
        }
    }

    async fn delete_ended_before(
        &self,
        owner: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|_, e| !(e.owner == owner && e.end_time < cutoff));
        Ok((before - events.len()) as u64)
    }

    async fn delete_all_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut events = self.events.write();
        let before = events.len();
        events.retain(|_, e| e.end_time >= cutoff);
        Ok((before - events.len()) as u64)
    }

    async fn list_due(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<Event>, StoreError> {
        let mut due: Vec<Event> = self
            .events
            .read()
            .values()
            .filter(|e| e.is_due(now, window))
            .cloned()
            .collect();
        due.sort_by_key(|e| (e.start_time, e.id));
        Ok(due)
    }

    async fn mark_notified(&self, id: Uuid) -> Result<(), StoreError> {
        match self.events.write().get_mut(&id) {
            Some(e) => {
                e.notified = true;
                Ok(())
            }
            None => Err(StoreError::NotFound(id)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calendar_core::EventDraft;
    use chrono::TimeZone;

    fn at(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, 0, 0).unwrap()
    }

    fn event(owner: &str, start: u32, end: u32) -> Event {
        Event::new(owner, EventDraft::new("title", "text", at(start), at(end))).unwrap()
    }

    #[tokio::test]
    async fn test_save_and_get_scoped_by_owner() {
        let store = InMemoryEventStore::new();
        let e = event("alice", 9, 10);
        store.save(&e).await.unwrap();

        assert_eq!(store.get(e.id, "alice").await.unwrap(), e);
        assert!(matches!(
            store.get(e.id, "bob").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_save_rejects_overlap_for_same_owner_only() {
        let store = InMemoryEventStore::new();
        store.save(&event("alice", 9, 11)).await.unwrap();

        assert!(matches!(
            store.save(&event("alice", 10, 12)).await,
            Err(StoreError::Conflict(_))
        ));
        store.save(&event("bob", 10, 12)).await.unwrap();
        store.save(&event("alice", 11, 12)).await.unwrap();
        assert_eq!(store.len(), 3);
    }

    #[tokio::test]
    async fn test_count_overlapping_excludes_self() {
        let store = InMemoryEventStore::new();
        let e = event("alice", 9, 11);
        store.save(&e).await.unwrap();

        let range = TimeRange::new(at(10), at(12)).unwrap();
        assert_eq!(store.count_overlapping("alice", &range, None).await.unwrap(), 1);
        assert_eq!(
            store
                .count_overlapping("alice", &range, Some(e.id))
                .await
                .unwrap(),
            0
        );
        assert_eq!(store.count_overlapping("bob", &range, None).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_update_preserves_notified() {
        let store = InMemoryEventStore::new();
        let e = event("alice", 9, 10);
        store.save(&e).await.unwrap();
        store.mark_notified(e.id).await.unwrap();

        let changed = Event {
            title: "renamed".into(),
            notified: false,
            ..e.clone()
        };
        let updated = store.update(&changed).await.unwrap();
        assert_eq!(updated.title, "renamed");
        assert!(updated.notified);
    }

    #[tokio::test]
    async fn test_update_other_owner_is_not_found() {
        let store = InMemoryEventStore::new();
        let e = event("alice", 9, 10);
        store.save(&e).await.unwrap();

        let hijack = Event {
            owner: "bob".into(),
            ..e.clone()
        };
        assert!(matches!(
            store.update(&hijack).await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryEventStore::new();
        let e = event("alice", 9, 10);
        store.save(&e).await.unwrap();

        assert!(store.delete(e.id, "bob").await.is_err());
        store.delete(e.id, "alice").await.unwrap();
        assert!(store.is_empty());
        assert!(matches!(
            store.delete(e.id, "alice").await,
            Err(StoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_ended_before_is_idempotent() {
        let store = InMemoryEventStore::new();
        store.save(&event("alice", 1, 2)).await.unwrap();
        store.save(&event("alice", 3, 4)).await.unwrap();
        store.save(&event("alice", 8, 9)).await.unwrap();
        store.save(&event("bob", 1, 2)).await.unwrap();

        assert_eq!(store.delete_ended_before("alice", at(5)).await.unwrap(), 2);
        assert_eq!(store.delete_ended_before("alice", at(5)).await.unwrap(), 0);
        assert_eq!(store.len(), 2);
    }

    #[tokio::test]
    async fn test_delete_all_ended_before() {
        let store = InMemoryEventStore::new();
        store.save(&event("alice", 1, 2)).await.unwrap();
        store.save(&event("bob", 1, 2)).await.unwrap();
        store.save(&event("bob", 8, 9)).await.unwrap();

        assert_eq!(store.delete_all_ended_before(at(5)).await.unwrap(), 2);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_list_since_ordered() {
        let store = InMemoryEventStore::new();
        store.save(&event("alice", 12, 13)).await.unwrap();
        store.save(&event("alice", 8, 9)).await.unwrap();
        store.save(&event("alice", 10, 11)).await.unwrap();

        let list = store.list_since("alice", at(9)).await.unwrap();
        let starts: Vec<_> = list.iter().map(|e| e.start_time).collect();
        assert_eq!(starts, vec![at(10), at(12)]);
    }

    #[tokio::test]
    async fn test_list_due_and_mark() {
        let store = InMemoryEventStore::new();
        let soon = event("alice", 11, 12);
        let later = event("alice", 20, 21);
        store.save(&soon).await.unwrap();
        store.save(&later).await.unwrap();

        let due = store.list_due(at(9), Duration::hours(3)).await.unwrap();
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].id, soon.id);

        store.mark_notified(soon.id).await.unwrap();
        store.mark_notified(soon.id).await.unwrap();
        assert!(store
            .list_due(at(9), Duration::hours(3))
            .await
            .unwrap()
            .is_empty());
    }
}
