// Calendar event domain types
//
// An Event belongs to exactly one owner and occupies the half-open
// interval [start_time, end_time). Two events of the same owner may
// touch at an endpoint but never intersect.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[cfg(feature = "openapi")]
use utoipa::ToSchema;

use crate::error::EventError;

/// A validated time interval, `end >= start`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    start: DateTime<Utc>,
    end: DateTime<Utc>,
}

impl TimeRange {
    /// Build a range, rejecting `end < start`.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self, EventError> {
        if end < start {
            return Err(EventError::InvalidRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> DateTime<Utc> {
        self.start
    }

    pub fn end(&self) -> DateTime<Utc> {
        self.end
    }

    /// Half-open intersection test. Touching endpoints do not overlap.
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// A calendar event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct Event {
    /// Unique identifier, assigned at creation.
    pub id: Uuid,
    /// Owning principal. Comes from the request context, never the body.
    pub owner: String,
    pub title: String,
    pub text: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    /// Set once by the notificator after a successful publish.
    #[serde(default)]
    pub notified: bool,
}

impl Event {
    /// Create a fresh, unnotified event from validated input.
    pub fn new(owner: impl Into<String>, draft: EventDraft) -> Result<Self, EventError> {
        let range = draft.validate()?;
        Ok(Self {
            id: Uuid::now_v7(),
            owner: owner.into(),
            title: draft.title,
            text: draft.text,
            start_time: range.start(),
            end_time: range.end(),
            notified: false,
        })
    }

    pub fn range(&self) -> TimeRange {
        TimeRange {
            start: self.start_time,
            end: self.end_time,
        }
    }

    /// True if the event starts no later than `now + window` and has not been notified.
    pub fn is_due(&self, now: DateTime<Utc>, window: Duration) -> bool {
        !self.notified && self.start_time <= due_horizon(now, window)
    }
}

/// Latest start time that is due at `now`. Saturates at the end of time.
pub fn due_horizon(now: DateTime<Utc>, window: Duration) -> DateTime<Utc> {
    now.checked_add_signed(window)
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Caller-supplied event fields, used for both create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(ToSchema))]
pub struct EventDraft {
    pub title: String,
    pub text: String,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
}

impl EventDraft {
    pub fn new(
        title: impl Into<String>,
        text: impl Into<String>,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
    ) -> Self {
        Self {
            title: title.into(),
            text: text.into(),
            start_time,
            end_time,
        }
    }

    /// Check required fields and the time range.
    pub fn validate(&self) -> Result<TimeRange, EventError> {
        if self.title.trim().is_empty() {
            return Err(EventError::InvalidArgument("title is required".to_string()));
        }
        if self.text.trim().is_empty() {
            return Err(EventError::InvalidArgument("text is required".to_string()));
        }
        TimeRange::new(self.start_time, self.end_time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(hour: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, min, 0).unwrap()
    }

    fn range(a: (u32, u32), b: (u32, u32)) -> TimeRange {
        TimeRange::new(at(a.0, a.1), at(b.0, b.1)).unwrap()
    }

    #[test]
    fn test_range_rejects_end_before_start() {
        let err = TimeRange::new(at(10, 0), at(9, 0)).unwrap_err();
        assert!(matches!(err, EventError::InvalidRange { .. }));
    }

    #[test]
    fn test_range_allows_zero_length() {
        assert!(TimeRange::new(at(10, 0), at(10, 0)).is_ok());
    }

    #[test]
    fn test_overlap_partial() {
        let a = range((10, 0), (11, 0));
        let b = range((10, 30), (11, 30));
        assert!(a.overlaps(&b));
        assert!(b.overlaps(&a));
    }

    #[test]
    fn test_overlap_containment() {
        let outer = range((9, 0), (12, 0));
        let inner = range((10, 0), (11, 0));
        assert!(outer.overlaps(&inner));
        assert!(inner.overlaps(&outer));
    }

    #[test]
    fn test_touching_endpoints_do_not_overlap() {
        let a = range((10, 0), (11, 0));
        let b = range((11, 0), (12, 0));
        assert!(!a.overlaps(&b));
        assert!(!b.overlaps(&a));
    }

    #[test]
    fn test_zero_length_inside_other_overlaps() {
        let point = range((10, 30), (10, 30));
        let span = range((10, 0), (11, 0));
        assert!(point.overlaps(&span));
        assert!(span.overlaps(&point));
    }

    #[test]
    fn test_draft_requires_title_and_text() {
        let draft = EventDraft::new("  ", "body", at(9, 0), at(10, 0));
        assert!(matches!(
            draft.validate(),
            Err(EventError::InvalidArgument(_))
        ));

        let draft = EventDraft::new("title", "", at(9, 0), at(10, 0));
        assert!(matches!(
            draft.validate(),
            Err(EventError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_new_event_is_unnotified() {
        let event = Event::new("alice", EventDraft::new("t", "x", at(9, 0), at(10, 0))).unwrap();
        assert_eq!(event.owner, "alice");
        assert!(!event.notified);
        assert_eq!(event.range(), range((9, 0), (10, 0)));
    }

    #[test]
    fn test_is_due() {
        let mut event =
            Event::new("alice", EventDraft::new("t", "x", at(12, 0), at(13, 0))).unwrap();
        assert!(event.is_due(at(10, 0), Duration::hours(2)));
        assert!(!event.is_due(at(9, 0), Duration::hours(2)));
        // no lower bound: past events still due
        assert!(event.is_due(at(20, 0), Duration::hours(2)));

        event.notified = true;
        assert!(!event.is_due(at(10, 0), Duration::hours(2)));
    }

    #[test]
    fn test_huge_window_saturates() {
        let event = Event::new("alice", EventDraft::new("t", "x", at(12, 0), at(13, 0))).unwrap();
        assert!(event.is_due(at(10, 0), Duration::MAX));
        assert_eq!(due_horizon(at(10, 0), Duration::MAX), DateTime::<Utc>::MAX_UTC);
    }

    #[test]
    fn test_payload_roundtrip_keeps_all_fields() {
        let event = Event::new("bob", EventDraft::new("t", "x", at(9, 0), at(10, 0))).unwrap();
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"start_time\":\"2024-05-01T09:00:00Z\""));
        let parsed: Event = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }
}
