// Error types for calendar operations
//
// EventError is what callers of the event service see. StoreError is what
// event store backends return; it is folded into EventError at the service
// boundary so backend details never leak as anything but Internal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Result type alias for event service operations
pub type Result<T> = std::result::Result<T, EventError>;

/// Coarse error classification, stable across transports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidArgument,
    Overlap,
    NotFound,
    Unauthenticated,
    Internal,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidArgument => write!(f, "invalid_argument"),
            ErrorKind::Overlap => write!(f, "overlap"),
            ErrorKind::NotFound => write!(f, "not_found"),
            ErrorKind::Unauthenticated => write!(f, "unauthenticated"),
            ErrorKind::Internal => write!(f, "internal"),
        }
    }
}

/// Errors returned by the event service
#[derive(Debug, Error)]
pub enum EventError {
    /// Malformed id or missing field
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// End precedes start
    #[error("end-date is incorrect: {end} is before {start}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    /// Another event of the same owner intersects the requested interval
    #[error("another event exists for this date")]
    Overlap,

    #[error("event not found: {0}")]
    NotFound(Uuid),

    #[error("owner is not authenticated")]
    Unauthenticated,

    /// Storage or infrastructure failure
    #[error("internal error: {0}")]
    Internal(String),
}

impl EventError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EventError::InvalidArgument(_) | EventError::InvalidRange { .. } => {
                ErrorKind::InvalidArgument
            }
            EventError::Overlap => ErrorKind::Overlap,
            EventError::NotFound(_) => ErrorKind::NotFound,
            EventError::Unauthenticated => ErrorKind::Unauthenticated,
            EventError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Create an invalid argument error
    pub fn invalid(msg: impl Into<String>) -> Self {
        EventError::InvalidArgument(msg.into())
    }

    /// Parse a caller-supplied event id
    pub fn parse_id(raw: &str) -> Result<Uuid> {
        Uuid::parse_str(raw.trim())
            .map_err(|_| EventError::InvalidArgument(format!("malformed event id: {raw}")))
    }
}

/// Errors returned by event store backends
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("event not found: {0}")]
    NotFound(Uuid),

    /// Write rejected because it would break the per-owner non-overlap rule
    #[error("conflicting event: {0}")]
    Conflict(String),

    #[error("duplicate event id: {0}")]
    Duplicate(Uuid),

    #[error("database error: {0}")]
    Database(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<StoreError> for EventError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(id) => EventError::NotFound(id),
            StoreError::Conflict(_) => EventError::Overlap,
            other => EventError::Internal(other.to_string()),
        }
    }
}

/// Errors returned by event senders
#[derive(Debug, Error)]
pub enum SendError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("delivery rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mapping() {
        assert_eq!(EventError::invalid("x").kind(), ErrorKind::InvalidArgument);
        let now = Utc::now();
        assert_eq!(
            EventError::InvalidRange {
                start: now,
                end: now
            }
            .kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(EventError::Overlap.kind(), ErrorKind::Overlap);
        assert_eq!(
            EventError::NotFound(Uuid::nil()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(EventError::Unauthenticated.kind(), ErrorKind::Unauthenticated);
        assert_eq!(EventError::Internal("db".into()).kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_store_error_conversion() {
        let id = Uuid::now_v7();
        assert!(matches!(
            EventError::from(StoreError::NotFound(id)),
            EventError::NotFound(got) if got == id
        ));
        assert!(matches!(
            EventError::from(StoreError::Conflict("x".into())),
            EventError::Overlap
        ));
        assert_eq!(
            EventError::from(StoreError::Database("down".into())).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_parse_id() {
        let id = Uuid::now_v7();
        assert_eq!(EventError::parse_id(&id.to_string()).unwrap(), id);
        assert_eq!(
            EventError::parse_id("not-a-uuid").unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
        assert_eq!(
            EventError::parse_id("").unwrap_err().kind(),
            ErrorKind::InvalidArgument
        );
    }

    #[test]
    fn test_overlap_message() {
        assert_eq!(
            EventError::Overlap.to_string(),
            "another event exists for this date"
        );
    }
}
