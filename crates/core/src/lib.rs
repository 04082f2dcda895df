// Calendar domain core
//
// This crate holds everything the calendar components share without tying
// them to a database, a broker, or a transport.
//
// Key design decisions:
// - Collaborators (EventStore, EventSender) are traits; backends live elsewhere
// - Errors carry a coarse ErrorKind so transports map them uniformly
// - Intervals are half-open; touching events never conflict
// - Metrics are injected through MetricsSink

pub mod error;
pub mod event;
pub mod metrics;
pub mod telemetry;
pub mod traits;

pub use error::{ErrorKind, EventError, Result, SendError, StoreError};
pub use event::{due_horizon, Event, EventDraft, TimeRange};
pub use metrics::{Counter, CountingMetrics, MetricsSink, NoopMetrics, OtelMetrics};
pub use traits::{EventSender, EventStore};
