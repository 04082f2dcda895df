// Notification worker
//
// - Notificator: scans the event store and publishes one task per due event
// - SenderService: consumes tasks and delivers them through an EventSender
// - bootstrap: wires backends from WorkerConfig

pub mod bootstrap;
pub mod config;
pub mod notificator;
pub mod sender;
pub mod senders;

pub use bootstrap::{build_queue, build_sender, build_store, run, supervise, WorkerMode};
pub use config::{QueueBackend, SenderKind, WorkerConfig, DEFAULT_EXCHANGE_NAME, DEFAULT_QUEUE_NAME};
pub use notificator::{Notificator, NotificatorConfig, NotificatorState, ScanReport};
pub use sender::SenderService;
pub use senders::{StreamSender, WebhookSender};
