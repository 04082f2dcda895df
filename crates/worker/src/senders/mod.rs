// EventSender implementations
//
// - StreamSender: one human-readable line per event on any async writer (stdout by default)
// - WebhookSender: JSON POST per event, keyed by event id for receiver-side dedupe

mod stream;
mod webhook;

pub use stream::StreamSender;
pub use webhook::WebhookSender;
