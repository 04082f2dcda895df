use std::time::Duration;

use async_trait::async_trait;
use calendar_core::{Event, EventSender, SendError};
use tracing::debug;

/// Header carrying the event id so receivers can drop duplicate deliveries
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// POSTs each event as JSON to a fixed URL.
///
/// Any non-2xx response is a failure; the task stays unacked and the
/// broker redelivers it.
pub struct WebhookSender {
    client: reqwest::Client,
    url: String,
}

impl WebhookSender {
    pub fn new(url: impl Into<String>) -> Result<Self, SendError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .map_err(|e| SendError::Transport(e.to_string()))?;
        Ok(Self::with_client(client, url))
    }

    pub fn with_client(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl EventSender for WebhookSender {
    async fn send(&self, event: &Event) -> Result<(), SendError> {
        let response = self
            .client
            .post(&self.url)
            .header(IDEMPOTENCY_HEADER, event.id.to_string())
            .json(event)
            .send()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Rejected(format!("{status}: {body}")));
        }

        debug!(event_id = %event.id, %status, "webhook delivered");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use calendar_core::EventDraft;
    use chrono::Utc;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn event() -> Event {
        let start = Utc::now() + chrono::Duration::hours(2);
        Event::new(
            "alice",
            EventDraft::new("review", "design doc", start, start + chrono::Duration::hours(1)),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_posts_event_with_idempotency_key() {
        let server = MockServer::start().await;
        let event = event();
        Mock::given(method("POST"))
            .and(path("/notify"))
            .and(header(IDEMPOTENCY_HEADER, event.id.to_string().as_str()))
            .respond_with(ResponseTemplate::new(204))
            .expect(1)
            .mount(&server)
            .await;

        let sender = WebhookSender::new(format!("{}/notify", server.uri())).unwrap();
        sender.send(&event).await.unwrap();

        let received = server.received_requests().await.unwrap();
        let body: Event = serde_json::from_slice(&received[0].body).unwrap();
        assert_eq!(body, event);
    }

    #[tokio::test]
    async fn test_error_status_is_rejected() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503).set_body_string("busy"))
            .mount(&server)
            .await;

        let sender = WebhookSender::new(server.uri()).unwrap();
        let err = sender.send(&event()).await.unwrap_err();
        assert!(matches!(err, SendError::Rejected(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_unreachable_is_transport_error() {
        let sender = WebhookSender::new("http://127.0.0.1:1/notify").unwrap();
        let err = sender.send(&event()).await.unwrap_err();
        assert!(matches!(err, SendError::Transport(_)));
    }
}
