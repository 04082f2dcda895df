use async_trait::async_trait;
use calendar_core::{Event, EventSender, SendError};
use tokio::io::{AsyncWrite, AsyncWriteExt, Stdout};
use tokio::sync::Mutex;

/// Writes `Send notification to <owner>: <id> ...` lines to a writer.
pub struct StreamSender<W> {
    writer: Mutex<W>,
}

impl StreamSender<Stdout> {
    pub fn stdout() -> Self {
        Self::new(tokio::io::stdout())
    }
}

impl<W> StreamSender<W> {
    pub fn new(writer: W) -> Self {
        Self {
            writer: Mutex::new(writer),
        }
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

fn format_line(event: &Event) -> String {
    format!(
        "Send notification to {}: {} \"{}\" starts at {}\n",
        event.owner,
        event.id,
        event.title,
        event.start_time.to_rfc3339()
    )
}

#[async_trait]
impl<W> EventSender for StreamSender<W>
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    async fn send(&self, event: &Event) -> Result<(), SendError> {
        let line = format_line(event);
        let mut writer = self.writer.lock().await;
        writer.write_all(line.as_bytes()).await?;
        writer.flush().await?;
        Ok(())
    }
}
