// Event commands

use crate::client::{Client, ClientError};
use crate::output::{print_event, print_table_header, print_table_row, OutputFormat};
use anyhow::{Context, Result};
use calendar_core::{Event, EventDraft};
use chrono::{DateTime, Utc};
use clap::Args;
use serde::{Deserialize, Serialize};

/// Event fields given on the command line or loaded from a file
#[derive(Args, Debug, Clone, Default)]
pub struct DraftArgs {
    /// YAML/JSON file with title, text, start_time, end_time
    #[arg(short, long)]
    pub file: Option<String>,

    /// Event title
    #[arg(long)]
    pub title: Option<String>,

    /// Event description
    #[arg(long)]
    pub text: Option<String>,

    /// Start time (RFC 3339, e.g. 2030-01-01T10:00:00Z)
    #[arg(long)]
    pub start: Option<DateTime<Utc>>,

    /// End time (RFC 3339)
    #[arg(long)]
    pub end: Option<DateTime<Utc>>,
}

/// Partial event definition from a YAML/JSON file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EventFile {
    pub title: Option<String>,
    pub text: Option<String>,
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ListResponse<T> {
    data: Vec<T>,
}

#[derive(Debug, Serialize, Deserialize)]
struct PurgeResponse {
    deleted: u64,
}

fn parse_event_file(path: &str, content: &str) -> Result<EventFile> {
    if path.ends_with(".json") {
        serde_json::from_str(content).with_context(|| format!("Failed to parse JSON: {}", path))
    } else {
        // YAML is a superset of JSON
        serde_yaml::from_str(content).with_context(|| format!("Failed to parse YAML: {}", path))
    }
}

impl DraftArgs {
    /// Merge file values with flags; flags win.
    pub fn into_draft(self) -> Result<EventDraft> {
        let file = match &self.file {
            Some(path) => {
                let content = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read file: {}", path))?;
                parse_event_file(path, &content)?
            }
            None => EventFile::default(),
        };
        self.merge(file)
    }

    fn merge(self, file: EventFile) -> Result<EventDraft> {
        Ok(EventDraft::new(
            self.title
                .or(file.title)
                .context("--title is required (or provide in file)")?,
            self.text
                .or(file.text)
                .context("--text is required (or provide in file)")?,
            self.start
                .or(file.start_time)
                .context("--start is required (or provide in file)")?,
            self.end
                .or(file.end_time)
                .context("--end is required (or provide in file)")?,
        ))
    }
}

fn not_found(err: ClientError, id: &str) -> anyhow::Error {
    match err {
        ClientError::NotFound => anyhow::anyhow!("Event not found: {}", id),
        other => other.into(),
    }
}

pub async fn add(client: &Client, output: OutputFormat, quiet: bool, args: DraftArgs) -> Result<()> {
    let draft = args.into_draft()?;
    let event: Event = client.post("/v1/events", &draft).await?;

    if output.is_text() {
        if quiet {
            println!("{}", event.id);
        } else {
            println!("Created event: {}", event.id);
            print_event(&event);
        }
    } else {
        output.print_value(&event)?;
    }
    Ok(())
}

pub async fn get(client: &Client, output: OutputFormat, id: &str) -> Result<()> {
    let event: Event = client
        .get(&format!("/v1/events/{}", id))
        .await
        .map_err(|e| not_found(e, id))?;

    if output.is_text() {
        print_event(&event);
    } else {
        output.print_value(&event)?;
    }
    Ok(())
}

pub async fn list(client: &Client, output: OutputFormat, since: Option<DateTime<Utc>>) -> Result<()> {
    let path = match since {
        Some(since) => format!("/v1/events?since={}", since.format("%Y-%m-%dT%H:%M:%SZ")),
        None => "/v1/events".to_string(),
    };
    let response: ListResponse<Event> = client.get(&path).await?;

    if !output.is_text() {
        return output.print_value(&response.data);
    }
    if response.data.is_empty() {
        println!("No events found");
        return Ok(());
    }

    print_table_header(&[("ID", 36), ("START", 20), ("END", 20), ("TITLE", 30)]);
    for event in &response.data {
        let id = event.id.to_string();
        let start = event.start_time.format("%Y-%m-%d %H:%M").to_string();
        let end = event.end_time.format("%Y-%m-%d %H:%M").to_string();
        print_table_row(&[(&id, 36), (&start, 20), (&end, 20), (&event.title, 30)]);
    }
    Ok(())
}

pub async fn update(
    client: &Client,
    output: OutputFormat,
    quiet: bool,
    id: &str,
    args: DraftArgs,
) -> Result<()> {
    let draft = args.into_draft()?;
    let event: Event = client
        .put(&format!("/v1/events/{}", id), &draft)
        .await
        .map_err(|e| not_found(e, id))?;

    if output.is_text() {
        if !quiet {
            println!("Updated event: {}", event.id);
            print_event(&event);
        }
    } else {
        output.print_value(&event)?;
    }
    Ok(())
}

pub async fn delete(client: &Client, quiet: bool, id: &str) -> Result<()> {
    client
        .delete(&format!("/v1/events/{}", id))
        .await
        .map_err(|e| not_found(e, id))?;
    if !quiet {
        println!("Deleted event: {}", id);
    }
    Ok(())
}

pub async fn purge(
    client: &Client,
    output: OutputFormat,
    older_than: Option<DateTime<Utc>>,
) -> Result<()> {
    let path = match older_than {
        Some(cutoff) => format!(
            "/v1/events?older_than={}",
            cutoff.format("%Y-%m-%dT%H:%M:%SZ")
        ),
        None => "/v1/events".to_string(),
    };
    let response: PurgeResponse = client.delete_json(&path).await?;

    if output.is_text() {
        println!("Deleted {} event(s)", response.deleted);
    } else {
        output.print_value(&response)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_flags_override_file() {
        let file = parse_event_file(
            "event.yaml",
            "title: from file\ntext: body\nstart_time: 2030-01-01T10:00:00Z\nend_time: 2030-01-01T11:00:00Z\n",
        )
        .unwrap();
        let args = DraftArgs {
            title: Some("from flag".into()),
            ..DraftArgs::default()
        };

        let draft = args.merge(file).unwrap();
        assert_eq!(draft.title, "from flag");
        assert_eq!(draft.text, "body");
        assert_eq!(
            draft.start_time,
            Utc.with_ymd_and_hms(2030, 1, 1, 10, 0, 0).unwrap()
        );
    }

    #[test]
    fn test_json_file() {
        let file = parse_event_file(
            "event.json",
            r#"{"title": "t", "text": "x", "start_time": "2030-01-01T10:00:00Z", "end_time": "2030-01-01T10:30:00Z"}"#,
        )
        .unwrap();
        assert_eq!(file.title.as_deref(), Some("t"));
        assert!(file.end_time.is_some());
    }

    #[test]
    fn test_missing_field_is_reported() {
        let err = DraftArgs {
            title: Some("t".into()),
            text: Some("x".into()),
            ..DraftArgs::default()
        }
        .merge(EventFile::default())
        .unwrap_err();
        assert!(err.to_string().contains("--start"));
    }
}
