// Output formatting for CLI

use anyhow::Result;
use calendar_core::Event;
use serde::Serialize;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Text,
    Json,
    Yaml,
}

impl OutputFormat {
    pub fn parse(s: &str) -> Self {
        match s {
            "json" => OutputFormat::Json,
            "yaml" => OutputFormat::Yaml,
            _ => OutputFormat::Text,
        }
    }

    pub fn print_value<T: Serialize>(&self, value: &T) -> Result<()> {
        match self {
            OutputFormat::Json => println!("{}", serde_json::to_string_pretty(value)?),
            OutputFormat::Yaml => println!("{}", serde_yaml::to_string(value)?),
            // handled by each command
            OutputFormat::Text => {}
        }
        Ok(())
    }

    pub fn is_text(&self) -> bool {
        matches!(self, OutputFormat::Text)
    }
}

/// Print a simple key-value pair for text output
pub fn print_field(label: &str, value: &str) {
    println!("{:<14} {}", format!("{}:", label), value);
}

/// Print all fields of one event
pub fn print_event(event: &Event) {
    print_field("ID", &event.id.to_string());
    print_field("Title", &event.title);
    print_field("Text", &event.text);
    print_field("Start", &event.start_time.to_rfc3339());
    print_field("End", &event.end_time.to_rfc3339());
    print_field("Notified", if event.notified { "yes" } else { "no" });
}

/// Print a table header
pub fn print_table_header(columns: &[(&str, usize)]) {
    let header: String = columns
        .iter()
        .map(|(name, width)| format!("{:<width$}", name, width = width))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", header);
}

/// Cut `val` to `width` characters, marking the cut with "..."
pub fn truncate(val: &str, width: usize) -> String {
    if val.chars().count() <= width {
        return val.to_string();
    }
    let keep = width.saturating_sub(3);
    format!("{}...", val.chars().take(keep).collect::<String>())
}

/// Print a table row
pub fn print_table_row(values: &[(&str, usize)]) {
    let row: String = values
        .iter()
        .map(|(val, width)| format!("{:<width$}", truncate(val, *width), width = width))
        .collect::<Vec<_>>()
        .join("  ");
    println!("{}", row);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_format() {
        assert_eq!(OutputFormat::parse("json"), OutputFormat::Json);
        assert_eq!(OutputFormat::parse("yaml"), OutputFormat::Yaml);
        assert_eq!(OutputFormat::parse("anything"), OutputFormat::Text);
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("quarterly planning", 10), "quarter...");
        assert_eq!(truncate("héllo wörld", 8), "héllo...");
    }
}
