// Calendar CLI
//
// Design Decision: Use clap derive for ergonomic argument parsing.
// Design Decision: Support text/json/yaml output formats for scripting.
// Design Decision: The owner identity is sent as a header on every request.

mod client;
mod commands;
mod output;

use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use commands::events::{self, DraftArgs};

#[derive(Parser)]
#[command(name = "calendar")]
#[command(about = "Calendar CLI - Manage your calendar events")]
#[command(version)]
pub struct Cli {
    /// API base URL
    #[arg(
        long,
        env = "CALENDAR_API_URL",
        default_value = "http://localhost:9000"
    )]
    pub api_url: String,

    /// Owner the requests act as
    #[arg(long, env = "CALENDAR_OWNER")]
    pub owner: String,

    /// Output format
    #[arg(long, short, default_value = "text", value_parser = ["text", "json", "yaml"])]
    pub output: String,

    /// Suppress non-essential output
    #[arg(long, short)]
    pub quiet: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create an event
    Add {
        #[command(flatten)]
        draft: DraftArgs,
    },

    /// Show one event
    Get {
        /// Event ID
        id: String,
    },

    /// List events starting at or after a time (default: now)
    List {
        #[arg(long)]
        since: Option<DateTime<Utc>>,
    },

    /// Replace an event's title, text and times
    Update {
        /// Event ID
        id: String,

        #[command(flatten)]
        draft: DraftArgs,
    },

    /// Delete one event
    Delete {
        /// Event ID
        id: String,
    },

    /// Delete events that ended before a cutoff (default: server retention)
    Purge {
        #[arg(long)]
        older_than: Option<DateTime<Utc>>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = client::Client::new(&cli.api_url, &cli.owner);
    let output_format = output::OutputFormat::parse(&cli.output);

    match cli.command {
        Commands::Add { draft } => events::add(&client, output_format, cli.quiet, draft).await,
        Commands::Get { id } => events::get(&client, output_format, &id).await,
        Commands::List { since } => events::list(&client, output_format, since).await,
        Commands::Update { id, draft } => {
            events::update(&client, output_format, cli.quiet, &id, draft).await
        }
        Commands::Delete { id } => events::delete(&client, cli.quiet, &id).await,
        Commands::Purge { older_than } => events::purge(&client, output_format, older_than).await,
    }
}
