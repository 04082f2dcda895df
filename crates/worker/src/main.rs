use std::sync::Arc;

use anyhow::Result;
use calendar_core::telemetry::{init_telemetry, TelemetryConfig};
use calendar_core::OtelMetrics;
use calendar_worker::{WorkerConfig, WorkerMode};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

#[derive(Parser)]
#[command(name = "calendar-worker")]
#[command(about = "Calendar notification worker", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Clone, Copy)]
enum Command {
    /// Publish notification tasks for due events
    Notify,
    /// Deliver notification tasks
    Send,
    /// Run both in one process
    All,
}

impl From<Command> for WorkerMode {
    fn from(command: Command) -> Self {
        match command {
            Command::Notify => WorkerMode::Notify,
            Command::Send => WorkerMode::Send,
            Command::All => WorkerMode::All,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    // Configure via OTEL_SERVICE_NAME, OTEL_EXPORTER_OTLP_ENDPOINT, RUST_LOG
    let _telemetry_guard = init_telemetry(
        TelemetryConfig::from_env("calendar-worker").with_version(env!("CARGO_PKG_VERSION")),
    );

    let mode = cli.command.map(WorkerMode::from).unwrap_or_default();
    let config = WorkerConfig::from_env()?;
    tracing::info!(
        ?mode,
        storage = %config.storage,
        queue_backend = ?config.queue_backend,
        queue = %config.notificator.queue_name,
        "calendar-worker starting"
    );

    let metrics = Arc::new(OtelMetrics::global().with_attribute("service", "calendar-worker"));
    let cancel = CancellationToken::new();
    let worker = tokio::spawn(calendar_worker::run(mode, config, metrics, cancel.clone()));
    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for shutdown signal");
            std::future::pending::<()>().await;
        }
    };

    calendar_worker::supervise(worker, shutdown, cancel).await?;

    tracing::info!("Worker shutdown complete");
    Ok(())
}
