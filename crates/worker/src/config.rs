// Worker configuration
// Decision: Environment variables only (optionally from .env); no config files
// Decision: Backends default to postgres; the store and queue must be shared with
// other processes unless a single process owns both ends

use std::str::FromStr;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use calendar_queue::{BrokerConfig, ExchangeKind};
use calendar_storage::StorageKind;
use uuid::Uuid;

use crate::bootstrap::WorkerMode;
use crate::notificator::NotificatorConfig;

pub const DEFAULT_QUEUE_NAME: &str = "notification.tasks";
pub const DEFAULT_EXCHANGE_NAME: &str = "notification.exchange";

/// Which broker backs the task queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBackend {
    Memory,
    #[default]
    Postgres,
}

impl FromStr for QueueBackend {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" => Ok(QueueBackend::Memory),
            "postgres" | "postgresql" => Ok(QueueBackend::Postgres),
            other => Err(format!("unknown queue backend: {other}")),
        }
    }
}

/// Where notifications end up
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SenderKind {
    /// Human-readable line on stdout
    #[default]
    Stdout,
    /// JSON POST to a URL
    Webhook(String),
}

/// Settings shared by the notify and send modes
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub storage: StorageKind,
    pub database_url: Option<String>,
    pub queue_backend: QueueBackend,
    pub notificator: NotificatorConfig,
    pub broker: BrokerConfig,
    pub consumer_tag: String,
    pub sender: SenderKind,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            storage: StorageKind::Postgres,
            database_url: None,
            queue_backend: QueueBackend::Postgres,
            notificator: NotificatorConfig::default(),
            broker: BrokerConfig::default(),
            consumer_tag: format!("sender-{}", Uuid::now_v7()),
            sender: SenderKind::Stdout,
        }
    }
}

/// Upper bound for `NOTIFY_WINDOW_HOURS`, one leap year
pub const MAX_NOTIFY_WINDOW_HOURS: i64 = 24 * 366;

fn window_hours(hours: i64) -> Result<chrono::Duration> {
    if !(0..=MAX_NOTIFY_WINDOW_HOURS).contains(&hours) {
        bail!("NOTIFY_WINDOW_HOURS must be between 0 and {MAX_NOTIFY_WINDOW_HOURS}, got {hours}");
    }
    Ok(chrono::Duration::hours(hours))
}

fn env_parse<T: FromStr>(key: &str) -> Result<Option<T>>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {key}: {e}")),
        _ => Ok(None),
    }
}

impl WorkerConfig {
    /// Create configuration from environment variables
    ///
    /// - `STORAGE`: `memory` | `postgres`
    /// - `DATABASE_URL`
    /// - `QUEUE_BACKEND`: `memory` | `postgres`
    /// - `QUEUE_NAME`, `EXCHANGE_NAME`, `EXCHANGE_KIND` (`fanout` | `direct`), `QUEUE_DURABLE`
    /// - `NOTIFY_TICK_SECS`, `NOTIFY_WINDOW_HOURS`, `PREFETCH_COUNT`
    /// - `REDELIVERY_TIMEOUT_SECS`
    /// - `CONSUMER_TAG`
    /// - `SENDER_KIND` (`stdout` | `webhook`), `WEBHOOK_URL`
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(storage) = env_parse::<StorageKind>("STORAGE")? {
            config.storage = storage;
        }
        config.database_url = std::env::var("DATABASE_URL").ok();
        if let Some(backend) = env_parse::<QueueBackend>("QUEUE_BACKEND")? {
            config.queue_backend = backend;
        }

        let n = &mut config.notificator;
        if let Ok(name) = std::env::var("QUEUE_NAME") {
            n.routing_key = name.clone();
            n.queue_name = name;
        }
        if let Ok(name) = std::env::var("EXCHANGE_NAME") {
            n.exchange_name = name;
        }
        if let Some(kind) = env_parse::<ExchangeKind>("EXCHANGE_KIND")? {
            n.exchange_kind = kind;
        }
        if let Some(durable) = env_parse::<bool>("QUEUE_DURABLE")? {
            n.durable = durable;
        }
        if let Some(secs) = env_parse::<u64>("NOTIFY_TICK_SECS")? {
            n.tick_interval = Duration::from_secs(secs.max(1));
        }
        if let Some(hours) = env_parse::<i64>("NOTIFY_WINDOW_HOURS")? {
            n.window = window_hours(hours)?;
        }
        if let Some(prefetch) = env_parse::<u16>("PREFETCH_COUNT")? {
            n.prefetch_count = prefetch;
        }

        if let Some(secs) = env_parse::<u64>("REDELIVERY_TIMEOUT_SECS")? {
            config.broker = config
                .broker
                .with_redelivery_timeout(Duration::from_secs(secs));
        }
        if let Ok(tag) = std::env::var("CONSUMER_TAG") {
            config.consumer_tag = tag;
        }

        config.sender = match std::env::var("SENDER_KIND").as_deref() {
            Ok("webhook") => {
                let url = std::env::var("WEBHOOK_URL")
                    .context("WEBHOOK_URL is required when SENDER_KIND=webhook")?;
                SenderKind::Webhook(url)
            }
            Ok("stdout") | Err(_) => SenderKind::Stdout,
            Ok(other) => bail!("unknown SENDER_KIND: {other}"),
        };

        Ok(config)
    }

    /// Reject backend combinations under which `mode` could never deliver anything.
    ///
    /// An in-memory store is private to this process, so only the send half,
    /// which never reads it, may use one. An in-memory queue only connects the
    /// two halves when both run here.
    pub fn validate(&self, mode: WorkerMode) -> Result<()> {
        if self.storage == StorageKind::Memory && mode != WorkerMode::Send {
            bail!(
                "STORAGE=memory gives the notificator a private empty store; \
                 use STORAGE=postgres with the database calendar-server writes to"
            );
        }
        if self.queue_backend == QueueBackend::Memory && mode != WorkerMode::All {
            bail!(
                "QUEUE_BACKEND=memory is only reachable within one process; \
                 use QUEUE_BACKEND=postgres or run both halves with `all`"
            );
        }
        let needs_database = (self.storage == StorageKind::Postgres && mode != WorkerMode::Send)
            || self.queue_backend == QueueBackend::Postgres;
        if needs_database && self.database_url.is_none() {
            bail!("DATABASE_URL is required for the postgres backends");
        }
        Ok(())
    }
}
