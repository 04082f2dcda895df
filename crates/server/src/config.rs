// Server configuration
// Decision: Environment variables only (optionally from .env)

use std::time::Duration;

use anyhow::{bail, Context, Result};
use calendar_storage::StorageKind;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub http_addr: String,
    pub storage: StorageKind,
    pub database_url: Option<String>,
    /// Prefix for all API routes, e.g. "/api"
    pub api_prefix: String,
    /// Events that ended longer ago than this are purged
    pub retention: chrono::Duration,
    pub retention_interval: Duration,
    /// Origins allowed for cross-origin requests; empty means same-origin only
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            http_addr: "0.0.0.0:9000".to_string(),
            storage: StorageKind::Memory,
            database_url: None,
            api_prefix: String::new(),
            retention: chrono::Duration::days(365),
            retention_interval: Duration::from_secs(3600),
            cors_origins: Vec::new(),
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables
    ///
    /// `HTTP_ADDR`, `STORAGE`, `DATABASE_URL`, `API_PREFIX`, `RETENTION_DAYS`,
    /// `RETENTION_INTERVAL_SECS`, `CORS_ALLOWED_ORIGINS` (comma separated)
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(addr) = std::env::var("HTTP_ADDR") {
            config.http_addr = addr;
        }
        if let Ok(raw) = std::env::var("STORAGE") {
            config.storage = raw.parse().map_err(anyhow::Error::msg)?;
        }
        config.database_url = std::env::var("DATABASE_URL").ok();
        config.api_prefix = std::env::var("API_PREFIX").unwrap_or_default();

        if let Ok(raw) = std::env::var("RETENTION_DAYS") {
            config.retention = parse_retention_days(&raw)?;
        }
        if let Ok(raw) = std::env::var("RETENTION_INTERVAL_SECS") {
            let secs: u64 = raw.trim().parse().context("invalid RETENTION_INTERVAL_SECS")?;
            config.retention_interval = Duration::from_secs(secs.max(1));
        }

        config.cors_origins = std::env::var("CORS_ALLOWED_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .unwrap_or_default();

        Ok(config)
    }
}

/// Upper bound for `RETENTION_DAYS`, roughly a century
pub const MAX_RETENTION_DAYS: i64 = 36_500;

fn parse_retention_days(raw: &str) -> Result<chrono::Duration> {
    let days: i64 = raw.trim().parse().context("invalid RETENTION_DAYS")?;
    if !(0..=MAX_RETENTION_DAYS).contains(&days) {
        bail!("RETENTION_DAYS must be between 0 and {MAX_RETENTION_DAYS}, got {days}");
    }
    Ok(chrono::Duration::days(days))
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}
