// Retention purge
// Decision: Runs in the server process on a fixed interval; skipped ticks are not made up

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::services::EventService;

/// Deletes events of every owner that ended more than `retention` ago
pub struct RetentionJob {
    service: Arc<EventService>,
    retention: chrono::Duration,
    interval: Duration,
}

impl RetentionJob {
    pub fn new(service: Arc<EventService>, retention: chrono::Duration, interval: Duration) -> Self {
        Self {
            service,
            retention,
            interval,
        }
    }

    /// Purge once and return the number of deleted events.
    pub async fn run_once(&self) -> calendar_core::Result<u64> {
        let Some(cutoff) = Utc::now().checked_sub_signed(self.retention) else {
            warn!(
                retention_days = self.retention.num_days(),
                "retention reaches before the earliest instant, nothing to purge"
            );
            return Ok(0);
        };
        let removed = self.service.purge_all_older_than(cutoff).await?;
        if removed > 0 {
            info!(removed, %cutoff, "retention purge removed events");
        }
        Ok(removed)
    }

    pub async fn run(self, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        error!(error = %e, "retention purge failed");
                    }
                }
            }
        }
        info!("retention job stopped");
    }
}
