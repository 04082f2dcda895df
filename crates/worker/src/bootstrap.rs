// Worker composition
// Decision: Backends are picked from WorkerConfig once; services only see trait objects
// Decision: In "all" mode the notificator and sender share one broker instance

use std::future::Future;
use std::sync::Arc;

use anyhow::{Context, Result};
use calendar_core::{EventSender, EventStore, MetricsSink};
use calendar_queue::{InMemoryTaskQueue, PollerConfig, PostgresTaskQueue, TaskQueue};
use calendar_storage::{create_event_store, create_pool};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::config::{QueueBackend, SenderKind, WorkerConfig};
use crate::notificator::Notificator;
use crate::sender::SenderService;
use crate::senders::{StreamSender, WebhookSender};

/// Which half of the pipeline this process runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WorkerMode {
    /// Scan the store and publish tasks
    Notify,
    /// Consume tasks and deliver them
    Send,
    #[default]
    All,
}

pub async fn build_store(config: &WorkerConfig) -> Result<Arc<dyn EventStore>> {
    create_event_store(config.storage, config.database_url.as_deref())
        .await
        .context("failed to create event store")
}

pub async fn build_queue(config: &WorkerConfig) -> Result<Arc<dyn TaskQueue>> {
    match config.queue_backend {
        QueueBackend::Memory => {
            info!("Using in-memory task queue");
            Ok(Arc::new(InMemoryTaskQueue::with_config(config.broker.clone())))
        }
        QueueBackend::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL is required for the postgres queue backend")?;
            let pool = create_pool(url)
                .await
                .context("failed to connect task queue database")?;
            let queue = PostgresTaskQueue::new(pool, config.broker.clone());
            queue.migrate().await.context("task queue migrations failed")?;
            info!("Using PostgreSQL task queue");
            Ok(Arc::new(queue))
        }
    }
}

pub fn build_sender(config: &WorkerConfig) -> Result<Arc<dyn EventSender>> {
    match &config.sender {
        SenderKind::Stdout => Ok(Arc::new(StreamSender::stdout())),
        SenderKind::Webhook(url) => {
            info!(url = %url, "Using webhook sender");
            Ok(Arc::new(
                WebhookSender::new(url.clone()).context("failed to build webhook client")?,
            ))
        }
    }
}

/// Run the selected services until `cancel` fires.
pub async fn run(
    mode: WorkerMode,
    config: WorkerConfig,
    metrics: Arc<dyn MetricsSink>,
    cancel: CancellationToken,
) -> Result<()> {
    config.validate(mode)?;
    let queue = build_queue(&config).await?;

    let notify = async {
        if mode == WorkerMode::Send {
            return Ok::<_, anyhow::Error>(());
        }
        let store = build_store(&config).await?;
        let notificator = Notificator::new(
            store,
            queue.clone(),
            metrics.clone(),
            config.notificator.clone(),
        );
        notificator
            .run(cancel.clone())
            .await
            .context("notificator failed")
    };

    let send = async {
        if mode == WorkerMode::Notify {
            return Ok::<_, anyhow::Error>(());
        }
        queue
            .declare_queue(&config.notificator.queue_name, config.notificator.durable)
            .await
            .context("failed to declare notification queue")?;
        queue
            .set_qos(config.notificator.prefetch_count)
            .await
            .context("failed to set prefetch")?;

        let service = SenderService::new(build_sender(&config)?, metrics.clone());
        service
            .run(
                queue.clone(),
                &config.notificator.queue_name,
                &config.consumer_tag,
                PollerConfig::default(),
                cancel.clone(),
            )
            .await;
        Ok::<_, anyhow::Error>(())
    };

    // the first failure drops the other half
    tokio::try_join!(notify, send)?;
    Ok(())
}

/// Wait for `worker` to finish or `shutdown` to resolve. On shutdown, cancel
/// and keep waiting so in-flight work settles before returning.
pub async fn supervise(
    mut worker: JoinHandle<Result<()>>,
    shutdown: impl Future<Output = ()>,
    cancel: CancellationToken,
) -> Result<()> {
    tokio::select! {
        result = &mut worker => result?,
        _ = shutdown => {
            info!("Received shutdown signal, waiting for in-flight work");
            cancel.cancel();
            worker.await?
        }
    }
}
