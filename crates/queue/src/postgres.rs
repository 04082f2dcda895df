//! PostgreSQL implementation of TaskQueue
//!
//! Production broker backed by four tables:
//! - Messages are claimed with SKIP LOCKED so concurrent consumers never
//!   receive the same ready message
//! - Outstanding deliveries past the redelivery timeout are claimable again
//! - Prefetch is enforced per consumer tag at claim time

use std::sync::atomic::{AtomicU16, Ordering};

use async_trait::async_trait;
use sqlx::{PgPool, Row};
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

use crate::broker::*;

/// PostgreSQL task queue
///
/// ```ignore
/// use calendar_queue::PostgresTaskQueue;
/// use sqlx::PgPool;
///
/// let pool = PgPool::connect("postgres://localhost/calendar").await?;
/// let queue = PostgresTaskQueue::new(pool, BrokerConfig::default());
/// queue.migrate().await?;
/// ```
pub struct PostgresTaskQueue {
    pool: PgPool,
    config: BrokerConfig,
    prefetch: AtomicU16,
}

impl PostgresTaskQueue {
    pub fn new(pool: PgPool, config: BrokerConfig) -> Self {
        Self {
            pool,
            config,
            prefetch: AtomicU16::new(0),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), QueueError> {
        let mut migrator = sqlx::migrate!("./migrations");
        // the event store shares the migrations table
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await.map_err(|e| {
            error!("Failed to run task queue migrations: {}", e);
            QueueError::Database(e.to_string())
        })?;
        info!("Task queue migrations applied");
        Ok(())
    }

    /// Drop non-durable queues and exchanges, as a broker does when it starts.
    ///
    /// Only safe to call before any consumer or publisher is running.
    #[instrument(skip(self))]
    pub async fn purge_transient(&self) -> Result<u64, QueueError> {
        let queues = sqlx::query("DELETE FROM task_queues WHERE durable = FALSE")
            .execute(&self.pool)
            .await
            .map_err(db_error("purge transient queues"))?;
        let exchanges = sqlx::query("DELETE FROM task_exchanges WHERE durable = FALSE")
            .execute(&self.pool)
            .await
            .map_err(db_error("purge transient exchanges"))?;

        let removed = queues.rows_affected() + exchanges.rows_affected();
        if removed > 0 {
            info!(removed, "purged transient queues and exchanges");
        }
        Ok(removed)
    }

    fn redelivery_secs(&self) -> f64 {
        self.config.redelivery_timeout.as_secs_f64()
    }

    async fn queue_exists(&self, queue: &str) -> Result<bool, QueueError> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM task_queues WHERE name = $1)")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("check queue"))
    }

    async fn exchange_exists(&self, exchange: &str) -> Result<bool, QueueError> {
        sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM task_exchanges WHERE name = $1)")
            .bind(exchange)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("check exchange"))
    }
}

fn db_error(op: &'static str) -> impl Fn(sqlx::Error) -> QueueError {
    move |e| {
        error!("Failed to {}: {}", op, e);
        QueueError::Database(e.to_string())
    }
}

#[async_trait]
impl TaskQueue for PostgresTaskQueue {
    #[instrument(skip(self))]
    async fn declare_queue(&self, name: &str, durable: bool) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO task_queues (name, durable)
            VALUES ($1, $2)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(durable)
        .execute(&self.pool)
        .await
        .map_err(db_error("declare queue"))?;

        let existing: bool = sqlx::query_scalar("SELECT durable FROM task_queues WHERE name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("read queue"))?;

        if existing != durable {
            return Err(QueueError::PreconditionFailed(format!(
                "queue '{name}' already declared with durable={existing}"
            )));
        }
        debug!(queue = name, durable, "declared queue");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn declare_exchange(
        &self,
        name: &str,
        kind: ExchangeKind,
        durable: bool,
    ) -> Result<(), QueueError> {
        sqlx::query(
            r#"
            INSERT INTO task_exchanges (name, kind, durable)
            VALUES ($1, $2, $3)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(name)
        .bind(kind.to_string())
        .bind(durable)
        .execute(&self.pool)
        .await
        .map_err(db_error("declare exchange"))?;

        let row = sqlx::query("SELECT kind, durable FROM task_exchanges WHERE name = $1")
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .map_err(db_error("read exchange"))?;

        let existing_kind: ExchangeKind = row.get::<String, _>("kind").parse()?;
        let existing_durable: bool = row.get("durable");
        if existing_kind != kind || existing_durable != durable {
            return Err(QueueError::PreconditionFailed(format!(
                "exchange '{name}' already declared as {existing_kind} durable={existing_durable}"
            )));
        }
        debug!(exchange = name, %kind, durable, "declared exchange");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn bind_queue(
        &self,
        queue: &str,
        routing_key: &str,
        exchange: &str,
    ) -> Result<(), QueueError> {
        if !self.queue_exists(queue).await? {
            return Err(QueueError::QueueNotFound(queue.to_string()));
        }
        if !self.exchange_exists(exchange).await? {
            return Err(QueueError::ExchangeNotFound(exchange.to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO task_bindings (queue, exchange, routing_key)
            VALUES ($1, $2, $3)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(queue)
        .bind(exchange)
        .bind(routing_key)
        .execute(&self.pool)
        .await
        .map_err(db_error("bind queue"))?;

        Ok(())
    }

    async fn set_qos(&self, prefetch_count: u16) -> Result<(), QueueError> {
        self.prefetch.store(prefetch_count, Ordering::Relaxed);
        Ok(())
    }

    #[instrument(skip(self, payload), fields(bytes = payload.len()))]
    async fn publish(
        &self,
        exchange: &str,
        routing_key: &str,
        payload: &[u8],
    ) -> Result<(), QueueError> {
        // Empty exchange name is the default exchange: route to the queue named by the key
        let result = sqlx::query(
            r#"
            WITH targets AS (
                SELECT b.queue
                FROM task_bindings b
                JOIN task_exchanges x ON x.name = b.exchange
                WHERE b.exchange = $1
                  AND (x.kind = 'fanout' OR b.routing_key = $2)
                UNION
                SELECT q.name
                FROM task_queues q
                WHERE $1 = '' AND q.name = $2
            )
            INSERT INTO task_messages (id, queue, payload)
            SELECT gen_random_uuid(), queue, $3
            FROM targets
            "#,
        )
        .bind(exchange)
        .bind(routing_key)
        .bind(payload)
        .execute(&self.pool)
        .await
        .map_err(db_error("publish message"))?;

        if result.rows_affected() == 0 {
            if !exchange.is_empty() && !self.exchange_exists(exchange).await? {
                return Err(QueueError::ExchangeNotFound(exchange.to_string()));
            }
            return Err(QueueError::Unroutable {
                exchange: exchange.to_string(),
                routing_key: routing_key.to_string(),
            });
        }

        debug!(exchange, routing_key, queues = result.rows_affected(), "published message");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn fetch(
        &self,
        queue: &str,
        consumer_tag: &str,
        ack_mode: AckMode,
    ) -> Result<Option<Delivery>, QueueError> {
        let prefetch = match ack_mode {
            AckMode::Manual => self.prefetch.load(Ordering::Relaxed) as i64,
            AckMode::Auto => 0,
        };

        // Claims the oldest ready message, or one whose delivery timed out.
        // The prefetch guard counts this consumer's live outstanding deliveries.
        let row = sqlx::query(
            r#"
            WITH next AS (
                SELECT id
                FROM task_messages
                WHERE queue = $1
                  AND (status = 'ready'
                       OR (status = 'delivered'
                           AND delivered_at < NOW() - make_interval(secs => $3)))
                ORDER BY published_at, id
                LIMIT 1
                FOR UPDATE SKIP LOCKED
            )
            UPDATE task_messages m
            SET status = 'delivered',
                consumer_tag = $2,
                delivery_tag = $5,
                delivered_at = NOW(),
                delivery_count = m.delivery_count + 1
            FROM next
            WHERE m.id = next.id
              AND ($4 = 0 OR (
                  SELECT COUNT(*)
                  FROM task_messages o
                  WHERE o.consumer_tag = $2
                    AND o.status = 'delivered'
                    AND o.delivered_at >= NOW() - make_interval(secs => $3)
              ) < $4)
            RETURNING m.delivery_tag, m.queue, m.payload, m.delivery_count, m.published_at
            "#,
        )
        .bind(queue)
        .bind(consumer_tag)
        .bind(self.redelivery_secs())
        .bind(prefetch)
        .bind(Uuid::now_v7())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error("fetch message"))?;

        let Some(row) = row else {
            if !self.queue_exists(queue).await? {
                return Err(QueueError::QueueNotFound(queue.to_string()));
            }
            return Ok(None);
        };

        let delivery_count = row.get::<i32, _>("delivery_count").max(1) as u32;
        let delivery = Delivery {
            delivery_tag: row.get("delivery_tag"),
            queue: row.get("queue"),
            payload: row.get("payload"),
            redelivered: delivery_count > 1,
            delivery_count,
            published_at: row.get("published_at"),
        };

        if ack_mode == AckMode::Auto {
            self.ack(delivery.delivery_tag).await?;
        }

        Ok(Some(delivery))
    }

    #[instrument(skip(self))]
    async fn ack(&self, delivery_tag: Uuid) -> Result<(), QueueError> {
        let result =
            sqlx::query("DELETE FROM task_messages WHERE delivery_tag = $1 AND status = 'delivered'")
                .bind(delivery_tag)
                .execute(&self.pool)
                .await
                .map_err(db_error("ack message"))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(delivery_tag));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn nack(&self, delivery_tag: Uuid, requeue: bool) -> Result<(), QueueError> {
        let next_status = if requeue { "ready" } else { "dead" };
        let result = sqlx::query(
            r#"
            UPDATE task_messages
            SET status = $2,
                consumer_tag = NULL,
                delivery_tag = NULL,
                delivered_at = NULL
            WHERE delivery_tag = $1 AND status = 'delivered'
            "#,
        )
        .bind(delivery_tag)
        .bind(next_status)
        .execute(&self.pool)
        .await
        .map_err(db_error("nack message"))?;

        if result.rows_affected() == 0 {
            return Err(QueueError::UnknownDelivery(delivery_tag));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn cancel(&self, consumer_tag: &str) -> Result<u64, QueueError> {
        let result = sqlx::query(
            r#"
            UPDATE task_messages
            SET status = 'ready',
                consumer_tag = NULL,
                delivery_tag = NULL,
                delivered_at = NULL
            WHERE consumer_tag = $1 AND status = 'delivered'
            "#,
        )
        .bind(consumer_tag)
        .execute(&self.pool)
        .await
        .map_err(db_error("cancel consumer"))?;

        let requeued = result.rows_affected();
        if requeued > 0 {
            debug!(consumer_tag, requeued, "requeued unacked messages of cancelled consumer");
        }
        Ok(requeued)
    }

    #[instrument(skip(self))]
    async fn stats(&self, queue: &str) -> Result<QueueStats, QueueError> {
        if !self.queue_exists(queue).await? {
            return Err(QueueError::QueueNotFound(queue.to_string()));
        }

        let rows = sqlx::query(
            r#"
            SELECT status, COUNT(*) AS count
            FROM task_messages
            WHERE queue = $1
            GROUP BY status
            "#,
        )
        .bind(queue)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error("read queue stats"))?;

        let mut stats = QueueStats::default();
        for row in rows {
            let count = row.get::<i64, _>("count").max(0) as u64;
            match row.get::<String, _>("status").as_str() {
                "ready" => stats.ready = count,
                "delivered" => stats.unacked = count,
                "dead" => stats.dead = count,
                _ => {}
            }
        }
        Ok(stats)
    }
}
