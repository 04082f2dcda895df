//! PostgreSQL implementation of EventStore
//!
//! - Every owner-scoped statement filters on `(id, owner)` together
//! - Overlap races between concurrent writers are caught by the
//!   `calendar_events_no_overlap` exclusion constraint and reported as
//!   `StoreError::Conflict`

use async_trait::async_trait;
use calendar_core::{due_horizon, Event, EventStore, StoreError, TimeRange};
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, error, info, instrument};
use uuid::Uuid;

const EXCLUSION_VIOLATION: &str = "23P01";
const UNIQUE_VIOLATION: &str = "23505";

/// Open a connection pool.
pub async fn create_pool(database_url: &str) -> Result<PgPool, StoreError> {
    PgPoolOptions::new()
        .max_connections(20)
        .connect(database_url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            StoreError::Database(e.to_string())
        })
}

/// PostgreSQL event store
///
/// ```ignore
/// let pool = create_pool("postgres://localhost/calendar").await?;
/// let store = PostgresEventStore::new(pool);
/// store.migrate().await?;
/// ```
#[derive(Clone)]
pub struct PostgresEventStore {
    pool: PgPool,
}

impl PostgresEventStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Apply the bundled schema migrations.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let mut migrator = sqlx::migrate!("./migrations");
        // the task queue shares the migrations table
        migrator.set_ignore_missing(true);
        migrator.run(&self.pool).await.map_err(|e| {
            error!("Failed to run event store migrations: {}", e);
            StoreError::Database(e.to_string())
        })?;
        info!("Event store migrations applied");
        Ok(())
    }
}

fn row_to_event(row: &PgRow) -> Event {
    Event {
        id: row.get("id"),
        owner: row.get("owner"),
        title: row.get("title"),
        text: row.get("text"),
        start_time: row.get("start_time"),
        end_time: row.get("end_time"),
        notified: row.get("notified"),
    }
}

fn map_write_error(op: &str, event: &Event, e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        match db.code().as_deref() {
            Some(EXCLUSION_VIOLATION) => {
                debug!(id = %event.id, owner = %event.owner, "exclusion constraint rejected {}", op);
                return StoreError::Conflict(db.message().to_string());
            }
            Some(UNIQUE_VIOLATION) => return StoreError::Duplicate(event.id),
            _ => {}
        }
    }
    error!("Failed to {} event: {}", op, e);
    StoreError::Database(e.to_string())
}

#[async_trait]
impl EventStore for PostgresEventStore {
    #[instrument(skip(self, event), fields(id = %event.id, owner = %event.owner))]
    async fn save(&self, event: &Event) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO calendar_events (id, owner, title, text, start_time, end_time, notified)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(event.id)
        .bind(&event.owner)
        .bind(&event.title)
        .bind(&event.text)
        .bind(event.start_time)
        .bind(event.end_time)
        .bind(event.notified)
        .execute(&self.pool)
        .await
        .map_err(|e| map_write_error("save", event, e))?;

        debug!("saved event");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn get(&self, id: Uuid, owner: &str) -> Result<Event, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, owner, title, text, start_time, end_time, notified
            FROM calendar_events
            WHERE id = $1 AND owner = $2
            "#,
        )
        .bind(id)
        .bind(owner)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to get event: {}", e);
            StoreError::Database(e.to_string())
        })?
        .ok_or(StoreError::NotFound(id))?;

        Ok(row_to_event(&row))
    }

    #[instrument(skip(self))]
    async fn list_since(
        &self,
        owner: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, title, text, start_time, end_time, notified
            FROM calendar_events
            WHERE owner = $1 AND start_time >= $2
            ORDER BY start_time, id
            "#,
        )
        .bind(owner)
        .bind(since)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list events: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(rows.iter().map(row_to_event).collect())
    }

    #[instrument(skip(self))]
    async fn count_overlapping(
        &self,
        owner: &str,
        range: &TimeRange,
        exclude: Option<Uuid>,
    ) -> Result<u64, StoreError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM calendar_events
            WHERE owner = $1
              AND start_time < $3
              AND $2 < end_time
              AND ($4::uuid IS NULL OR id <> $4)
            "#,
        )
        .bind(owner)
        .bind(range.start())
        .bind(range.end())
        .bind(exclude)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to count overlapping events: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(count.max(0) as u64)
    }

    #[instrument(skip(self, event), fields(id = %event.id, owner = %event.owner))]
    async fn update(&self, event: &Event) -> Result<Event, StoreError> {
        let row = sqlx::query(
            r#"
            UPDATE calendar_events
            SET title = $3,
                text = $4,
                start_time = $5,
                end_time = $6,
                updated_at = NOW()
            WHERE id = $1 AND owner = $2
            RETURNING id, owner, title, text, start_time, end_time, notified
            "#,
        )
        .bind(event.id)
        .bind(&event.owner)
        .bind(&event.title)
        .bind(&event.text)
        .bind(event.start_time)
        .bind(event.end_time)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| map_write_error("update", event, e))?
        .ok_or(StoreError::NotFound(event.id))?;

        debug!("updated event");
        Ok(row_to_event(&row))
    }

    #[instrument(skip(self))]
    async fn delete(&self, id: Uuid, owner: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM calendar_events WHERE id = $1 AND owner = $2")
            .bind(id)
            .bind(owner)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to delete event: {}", e);
                StoreError::Database(e.to_string())
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    #[instrument(skip(self))]
    async fn delete_ended_before(
        &self,
        owner: &str,
        cutoff: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM calendar_events WHERE owner = $1 AND end_time < $2")
            .bind(owner)
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to purge events: {}", e);
                StoreError::Database(e.to_string())
            })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn delete_all_ended_before(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM calendar_events WHERE end_time < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to purge events: {}", e);
                StoreError::Database(e.to_string())
            })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    async fn list_due(
        &self,
        now: DateTime<Utc>,
        window: Duration,
    ) -> Result<Vec<Event>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, owner, title, text, start_time, end_time, notified
            FROM calendar_events
            WHERE notified = FALSE AND start_time <= $1
            ORDER BY start_time, id
            "#,
        )
        .bind(due_horizon(now, window))
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Failed to list due events: {}", e);
            StoreError::Database(e.to_string())
        })?;

        Ok(rows.iter().map(row_to_event).collect())
    }

    #[instrument(skip(self))]
    async fn mark_notified(&self, id: Uuid) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE calendar_events SET notified = TRUE WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Failed to mark event notified: {}", e);
                StoreError::Database(e.to_string())
            })?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }
}
