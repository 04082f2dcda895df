// Storage layer for calendar events
// Decision: Support both PostgreSQL (production) and in-memory (dev mode)
// Decision: Backend is chosen once, at composition time, via StorageKind
//
// - InMemoryEventStore: implements EventStore with parking_lot maps
// - PostgresEventStore: implements EventStore with sqlx

pub mod memory;
pub mod postgres;

use std::str::FromStr;
use std::sync::Arc;

use calendar_core::{EventStore, StoreError};
use tracing::info;

pub use memory::InMemoryEventStore;
pub use postgres::{create_pool, PostgresEventStore};

/// Which event store backend to build
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StorageKind {
    #[default]
    Memory,
    Postgres,
}

impl FromStr for StorageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "memory" | "in-memory" | "in_memory" => Ok(StorageKind::Memory),
            "postgres" | "postgresql" | "sql" => Ok(StorageKind::Postgres),
            other => Err(format!("unknown storage kind: {other}")),
        }
    }
}

impl std::fmt::Display for StorageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageKind::Memory => write!(f, "memory"),
            StorageKind::Postgres => write!(f, "postgres"),
        }
    }
}

/// Build an event store. PostgreSQL requires `database_url` and runs migrations.
pub async fn create_event_store(
    kind: StorageKind,
    database_url: Option<&str>,
) -> Result<Arc<dyn EventStore>, StoreError> {
    match kind {
        StorageKind::Memory => {
            info!("Using in-memory event store");
            Ok(Arc::new(InMemoryEventStore::new()))
        }
        StorageKind::Postgres => {
            let url = database_url.ok_or_else(|| {
                StoreError::Database("DATABASE_URL is required for postgres storage".to_string())
            })?;
            let store = PostgresEventStore::new(create_pool(url).await?);
            store.migrate().await?;
            info!("Using PostgreSQL event store");
            Ok(Arc::new(store))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_kind_parse() {
        assert_eq!("memory".parse::<StorageKind>().unwrap(), StorageKind::Memory);
        assert_eq!(
            "Postgres".parse::<StorageKind>().unwrap(),
            StorageKind::Postgres
        );
        assert_eq!("sql".parse::<StorageKind>().unwrap(), StorageKind::Postgres);
        assert!("redis".parse::<StorageKind>().is_err());
    }

    #[tokio::test]
    async fn test_postgres_requires_url() {
        let result = create_event_store(StorageKind::Postgres, None).await;
        assert!(matches!(result, Err(StoreError::Database(_))));
    }

    #[tokio::test]
    async fn test_memory_store() {
        let store = create_event_store(StorageKind::Memory, None).await.unwrap();
        assert!(store
            .list_since("alice", chrono::Utc::now())
            .await
            .unwrap()
            .is_empty());
    }
}
