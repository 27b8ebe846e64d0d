//! Durable storage for the last-good catalog snapshot.
//!
//! Snapshots are stored whole as JSON, one row per version, so a restart can
//! serve the last synced catalog before the spreadsheet is reachable.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tokio::sync::Mutex;

use super::models::CatalogSnapshot;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Stored snapshot is corrupt: {0}")]
    Corrupt(String),

    #[error("Catalog version {0} is already stored")]
    Conflict(u64),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Highest-version snapshot, if any has been saved
    async fn load_latest(&self) -> Result<Option<CatalogSnapshot>, StoreError>;

    /// Highest saved version, without loading the snapshot
    async fn latest_version(&self) -> Result<Option<u64>, StoreError>;

    /// Persist a snapshot. Fails with `Conflict` unless its version is new.
    async fn save(&self, snapshot: &CatalogSnapshot) -> Result<(), StoreError>;
}

/// Process-local store, used when no database is configured and in tests
#[derive(Debug, Default)]
pub struct MemoryCatalogStore {
    latest: Mutex<Option<CatalogSnapshot>>,
}

#[async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn load_latest(&self) -> Result<Option<CatalogSnapshot>, StoreError> {
        Ok(self.latest.lock().await.clone())
    }

    async fn latest_version(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.latest.lock().await.as_ref().map(|s| s.version))
    }

    async fn save(&self, snapshot: &CatalogSnapshot) -> Result<(), StoreError> {
        let mut latest = self.latest.lock().await;
        if let Some(current) = latest.as_ref() {
            if snapshot.version <= current.version {
                return Err(StoreError::Conflict(snapshot.version));
            }
        }
        *latest = Some(snapshot.clone());
        Ok(())
    }
}

/// Row from catalog_snapshots
#[derive(Debug, Clone, FromRow)]
struct SnapshotRow {
    version: i64,
    synced_at: DateTime<Utc>,
    payload: serde_json::Value,
}

/// Postgres-backed store
#[derive(Debug, Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create the snapshot table if it does not exist
    pub async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS catalog_snapshots (
                version    BIGINT PRIMARY KEY,
                synced_at  TIMESTAMPTZ NOT NULL,
                payload    JSONB NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl CatalogStore for PgCatalogStore {
    async fn load_latest(&self) -> Result<Option<CatalogSnapshot>, StoreError> {
        let row = sqlx::query_as::<_, SnapshotRow>(
            r#"
            SELECT version, synced_at, payload
            FROM catalog_snapshots
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .fetch_optional(&self.pool)
        .await?;

        row.map(|row| {
            let mut snapshot: CatalogSnapshot = serde_json::from_value(row.payload)
                .map_err(|e| StoreError::Corrupt(format!("v{}: {}", row.version, e)))?;
            snapshot.version = u64::try_from(row.version)
                .map_err(|_| StoreError::Corrupt(format!("negative version {}", row.version)))?;
            snapshot.synced_at = Some(row.synced_at);
            Ok(snapshot)
        })
        .transpose()
    }

    async fn latest_version(&self) -> Result<Option<u64>, StoreError> {
        let max: Option<i64> = sqlx::query_scalar("SELECT MAX(version) FROM catalog_snapshots")
            .fetch_one(&self.pool)
            .await?;
        max.map(|v| {
            u64::try_from(v).map_err(|_| StoreError::Corrupt(format!("negative version {}", v)))
        })
        .transpose()
    }

    async fn save(&self, snapshot: &CatalogSnapshot) -> Result<(), StoreError> {
        let version = i64::try_from(snapshot.version)
            .map_err(|_| StoreError::Corrupt(format!("version {} out of range", snapshot.version)))?;
        let payload =
            serde_json::to_value(snapshot).map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO catalog_snapshots (version, synced_at, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (version) DO NOTHING
            "#,
        )
        .bind(version)
        .bind(snapshot.synced_at.unwrap_or_else(Utc::now))
        .bind(payload)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 0 {
            return Err(StoreError::Conflict(snapshot.version));
        }
        Ok(())
    }
}
