//! In-memory holder of the current catalog snapshot.
//!
//! Readers clone the current `Arc` under a read lock held for a pointer copy;
//! publishing swaps the pointer. A reader that already holds a snapshot keeps
//! it unchanged for as long as it likes.

use std::sync::{Arc, PoisonError, RwLock};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{info, warn};

use super::models::CatalogSnapshot;
use super::store::{CatalogStore, StoreError};

#[derive(Clone)]
pub struct CatalogCache {
    current: Arc<RwLock<Arc<CatalogSnapshot>>>,
}

impl CatalogCache {
    /// Cache holding the bootstrap snapshot
    pub fn new() -> Self {
        Self {
            current: Arc::new(RwLock::new(Arc::new(CatalogSnapshot::bootstrap()))),
        }
    }

    /// The most recently published snapshot, or the bootstrap snapshot.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(PoisonError::into_inner))
    }

    pub fn version(&self) -> u64 {
        self.snapshot().version
    }

    /// Swap in a newer snapshot. Returns `false` (and keeps the current one)
    /// when `snapshot` is not newer than what is already published.
    pub fn publish(&self, snapshot: Arc<CatalogSnapshot>) -> bool {
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        if snapshot.version <= current.version {
            warn!(
                "Ignoring catalog v{} (current is v{})",
                snapshot.version, current.version
            );
            return false;
        }
        info!(
            "Published catalog v{} ({} products, {} tiers, {} branches)",
            snapshot.version,
            snapshot.products.len(),
            snapshot.delivery_tiers.len(),
            snapshot.branches.len()
        );
        *current = snapshot;
        true
    }

    /// Whether the snapshot is older than `max_age`. Bootstrap is always stale.
    pub fn is_stale(&self, max_age: chrono::Duration, now: DateTime<Utc>) -> bool {
        match self.snapshot().age(now) {
            Some(age) => age > max_age,
            None => true,
        }
    }

    /// Load the last-good snapshot from the durable store, if there is one.
    pub async fn restore(&self, store: &dyn CatalogStore) -> Result<bool, StoreError> {
        match store.load_latest().await? {
            Some(snapshot) => Ok(self.publish(Arc::new(snapshot))),
            None => {
                info!("No stored catalog; serving bootstrap snapshot");
                Ok(false)
            }
        }
    }

    pub fn stats(&self) -> CatalogStats {
        let snapshot = self.snapshot();
        CatalogStats {
            version: snapshot.version,
            bootstrap: snapshot.is_bootstrap(),
            synced_at: snapshot.synced_at,
            products: snapshot.products.len(),
            seasonal_rules: snapshot.seasonal_rules.len(),
            delivery_tiers: snapshot.delivery_tiers.len(),
            extras: snapshot.extras.len(),
            branches: snapshot.branches.len(),
            rows_skipped: snapshot.report.rows_skipped(),
        }
    }
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Catalog summary for the monitoring endpoint
#[derive(Debug, Clone, Serialize)]
pub struct CatalogStats {
    pub version: u64,
    pub bootstrap: bool,
    pub synced_at: Option<DateTime<Utc>>,
    pub products: usize,
    pub seasonal_rules: usize,
    pub delivery_tiers: usize,
    pub extras: usize,
    pub branches: usize,
    pub rows_skipped: usize,
}
