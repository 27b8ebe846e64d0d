//! Catalog synchronization: pull every sheet, validate, persist, publish.
//!
//! Refreshes are coalesced; at most one runs at a time and concurrent
//! triggers share its result. A failed refresh never touches the published
//! snapshot.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::json;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use super::cache::CatalogCache;
use super::models::{normalize_tiers, CatalogSnapshot, SyncReport, TierError};
use super::parse::{
    parse_branches, parse_delivery_tiers, parse_extras, parse_products, parse_seasonal_rules,
    ParseError,
};
use super::source::{CatalogSource, CatalogTable, SheetTable, SourceError};
use super::store::{CatalogStore, StoreError};
use crate::inflight::{wait_for_value, InFlight, Join};
use crate::reporting::{EventSink, EventType, OpsEvent, QuoteMetrics};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    #[error(transparent)]
    Source(#[from] SourceError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error("Invalid delivery tiers: {0}")]
    Tiers(#[from] TierError),

    #[error("Could not persist catalog: {0}")]
    Store(#[from] StoreError),

    #[error("Catalog refresh ended without a result")]
    Interrupted,
}

/// Floor for the scheduled sync period
const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Timing and retry settings for the sync loop
#[derive(Debug, Clone)]
pub struct SyncPolicy {
    pub interval: Duration,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    /// Consecutive failed sync cycles before an alert is raised
    pub alert_after: u32,
}

impl Default for SyncPolicy {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(900),
            max_attempts: 4,
            backoff_base: Duration::from_millis(500),
            backoff_max: Duration::from_secs(30),
            alert_after: 3,
        }
    }
}

impl SyncPolicy {
    /// Delay after failed attempt `attempt` (1-based): base * 2^(attempt-1), capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        self.backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max)
    }
}

/// Raw contents of every catalog sheet from one fetch
#[derive(Debug, Clone, Default)]
pub struct CatalogSheets {
    pub products: SheetTable,
    pub seasonal_rules: SheetTable,
    pub delivery_tiers: SheetTable,
    pub extras: SheetTable,
    pub branches: SheetTable,
}

/// Parse and validate sheets into a snapshot.
pub fn build_snapshot(
    version: u64,
    synced_at: DateTime<Utc>,
    sheets: &CatalogSheets,
) -> Result<CatalogSnapshot, SyncError> {
    let (products, products_report) = parse_products(&sheets.products)?;
    let (seasonal_rules, seasonal_report) = parse_seasonal_rules(&sheets.seasonal_rules)?;
    let (tiers, tiers_report) = parse_delivery_tiers(&sheets.delivery_tiers)?;
    let (extras, extras_report) = parse_extras(&sheets.extras)?;
    let (branches, branches_report) = parse_branches(&sheets.branches)?;

    let delivery_tiers = normalize_tiers(tiers)?;

    Ok(CatalogSnapshot {
        version,
        synced_at: Some(synced_at),
        products,
        seasonal_rules,
        delivery_tiers,
        extras,
        branches,
        report: SyncReport {
            products: products_report,
            seasonal_rules: seasonal_report,
            delivery_tiers: tiers_report,
            extras: extras_report,
            branches: branches_report,
        },
    })
}

type RefreshResult = Result<Arc<CatalogSnapshot>, SyncError>;

/// Last refresh outcome, for the stats endpoint
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct SyncStatus {
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_failure_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
    pub in_progress: bool,
}

pub struct CatalogSync {
    source: Arc<dyn CatalogSource>,
    store: Arc<dyn CatalogStore>,
    cache: CatalogCache,
    sink: Arc<dyn EventSink>,
    metrics: Arc<QuoteMetrics>,
    policy: SyncPolicy,
    inflight: InFlight<(), RefreshResult>,
    consecutive_failures: AtomicU32,
    status: Mutex<SyncStatus>,
}

impl CatalogSync {
    pub fn new(
        source: Arc<dyn CatalogSource>,
        store: Arc<dyn CatalogStore>,
        cache: CatalogCache,
        sink: Arc<dyn EventSink>,
        metrics: Arc<QuoteMetrics>,
        policy: SyncPolicy,
    ) -> Self {
        Self {
            source,
            store,
            cache,
            sink,
            metrics,
            policy,
            inflight: InFlight::new(),
            consecutive_failures: AtomicU32::new(0),
            status: Mutex::new(SyncStatus::default()),
        }
    }

    pub fn cache(&self) -> &CatalogCache {
        &self.cache
    }

    pub fn policy(&self) -> &SyncPolicy {
        &self.policy
    }

    pub fn is_running(&self) -> bool {
        self.inflight.is_in_flight(&())
    }

    pub fn status(&self) -> SyncStatus {
        let mut status = self
            .status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        status.consecutive_failures = self.consecutive_failures.load(Ordering::Relaxed);
        status.in_progress = self.is_running();
        status
    }

    /// Run one refresh attempt, or join the sync already running.
    ///
    /// The work runs on its own task, so a caller that stops waiting does not
    /// cancel it.
    pub async fn refresh(self: &Arc<Self>) -> RefreshResult {
        self.run_cycle(1).await
    }

    /// Refresh with bounded exponential backoff between attempts. The whole
    /// run counts as one cycle towards the failure streak.
    pub async fn refresh_with_retry(self: &Arc<Self>) -> RefreshResult {
        self.run_cycle(self.policy.max_attempts.max(1)).await
    }

    /// Start a refresh in the background and return immediately.
    pub fn trigger(self: &Arc<Self>) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            if let Err(e) = this.refresh().await {
                debug!("Triggered catalog refresh failed: {}", e);
            }
        });
    }

    /// Sync on a fixed interval. The first tick fires immediately.
    pub fn run(self: &Arc<Self>) -> JoinHandle<()> {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            let period = if this.policy.interval.is_zero() {
                warn!("Catalog sync interval is zero; using {:?}", MIN_SYNC_INTERVAL);
                MIN_SYNC_INTERVAL
            } else {
                this.policy.interval
            };
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            info!("Catalog sync started (interval {:?})", period);
            loop {
                interval.tick().await;
                if let Ok(snapshot) = this.refresh_with_retry().await {
                    debug!("Scheduled catalog sync done (v{})", snapshot.version);
                }
            }
        })
    }

    async fn run_cycle(self: &Arc<Self>, attempts: u32) -> RefreshResult {
        let mut rx = match self.inflight.join_or_start(()) {
            Join::Joined(rx) => {
                debug!("Catalog sync already running; joining");
                rx
            }
            Join::Started(completion) => {
                let rx = completion.subscribe();
                let this = Arc::clone(self);
                tokio::spawn(async move {
                    let result = this.cycle(attempts).await;
                    completion.finish(result);
                });
                rx
            }
        };
        wait_for_value(&mut rx)
            .await
            .unwrap_or(Err(SyncError::Interrupted))
    }

    async fn cycle(&self, attempts: u32) -> RefreshResult {
        let mut attempt = 0;
        let result = loop {
            attempt += 1;
            match self.attempt(attempt).await {
                Ok(snapshot) => break Ok(snapshot),
                Err(e) if attempt >= attempts => {
                    if attempts > 1 {
                        error!("Catalog sync gave up after {} attempts: {}", attempt, e);
                    }
                    break Err(e);
                }
                Err(e) => {
                    let delay = self.policy.backoff(attempt);
                    warn!(
                        "Catalog sync attempt {}/{} failed: {}; retrying in {:?}",
                        attempt, attempts, e, delay
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };
        self.record_outcome(&result);
        result
    }

    async fn attempt(&self, attempt: u32) -> RefreshResult {
        let started = std::time::Instant::now();
        match self.fetch_and_publish().await {
            Ok(snapshot) => {
                QuoteMetrics::incr(&self.metrics.syncs_succeeded);
                {
                    let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
                    status.last_success_at = snapshot.synced_at;
                    status.last_error = None;
                }
                info!(
                    "Catalog sync v{} done in {:?} ({} rows skipped)",
                    snapshot.version,
                    started.elapsed(),
                    snapshot.report.rows_skipped()
                );
                self.sink.emit(OpsEvent::new(
                    EventType::CatalogSync,
                    true,
                    json!({
                        "version": snapshot.version,
                        "attempt": attempt,
                        "products": snapshot.products.len(),
                        "seasonal_rules": snapshot.seasonal_rules.len(),
                        "delivery_tiers": snapshot.delivery_tiers.len(),
                        "extras": snapshot.extras.len(),
                        "branches": snapshot.branches.len(),
                        "rows_skipped": snapshot.report.rows_skipped(),
                        "elapsed_ms": started.elapsed().as_millis() as u64,
                    }),
                ));
                Ok(snapshot)
            }
            Err(e) => {
                QuoteMetrics::incr(&self.metrics.syncs_failed);
                {
                    let mut status = self.status.lock().unwrap_or_else(PoisonError::into_inner);
                    status.last_failure_at = Some(Utc::now());
                    status.last_error = Some(e.to_string());
                }
                let serving = self.cache.version();
                warn!("Catalog sync failed, still serving v{}: {}", serving, e);
                self.sink.emit(OpsEvent::new(
                    EventType::CatalogSync,
                    false,
                    json!({
                        "error": e.to_string(),
                        "attempt": attempt,
                        "serving_version": serving,
                    }),
                ));
                Err(e)
            }
        }
    }

    /// Failure streak bookkeeping, once per cycle
    fn record_outcome(&self, result: &RefreshResult) {
        let e = match result {
            Ok(_) => {
                self.consecutive_failures.store(0, Ordering::Relaxed);
                return;
            }
            Err(e) => e,
        };
        let failures = self.consecutive_failures.fetch_add(1, Ordering::Relaxed) + 1;
        if failures == self.policy.alert_after {
            let serving = self.cache.version();
            error!(
                "Catalog sync has failed {} cycles in a row; catalog v{} is aging",
                failures, serving
            );
            self.sink.emit(OpsEvent::new(
                EventType::CatalogSyncAlert,
                false,
                json!({
                    "consecutive_failures": failures,
                    "last_error": e.to_string(),
                    "serving_version": serving,
                }),
            ));
        }
    }

    async fn fetch_and_publish(&self) -> RefreshResult {
        let (products, seasonal_rules, delivery_tiers, extras, branches) = tokio::try_join!(
            self.source.fetch_table(CatalogTable::Products),
            self.source.fetch_table(CatalogTable::SeasonalRules),
            self.source.fetch_table(CatalogTable::DeliveryTiers),
            self.source.fetch_table(CatalogTable::Extras),
            self.source.fetch_table(CatalogTable::Branches),
        )?;
        let sheets = CatalogSheets {
            products,
            seasonal_rules,
            delivery_tiers,
            extras,
            branches,
        };

        // Past both the published and the persisted version, so a failed
        // restore cannot collide with rows already stored
        let stored = self.store.latest_version().await?.unwrap_or(0);
        let version = self.cache.version().max(stored) + 1;
        let snapshot = Arc::new(build_snapshot(version, Utc::now(), &sheets)?);

        self.store.save(&snapshot).await?;
        self.cache.publish(Arc::clone(&snapshot));
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    fn sheet(rows: &[&[&str]]) -> SheetTable {
        SheetTable::from_values(
            rows.iter()
                .map(|r| r.iter().map(|c| c.to_string()).collect())
                .collect(),
        )
    }

    fn sheets() -> CatalogSheets {
        CatalogSheets {
            products: sheet(&[
                &["product_id", "display_name", "base_rate_event", "base_rate_commercial"],
                &["2-stall", "2 Stall Trailer", "450", "95"],
                &["broken", "Broken", "abc", "95"],
            ]),
            seasonal_rules: sheet(&[&["name", "start", "end", "multiplier"]]),
            delivery_tiers: sheet(&[
                &["min_miles", "max_miles", "per_mile_rate", "base_fee"],
                &["25", "", "3.00", "75"],
                &["0", "25", "0", "75"],
            ]),
            extras: sheet(&[&["extra_id", "unit_price"]]),
            branches: sheet(&[
                &["branch_id", "latitude", "longitude"],
                &["austin", "30.2672", "-97.7431"],
            ]),
        }
    }

    #[test]
    fn test_build_snapshot_sorts_tiers_and_counts_skips() {
        let snapshot = build_snapshot(4, Utc::now(), &sheets()).unwrap();
        assert_eq!(snapshot.version, 4);
        assert_eq!(snapshot.products.len(), 1);
        assert_eq!(snapshot.report.products.rows_skipped, 1);
        assert_eq!(snapshot.delivery_tiers[0].min_miles, Decimal::ZERO);
        assert_eq!(snapshot.delivery_tiers[1].max_miles, None);
    }

    #[test]
    fn test_build_snapshot_rejects_gapped_tiers() {
        let mut s = sheets();
        s.delivery_tiers = sheet(&[
            &["min_miles", "max_miles", "per_mile_rate", "base_fee"],
            &["0", "20", "0", "75"],
            &["25", "", "3.00", "75"],
        ]);
        let err = build_snapshot(1, Utc::now(), &s).unwrap_err();
        assert!(matches!(err, SyncError::Tiers(_)));
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = SyncPolicy {
            backoff_base: Duration::from_millis(100),
            backoff_max: Duration::from_millis(500),
            ..SyncPolicy::default()
        };
        assert_eq!(policy.backoff(1), Duration::from_millis(100));
        assert_eq!(policy.backoff(2), Duration::from_millis(200));
        assert_eq!(policy.backoff(3), Duration::from_millis(400));
        assert_eq!(policy.backoff(4), Duration::from_millis(500));
        assert_eq!(policy.backoff(40), Duration::from_millis(500));
    }
}
