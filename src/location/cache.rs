//! Location cache using moka
//!
//! Maps a normalized address to its resolved distance record. Resolution
//! happens in the background, at most once at a time per address; every
//! concurrent `warm` or `resolve_now` for that address joins the same task.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::models::{normalize_address, LocationRecord, LocationSource, ResolvedLocation};
use super::resolver::{DistanceResolver, ResolveError};
use crate::catalog::CatalogCache;
use crate::inflight::{wait_for_value, InFlight, Join};
use crate::reporting::{EventSink, EventType, OpsEvent, QuoteMetrics};

type Resolution = Result<LocationRecord, ResolveError>;

/// Sizing and expiry for the location cache
#[derive(Debug, Clone)]
pub struct LocationCacheConfig {
    pub capacity: u64,
    /// How long past `ttl_expires_at` a record may still be served
    pub stale_grace: Duration,
    /// Upper bound on how long any entry stays in memory
    pub max_entry_age: Duration,
    /// Distance used when nothing better is known before the deadline
    pub fallback_distance_miles: Decimal,
}

impl Default for LocationCacheConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            stale_grace: Duration::from_secs(7 * 24 * 60 * 60),
            max_entry_age: Duration::from_secs(8 * 24 * 60 * 60),
            fallback_distance_miles: Decimal::from(25),
        }
    }
}

/// Location cache holding resolved distance records
#[derive(Clone)]
pub struct LocationCache {
    inner: Arc<Inner>,
}

struct Inner {
    /// normalized address -> LocationRecord
    records: Cache<String, Arc<LocationRecord>>,
    inflight: InFlight<String, Resolution>,
    /// Straight-line records for addresses geocoded but not yet routed
    provisional: Mutex<HashMap<String, LocationRecord>>,
    resolver: DistanceResolver,
    catalog: CatalogCache,
    metrics: Arc<QuoteMetrics>,
    sink: Arc<dyn EventSink>,
    stale_grace: chrono::Duration,
    fallback_distance_miles: Decimal,
}

impl LocationCache {
    pub fn new(
        resolver: DistanceResolver,
        catalog: CatalogCache,
        metrics: Arc<QuoteMetrics>,
        sink: Arc<dyn EventSink>,
        config: LocationCacheConfig,
    ) -> Self {
        let records = Cache::builder()
            .max_capacity(config.capacity)
            .time_to_live(config.max_entry_age)
            .build();
        Self {
            inner: Arc::new(Inner {
                records,
                inflight: InFlight::new(),
                provisional: Mutex::new(HashMap::new()),
                resolver,
                catalog,
                metrics,
                sink,
                stale_grace: chrono::Duration::from_std(config.stale_grace)
                    .unwrap_or_else(|_| chrono::Duration::days(7)),
                fallback_distance_miles: config.fallback_distance_miles,
            }),
        }
    }

    /// Cached record for an address, fresh or within the stale grace window.
    /// Never starts a resolution.
    pub async fn lookup(&self, address: &str) -> Option<LocationRecord> {
        let key = normalize_address(address);
        let now = Utc::now();
        let record = self
            .inner
            .records
            .get(&key)
            .await
            .filter(|r| now < r.ttl_expires_at + self.inner.stale_grace);

        match &record {
            Some(r) if r.is_fresh(now) => QuoteMetrics::incr(&self.inner.metrics.location_hits),
            Some(_) => {
                debug!("Serving stale location for '{}'", key);
                QuoteMetrics::incr(&self.inner.metrics.location_stale_hits);
            }
            None => QuoteMetrics::incr(&self.inner.metrics.location_misses),
        }
        record.map(|r| (*r).clone())
    }

    /// Start a background resolution unless one is running or the cached
    /// record is still fresh. Returns immediately.
    pub fn warm(&self, address: &str) {
        let key = normalize_address(address);
        if key.is_empty() {
            return;
        }
        let (_, started) = self.join_or_spawn(key);
        if !started {
            debug!("Location resolution already in flight");
        }
    }

    /// Resolve within `deadline`. When the resolution is not done in time,
    /// falls back to the stale record, then the straight-line distance if
    /// geocoding has finished, then the configured default.
    ///
    /// Only `AddressUnresolvable` arriving inside the deadline is an error.
    pub async fn resolve_now(
        &self,
        address: &str,
        deadline: Duration,
    ) -> Result<ResolvedLocation, ResolveError> {
        let key = normalize_address(address);
        if key.is_empty() {
            return Err(ResolveError::AddressUnresolvable(address.to_string()));
        }

        let now = Utc::now();
        let cached = self.inner.records.get(&key).await;
        if let Some(record) = cached.as_ref().filter(|r| r.is_fresh(now)) {
            return Ok(ResolvedLocation {
                record: (**record).clone(),
                source: LocationSource::Cached,
            });
        }

        let (mut rx, _) = self.join_or_spawn(key.clone());
        let outcome = tokio::time::timeout(deadline, wait_for_value(&mut rx)).await;
        let reason = match outcome {
            Ok(Some(Ok(record))) => {
                return Ok(ResolvedLocation {
                    record,
                    source: LocationSource::Resolved,
                });
            }
            Ok(Some(Err(ResolveError::AddressUnresolvable(a)))) => {
                return Err(ResolveError::AddressUnresolvable(a));
            }
            Ok(Some(Err(e))) => e.to_string(),
            Ok(None) => "resolution ended without a result".to_string(),
            Err(_) => format!("not resolved within {:?}", deadline),
        };

        if let Some(record) = cached.filter(|r| now < r.ttl_expires_at + self.inner.stale_grace) {
            debug!("Using stale location for '{}': {}", key, reason);
            return Ok(ResolvedLocation {
                record: (*record).clone(),
                source: LocationSource::Stale,
            });
        }

        Ok(self.estimated(key, &reason))
    }

    /// Best estimate for an address that could not be resolved: the
    /// straight-line distance if it has been geocoded, otherwise the
    /// configured default from the first branch.
    pub fn fallback(&self, address: &str, reason: &str) -> ResolvedLocation {
        self.estimated(normalize_address(address), reason)
    }

    /// Store a record directly, replacing any existing one for its address.
    pub async fn insert(&self, record: LocationRecord) {
        self.inner
            .records
            .insert(record.normalized_address.clone(), Arc::new(record))
            .await;
    }

    pub fn in_flight(&self, address: &str) -> bool {
        self.inner.inflight.is_in_flight(&normalize_address(address))
    }

    /// Get cache statistics for monitoring
    pub fn stats(&self) -> LocationCacheStats {
        LocationCacheStats {
            entries: self.inner.records.entry_count(),
            in_flight: self.inner.inflight.len(),
        }
    }

    fn join_or_spawn(&self, key: String) -> (watch::Receiver<Option<Resolution>>, bool) {
        match self.inner.inflight.join_or_start(key.clone()) {
            Join::Joined(rx) => (rx, false),
            Join::Started(completion) => {
                let rx = completion.subscribe();
                let this = self.clone();
                tokio::spawn(async move {
                    let result = this.run_resolution(&key).await;
                    completion.finish(result);
                });
                (rx, true)
            }
        }
    }

    async fn run_resolution(&self, key: &str) -> Resolution {
        if let Some(record) = self.inner.records.get(key).await {
            if record.is_fresh(Utc::now()) {
                return Ok((*record).clone());
            }
        }

        QuoteMetrics::incr(&self.inner.metrics.resolutions_started);
        let started = std::time::Instant::now();
        let geocoded = match self.inner.resolver.geocode(key).await {
            Ok(geocoded) => geocoded,
            Err(e) => return Err(self.resolution_failed(key, e, started)),
        };

        // Visible to deadline fallbacks until the routed record is cached
        let estimate = self.inner.resolver.estimate(&geocoded);
        let _provisional = ProvisionalGuard::publish(&self.inner, key, estimate);
        let record = self.inner.resolver.route(&geocoded).await;
        self.insert(record.clone()).await;
        self.inner.sink.emit(OpsEvent::new(
            EventType::LocationResolved,
            true,
            json!({
                "address": key,
                "branch_id": record.nearest_branch_id,
                "distance_miles": record.distance_miles.to_string(),
                "is_estimated": record.is_estimated,
                "elapsed_ms": started.elapsed().as_millis() as u64,
            }),
        ));
        Ok(record)
    }

    fn resolution_failed(
        &self,
        key: &str,
        e: ResolveError,
        started: std::time::Instant,
    ) -> ResolveError {
        QuoteMetrics::incr(&self.inner.metrics.resolutions_failed);
        warn!("Failed to resolve location '{}': {}", key, e);
        self.inner.sink.emit(OpsEvent::new(
            EventType::LocationResolved,
            false,
            json!({
                "address": key,
                "error": e.to_string(),
                "elapsed_ms": started.elapsed().as_millis() as u64,
            }),
        ));
        e
    }

    fn estimated(&self, key: String, reason: &str) -> ResolvedLocation {
        QuoteMetrics::incr(&self.inner.metrics.location_estimates);
        let provisional = self
            .inner
            .provisional
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&key)
            .cloned();
        let record = match provisional {
            Some(record) => {
                info!("Using straight-line distance for '{}': {}", key, reason);
                record
            }
            None => {
                info!("Estimating distance for '{}': {}", key, reason);
                self.default_estimate(key)
            }
        };
        ResolvedLocation {
            record,
            source: LocationSource::Estimated,
        }
    }

    /// Default-distance record from the first branch. Not cached; it expires
    /// immediately so nothing mistakes it for a resolution.
    fn default_estimate(&self, key: String) -> LocationRecord {
        let snapshot = self.inner.catalog.snapshot();
        let branch_id = snapshot
            .branches
            .first()
            .map(|b| b.branch_id.clone())
            .unwrap_or_default();
        let now = Utc::now();
        LocationRecord {
            normalized_address: key,
            nearest_branch_id: branch_id,
            distance_miles: self.inner.fallback_distance_miles.max(Decimal::ZERO),
            is_estimated: true,
            resolved_at: now,
            ttl_expires_at: now,
        }
    }
}

/// Holds a provisional record for the lifetime of the routing stage
struct ProvisionalGuard<'a> {
    inner: &'a Inner,
    key: &'a str,
}

impl<'a> ProvisionalGuard<'a> {
    fn publish(inner: &'a Inner, key: &'a str, record: LocationRecord) -> Self {
        inner
            .provisional
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.to_string(), record);
        Self { inner, key }
    }
}

impl Drop for ProvisionalGuard<'_> {
    fn drop(&mut self) {
        self.inner
            .provisional
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(self.key);
    }
}

/// Location cache statistics for monitoring endpoint
#[derive(Debug, Clone, Serialize)]
pub struct LocationCacheStats {
    pub entries: u64,
    pub in_flight: usize,
}
