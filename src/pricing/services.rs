//! Quote orchestration.
//!
//! A quote reads the current catalog snapshot, finds the delivery distance
//! (cache first, then a deadline-bounded resolution), runs the pure
//! calculators and assembles an itemized quote. Recoverable gaps degrade the
//! quote with warnings; only a bad request or an address the geocoder cannot
//! interpret fails it.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::catalog::models::{CatalogSnapshot, ExtraItem, ProductRate};
use crate::catalog::{CatalogCache, CatalogStats, CatalogSync, SyncStatus};
use crate::location::models::{normalize_address, LocationSource, ResolvedLocation};
use crate::location::{LocationCache, LocationCacheStats, ResolveError};
use crate::reporting::{EventSink, EventType, MetricsSnapshot, OpsEvent, QuoteMetrics};

use super::calculators::{
    delivery_fee, extras_cost, seasonal_multiplier, trailer_rate, DurationFactors,
};
use super::money::Money;
use super::requests::QuoteRequest;
use super::responses::{
    DeliverySummary, ExtraSummary, LineItem, LineItemKind, MoneyResponse, Quote, QuoteMetadata,
    QuoteState, RentalSummary, SeasonalSummary,
};

/// Errors surfaced to the caller. Every other problem degrades the quote.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QuoteError {
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Address could not be resolved: {0}")]
    AddressUnresolvable(String),
}

/// Tunables for quote assembly
#[derive(Debug, Clone)]
pub struct QuoteSettings {
    /// Overall latency budget per quote
    pub deadline: Duration,
    /// Held back from the location wait for pricing and assembly
    pub assembly_reserve: Duration,
    pub max_rental_days: u32,
    pub currency: String,
    /// Catalog older than this is served with a warning
    pub catalog_ttl: chrono::Duration,
    pub factors: DurationFactors,
}

impl Default for QuoteSettings {
    fn default() -> Self {
        Self {
            deadline: Duration::from_millis(500),
            assembly_reserve: Duration::from_millis(20),
            max_rental_days: 365,
            currency: "USD".to_string(),
            catalog_ttl: chrono::Duration::hours(1),
            factors: DurationFactors::default(),
        }
    }
}

/// Everything the stats endpoint reports
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub quotes: MetricsSnapshot,
    pub catalog: CatalogStats,
    pub sync: SyncStatus,
    pub locations: LocationCacheStats,
}

/// Entry point for quoting, location warming and catalog refresh
#[derive(Clone)]
pub struct QuoteEngine {
    catalog: CatalogCache,
    locations: LocationCache,
    sync: Arc<CatalogSync>,
    metrics: Arc<QuoteMetrics>,
    sink: Arc<dyn EventSink>,
    settings: Arc<QuoteSettings>,
}

/// Per-request bookkeeping for states, warnings and review flags
struct Progress {
    states: Vec<QuoteState>,
    warnings: Vec<String>,
    requires_review: bool,
}

impl Progress {
    fn new() -> Self {
        Self {
            states: vec![QuoteState::Received],
            warnings: Vec::new(),
            requires_review: false,
        }
    }

    fn advance(&mut self, state: QuoteState) {
        self.states.push(state);
    }

    /// Record a fallback. The degraded state is entered once.
    fn degrade(&mut self, warning: impl Into<String>) {
        if !self.is_degraded() {
            self.states.push(QuoteState::Degraded);
        }
        self.warnings.push(warning.into());
    }

    fn review(&mut self, warning: impl Into<String>) {
        self.requires_review = true;
        self.degrade(warning);
    }

    fn is_degraded(&self) -> bool {
        self.states.contains(&QuoteState::Degraded)
    }
}

impl QuoteEngine {
    pub fn new(
        catalog: CatalogCache,
        locations: LocationCache,
        sync: Arc<CatalogSync>,
        metrics: Arc<QuoteMetrics>,
        sink: Arc<dyn EventSink>,
        settings: QuoteSettings,
    ) -> Self {
        Self {
            catalog,
            locations,
            sync,
            metrics,
            sink,
            settings: Arc::new(settings),
        }
    }

    pub fn settings(&self) -> &QuoteSettings {
        &self.settings
    }

    pub fn locations(&self) -> &LocationCache {
        &self.locations
    }

    pub fn catalog(&self) -> &CatalogCache {
        &self.catalog
    }

    /// Price a request. The address is always warmed afterwards so the next
    /// quote for it finds a fresh record.
    pub async fn get_quote(&self, request: QuoteRequest) -> Result<Quote, QuoteError> {
        let started = Instant::now();
        QuoteMetrics::incr(&self.metrics.quotes_total);

        let result = self.assemble(&request, started).await;
        self.locations.warm(&request.delivery_address);

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        match &result {
            Ok(quote) => {
                if quote.metadata.degraded {
                    QuoteMetrics::incr(&self.metrics.quotes_degraded);
                }
                if started.elapsed() > self.settings.deadline {
                    warn!(
                        "Quote {} took {:.1}ms (budget {:?})",
                        request.request_id, elapsed_ms, self.settings.deadline
                    );
                }
                info!(
                    "Quote {} for {}: {} {} ({:.1}ms, {:?})",
                    request.request_id,
                    request.product_id,
                    quote.subtotal.amount,
                    quote.subtotal.currency,
                    elapsed_ms,
                    quote.metadata.location_source
                );
                self.sink.emit(OpsEvent::new(
                    EventType::QuoteComputed,
                    true,
                    json!({
                        "request_id": request.request_id,
                        "quote_id": quote.quote_id,
                        "elapsed_ms": elapsed_ms,
                        "degraded": quote.metadata.degraded,
                        "requires_review": quote.metadata.requires_review,
                        "location_source": quote.metadata.location_source,
                        "location_cache_hit": quote.metadata.location_cache_hit,
                        "catalog_version": quote.metadata.catalog_version,
                    }),
                ));
            }
            Err(e) => {
                QuoteMetrics::incr(&self.metrics.quotes_rejected);
                info!("Quote {} rejected: {}", request.request_id, e);
                self.sink.emit(OpsEvent::new(
                    EventType::QuoteComputed,
                    false,
                    json!({
                        "request_id": request.request_id,
                        "elapsed_ms": elapsed_ms,
                        "error": e.to_string(),
                    }),
                ));
            }
        }
        result
    }

    /// Start resolving an address as soon as it is known in the call.
    /// Returns the cache key it was warmed under.
    pub fn warm_location(&self, address: &str) -> Result<String, QuoteError> {
        let key = normalize_address(address);
        if key.is_empty() {
            return Err(QuoteError::InvalidRequest("address is empty".to_string()));
        }
        self.locations.warm(&key);
        Ok(key)
    }

    /// Refresh the catalog in the background; joins a refresh already running.
    pub fn trigger_catalog_sync(&self) {
        self.sync.trigger();
    }

    pub fn stats(&self) -> EngineStats {
        EngineStats {
            quotes: self.metrics.snapshot(),
            catalog: self.catalog.stats(),
            sync: self.sync.status(),
            locations: self.locations.stats(),
        }
    }

    async fn assemble(&self, request: &QuoteRequest, started: Instant) -> Result<Quote, QuoteError> {
        self.validate(request)?;
        let mut progress = Progress::new();

        // Catalog
        let snapshot = self.catalog.snapshot();
        let product = self.select_product(&snapshot, request, &mut progress)?;
        if !snapshot.is_bootstrap() && self.catalog.is_stale(self.settings.catalog_ttl, Utc::now()) {
            progress.degrade(format!(
                "Pricing catalog v{} is older than {} minutes",
                snapshot.version,
                self.settings.catalog_ttl.num_minutes()
            ));
        }
        progress.advance(QuoteState::CatalogResolved);

        // Location
        let location = self.locate(request, started, &mut progress).await?;
        progress.advance(QuoteState::LocationResolved);

        // Pricing
        let currency = self.settings.currency.as_str();
        let money = |amount: Money| MoneyResponse::new(amount, currency);
        let days = request.rental_days;

        let rental = trailer_rate(&product, request.usage_type, days, self.settings.factors);
        let season = seasonal_multiplier(&snapshot.seasonal_rules, request.rental_start_date);
        let rental_total = rental.total.scale(season.multiplier);

        let record = &location.record;
        let delivery = delivery_fee(record.distance_miles, &snapshot.delivery_tiers);
        if delivery.is_none() {
            progress.review("No delivery tier covers this distance; delivery not priced");
        }

        let mut extras: Vec<(&ExtraItem, u32)> = Vec::with_capacity(request.extras.len());
        for wanted in &request.extras {
            match snapshot.extra(&wanted.extra_id) {
                Some(item) => extras.push((item, wanted.qty)),
                None => progress.review(format!(
                    "Unknown extra '{}' was not priced",
                    wanted.extra_id
                )),
            }
        }
        let extras_charge = extras_cost(&extras, days);
        progress.advance(QuoteState::Priced);

        // Assembly
        let usage = request.usage_type;
        let mut line_items = vec![LineItem {
            kind: LineItemKind::Rental,
            code: product.product_id.clone(),
            description: format!(
                "{} ({}, {} day{})",
                product.display_name,
                usage,
                days,
                if days == 1 { "" } else { "s" }
            ),
            quantity: 1,
            unit_price: money(rental_total),
            total: money(rental_total),
            total_cents: rental_total,
        }];

        let delivery_fee_total = delivery.as_ref().map_or(Money::ZERO, |d| d.fee);
        let tier_label = delivery.as_ref().map(|d| d.tier.label());
        line_items.push(LineItem {
            kind: LineItemKind::Delivery,
            code: tier_label.clone().unwrap_or_else(|| "unpriced".to_string()),
            description: format!(
                "Delivery from {} ({} mi{})",
                if record.nearest_branch_id.is_empty() {
                    "nearest branch"
                } else {
                    record.nearest_branch_id.as_str()
                },
                record.distance_miles.normalize(),
                if record.is_estimated { ", estimated" } else { "" }
            ),
            quantity: 1,
            unit_price: money(delivery_fee_total),
            total: money(delivery_fee_total),
            total_cents: delivery_fee_total,
        });

        for line in &extras_charge.lines {
            line_items.push(LineItem {
                kind: LineItemKind::Extra,
                code: line.extra_id.clone(),
                description: line.display_name.clone(),
                quantity: line.qty,
                unit_price: money(line.unit_price),
                total: money(line.total),
                total_cents: line.total,
            });
        }

        let subtotal: Money = line_items.iter().map(|l| l.total_cents).sum();

        let rental_end_date = request
            .rental_start_date
            .checked_add_days(chrono::Days::new(u64::from(days.saturating_sub(1))))
            .unwrap_or(request.rental_start_date);

        let adjustment = Money::from_cents(rental_total.cents() - rental.total.cents());
        let location_cache_hit =
            matches!(location.source, LocationSource::Cached | LocationSource::Stale);

        progress.advance(QuoteState::Returned);
        let degraded = progress.is_degraded();

        Ok(Quote {
            quote_id: Uuid::new_v4().to_string(),
            request_id: request.request_id.clone(),
            line_items,
            subtotal: money(subtotal),
            rental: RentalSummary {
                product_id: product.product_id.clone(),
                display_name: product.display_name.clone(),
                usage_type: usage,
                rental_start_date: request.rental_start_date,
                rental_end_date,
                rental_days: days,
                base_rate: money(rental.base_rate),
                basis: rental.basis,
                rate_total: money(rental.total),
                total: money(rental_total),
            },
            seasonal: SeasonalSummary {
                multiplier: season.multiplier,
                rule_name: season.rule_name,
                adjustment: money(adjustment),
            },
            delivery: DeliverySummary {
                normalized_address: record.normalized_address.clone(),
                branch_id: record.nearest_branch_id.clone(),
                distance_miles: record.distance_miles,
                is_estimated: record.is_estimated,
                tier: tier_label,
                base_fee: money(delivery.as_ref().map_or(Money::ZERO, |d| d.tier.base_fee)),
                per_mile_rate: money(delivery.as_ref().map_or(Money::ZERO, |d| d.tier.per_mile_rate)),
                fee: money(delivery_fee_total),
            },
            extras: extras_charge
                .lines
                .iter()
                .map(|l| ExtraSummary {
                    extra_id: l.extra_id.clone(),
                    qty: l.qty,
                    pricing_mode: l.pricing_mode,
                })
                .collect(),
            metadata: QuoteMetadata {
                catalog_version: snapshot.version,
                catalog_synced_at: snapshot.synced_at,
                location_source: location.source,
                location_cache_hit,
                calculation_time_ms: started.elapsed().as_secs_f64() * 1000.0,
                states: progress.states,
                degraded,
                requires_review: progress.requires_review,
                warnings: progress.warnings,
            },
        })
    }

    fn validate(&self, request: &QuoteRequest) -> Result<(), QuoteError> {
        let problem = if normalize_address(&request.delivery_address).is_empty() {
            Some("delivery_address is empty".to_string())
        } else if request.product_id.trim().is_empty() {
            Some("product_id is empty".to_string())
        } else if request.rental_days == 0 {
            Some("rental_days must be at least 1".to_string())
        } else if request.rental_days > self.settings.max_rental_days {
            Some(format!(
                "rental_days {} exceeds the maximum of {}",
                request.rental_days, self.settings.max_rental_days
            ))
        } else {
            request
                .extras
                .iter()
                .find(|e| e.qty == 0)
                .map(|e| format!("extra '{}' has zero quantity", e.extra_id))
        };
        match problem {
            Some(message) => Err(QuoteError::InvalidRequest(message)),
            None => Ok(()),
        }
    }

    fn select_product(
        &self,
        snapshot: &CatalogSnapshot,
        request: &QuoteRequest,
        progress: &mut Progress,
    ) -> Result<ProductRate, QuoteError> {
        if snapshot.is_bootstrap() {
            progress.review("Pricing catalog has not synced yet; rates are placeholders");
            return Ok(ProductRate {
                product_id: request.product_id.clone(),
                display_name: request.product_id.clone(),
                base_rate_event: Money::ZERO,
                base_rate_commercial: Money::ZERO,
                weekly_rate_commercial: None,
                monthly_rate_commercial: None,
                stall_count: 0,
                is_ada: false,
            });
        }

        let product = snapshot.find_product(&request.product_id).ok_or_else(|| {
            QuoteError::InvalidRequest(format!("unknown product '{}'", request.product_id))
        })?;
        if product.product_id != request.product_id {
            debug!(
                "Matched product '{}' to '{}'",
                request.product_id, product.product_id
            );
        }
        Ok(product.clone())
    }

    async fn locate(
        &self,
        request: &QuoteRequest,
        started: Instant,
        progress: &mut Progress,
    ) -> Result<ResolvedLocation, QuoteError> {
        let now = Utc::now();
        let location = match self.locations.lookup(&request.delivery_address).await {
            Some(record) => {
                let source = if record.is_fresh(now) {
                    LocationSource::Cached
                } else {
                    LocationSource::Stale
                };
                ResolvedLocation { record, source }
            }
            None => {
                let budget = self
                    .settings
                    .deadline
                    .saturating_sub(started.elapsed())
                    .saturating_sub(self.settings.assembly_reserve);
                match self.locations.resolve_now(&request.delivery_address, budget).await {
                    Ok(location) => location,
                    Err(ResolveError::AddressUnresolvable(address)) => {
                        return Err(QuoteError::AddressUnresolvable(address));
                    }
                    Err(e) => {
                        warn!("Location lookup failed for '{}': {}", request.delivery_address, e);
                        self.locations
                            .fallback(&request.delivery_address, &e.to_string())
                    }
                }
            }
        };

        match location.source {
            LocationSource::Stale => {
                progress.degrade("Delivery distance is from an expired cache entry");
            }
            LocationSource::Estimated => progress.review(format!(
                "Delivery distance not resolved in time; assumed {} mi",
                location.record.distance_miles.normalize()
            )),
            LocationSource::Cached | LocationSource::Resolved => {}
        }
        if location.record.is_estimated && location.source != LocationSource::Estimated {
            progress.degrade("Delivery distance is a straight-line estimate");
        }
        Ok(location)
    }
}
