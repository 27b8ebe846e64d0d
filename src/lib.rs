//! Real-time restroom trailer quote engine.
//!
//! Quotes combine a spreadsheet-synced pricing catalog with cached delivery
//! distances and must answer within a live call's latency budget.

use std::sync::Arc;

use axum::Router;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

pub mod catalog;
pub mod config;
pub mod error;
pub mod fakes;
pub mod inflight;
pub mod location;
pub mod pricing;
pub mod reporting;

use catalog::{CatalogCache, CatalogSource, CatalogStore, CatalogSync};
use config::Config;
use location::{DistanceApi, DistanceResolver, LocationCache};
use pricing::QuoteEngine;
use reporting::{EventSink, QuoteMetrics};

/// Shared state for the HTTP handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: QuoteEngine,
}

/// External collaborators the engine is wired to
pub struct Collaborators {
    pub source: Arc<dyn CatalogSource>,
    pub store: Arc<dyn CatalogStore>,
    pub distance: Arc<dyn DistanceApi>,
    pub sink: Arc<dyn EventSink>,
}

/// Wire caches, resolver, scheduler and engine from config.
///
/// Nothing is started; the caller restores the catalog and runs the
/// scheduler.
pub fn build_engine(
    config: &Config,
    collaborators: Collaborators,
) -> (QuoteEngine, Arc<CatalogSync>) {
    let metrics = Arc::new(QuoteMetrics::default());
    let catalog = CatalogCache::new();

    let sync = Arc::new(CatalogSync::new(
        collaborators.source,
        collaborators.store,
        catalog.clone(),
        collaborators.sink.clone(),
        metrics.clone(),
        config.sync_policy(),
    ));

    let resolver =
        DistanceResolver::new(collaborators.distance, catalog.clone(), config.distance_timeout)
            .with_ttl(config.location_ttl, config.location_estimate_ttl);
    let locations = LocationCache::new(
        resolver,
        catalog.clone(),
        metrics.clone(),
        collaborators.sink.clone(),
        config.location_cache_config(),
    );

    let engine = QuoteEngine::new(
        catalog,
        locations,
        sync.clone(),
        metrics,
        collaborators.sink,
        config.quote_settings(),
    );
    (engine, sync)
}

/// HTTP application with tracing and CORS
pub fn app(state: AppState) -> Router {
    pricing::router()
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
