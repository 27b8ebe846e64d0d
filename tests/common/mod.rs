#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use trailer_quote::catalog::{CatalogSync, CatalogTable, MemoryCatalogStore};
use trailer_quote::config::Config;
use trailer_quote::fakes::{FakeCatalogSource, FakeDistanceApi, MemorySink};
use trailer_quote::location::Coordinates;
use trailer_quote::pricing::{ExtraRequest, QuoteEngine, QuoteRequest, UsageType};
use trailer_quote::{build_engine, Collaborators};

pub const DOWNTOWN: &str = "100 Congress Ave, Austin, TX 78701";
pub const LAKE_TRAVIS: &str = "1 Lakeway Dr, Lakeway, TX 78734";
pub const NOWHERE: &str = "Somewhere that does not exist";

pub struct Harness {
    pub engine: QuoteEngine,
    pub sync: Arc<CatalogSync>,
    pub source: Arc<FakeCatalogSource>,
    pub api: Arc<FakeDistanceApi>,
    pub store: Arc<MemoryCatalogStore>,
    pub sink: Arc<MemorySink>,
}

pub fn distance_api() -> FakeDistanceApi {
    FakeDistanceApi::new()
        .with_address(
            "100 congress ave, austin, tx 78701",
            Coordinates::new(30.2650, -97.7447).unwrap(),
            1.2,
        )
        .with_address(
            "1 lakeway dr, lakeway, tx 78734",
            Coordinates::new(30.3638, -97.9797).unwrap(),
            42.0,
        )
}

pub fn catalog_source() -> FakeCatalogSource {
    let source = FakeCatalogSource::new();
    source.set_table(
        CatalogTable::Products,
        &[
            &[
                "product_id",
                "display_name",
                "base_rate_event",
                "base_rate_commercial",
                "stall_count",
                "is_ada",
            ],
            &["2-stall", "2 Stall Restroom Trailer", "950", "150", "2", "no"],
            &["ada", "ADA Restroom Trailer", "1200", "200", "1", "yes"],
        ],
    );
    source.set_table(
        CatalogTable::SeasonalRules,
        &[
            &["name", "start", "end", "multiplier"],
            &["Summer peak", "06-01", "08-31", "1.25"],
            &["July 4th", "07-01", "07-07", "1.5"],
            &["Holidays", "12-15", "01-05", "1.1"],
        ],
    );
    source.set_table(
        CatalogTable::DeliveryTiers,
        &[
            &["min_miles", "max_miles", "per_mile_rate", "base_fee"],
            &["0", "50", "2.00", "150"],
            &["50", "", "3.00", "200"],
        ],
    );
    source.set_table(
        CatalogTable::Extras,
        &[
            &["extra_id", "display_name", "unit_price", "pricing_mode"],
            &["hand-wash", "Hand Wash Station", "75", "flat"],
            &["attendant", "Restroom Attendant", "40", "per_day"],
        ],
    );
    source.set_table(
        CatalogTable::Branches,
        &[
            &["branch_id", "address", "latitude", "longitude"],
            &["austin", "Austin, TX", "30.2672", "-97.7431"],
            &["san-antonio", "San Antonio, TX", "29.4241", "-98.4936"],
        ],
    );
    source
}

pub fn harness_with(config: Config, api: FakeDistanceApi) -> Harness {
    let source = Arc::new(catalog_source());
    let api = Arc::new(api);
    let store = Arc::new(MemoryCatalogStore::default());
    let sink = Arc::new(MemorySink::default());
    let (engine, sync) = build_engine(
        &config,
        Collaborators {
            source: source.clone(),
            store: store.clone(),
            distance: api.clone(),
            sink: sink.clone(),
        },
    );
    Harness {
        engine,
        sync,
        source,
        api,
        store,
        sink,
    }
}

pub fn harness() -> Harness {
    harness_with(test_config(), distance_api())
}

pub fn test_config() -> Config {
    Config {
        sync_backoff_base: Duration::from_millis(1),
        sync_backoff_max: Duration::from_millis(5),
        ..Config::default()
    }
}

pub fn request(address: &str, product_id: &str, usage_type: UsageType, days: u32) -> QuoteRequest {
    QuoteRequest {
        request_id: format!("req-{}-{}", product_id, days),
        delivery_address: address.to_string(),
        product_id: product_id.to_string(),
        rental_start_date: chrono::NaiveDate::from_ymd_opt(2025, 10, 10).unwrap(),
        rental_days: days,
        usage_type,
        extras: Vec::new(),
    }
}

pub fn extra(extra_id: &str, qty: u32) -> ExtraRequest {
    ExtraRequest {
        extra_id: extra_id.to_string(),
        qty,
    }
}

/// Wait for the background resolution of `address` to finish.
pub async fn settle(engine: &QuoteEngine, address: &str) {
    for _ in 0..400 {
        if !engine.locations().in_flight(address) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("resolution for '{}' never finished", address);
}
