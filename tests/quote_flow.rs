mod common;

use std::time::{Duration, Instant};

use rust_decimal_macros::dec;

use common::*;
use trailer_quote::location::LocationSource;
use trailer_quote::pricing::{LineItemKind, Money, QuoteError, QuoteState, UsageType};
use trailer_quote::reporting::EventType;

fn line_sum(quote: &trailer_quote::pricing::Quote) -> rust_decimal::Decimal {
    quote.line_items.iter().map(|l| l.total.amount).sum()
}

#[tokio::test]
async fn test_event_quote_with_42_mile_delivery() {
    let h = harness();
    h.sync.refresh().await.unwrap();

    h.engine.warm_location(LAKE_TRAVIS).unwrap();
    settle(&h.engine, LAKE_TRAVIS).await;

    let mut req = request(LAKE_TRAVIS, "2 Stall Restroom Trailer", UsageType::Event, 3);
    req.extras = vec![extra("hand-wash", 1)];
    let quote = h.engine.get_quote(req).await.unwrap();

    assert_eq!(quote.rental.product_id, "2-stall");
    assert_eq!(quote.seasonal.multiplier, dec!(1));
    assert_eq!(quote.seasonal.rule_name, None);
    assert_eq!(quote.delivery.distance_miles, dec!(42.00));
    assert_eq!(quote.delivery.fee.amount, dec!(234.00));
    assert_eq!(quote.delivery.tier.as_deref(), Some("0-50 mi"));

    let kinds: Vec<LineItemKind> = quote.line_items.iter().map(|l| l.kind).collect();
    assert_eq!(
        kinds,
        vec![LineItemKind::Rental, LineItemKind::Delivery, LineItemKind::Extra]
    );
    assert_eq!(quote.line_items[0].total.amount, dec!(950.00));
    assert_eq!(quote.subtotal.amount, dec!(1259.00));
    assert_eq!(quote.subtotal.amount, line_sum(&quote));
    assert_eq!(quote.subtotal.currency, "USD");
}

#[tokio::test]
async fn test_warm_cache_quote_is_fast_and_exact() {
    let h = harness();
    h.sync.refresh().await.unwrap();
    h.engine.warm_location(DOWNTOWN).unwrap();
    settle(&h.engine, DOWNTOWN).await;

    let started = Instant::now();
    let mut req = request(DOWNTOWN, "ada", UsageType::Commercial, 10);
    req.extras = vec![extra("attendant", 2), extra("hand-wash", 3)];
    let quote = h.engine.get_quote(req).await.unwrap();

    assert!(started.elapsed() < Duration::from_millis(500));
    assert_eq!(quote.metadata.location_source, LocationSource::Cached);
    assert!(quote.metadata.location_cache_hit);
    assert!(!quote.metadata.degraded);
    assert!(quote.metadata.warnings.is_empty());
    assert_eq!(
        quote.metadata.states,
        vec![
            QuoteState::Received,
            QuoteState::CatalogResolved,
            QuoteState::LocationResolved,
            QuoteState::Priced,
            QuoteState::Returned
        ]
    );

    // 200/day, week = 5 days = 1000: one week + three days = 1600
    assert_eq!(quote.rental.total.amount, dec!(1600.00));
    // attendant 2 x 40 x 10 days + hand wash 3 x 75
    let extras: Vec<_> = quote.line_items.iter().filter(|l| l.kind == LineItemKind::Extra).collect();
    assert_eq!(extras[0].total.amount, dec!(800.00));
    assert_eq!(extras[1].total.amount, dec!(225.00));
    // 150 + 2.00 x 1.2
    assert_eq!(quote.delivery.fee.amount, dec!(152.40));
    assert_eq!(quote.subtotal.amount, line_sum(&quote));
    assert_eq!(quote.subtotal.amount, dec!(2777.40));
}

#[tokio::test]
async fn test_seasonal_multiplier_applies_to_rental_only() {
    let h = harness();
    h.sync.refresh().await.unwrap();
    h.engine.warm_location(DOWNTOWN).unwrap();
    settle(&h.engine, DOWNTOWN).await;

    let mut req = request(DOWNTOWN, "2-stall", UsageType::Event, 1);
    req.rental_start_date = chrono::NaiveDate::from_ymd_opt(2025, 7, 4).unwrap();
    let quote = h.engine.get_quote(req).await.unwrap();

    // Summer peak is defined before July 4th and wins
    assert_eq!(quote.seasonal.rule_name.as_deref(), Some("Summer peak"));
    assert_eq!(quote.rental.total.amount, dec!(1187.50));
    assert_eq!(quote.seasonal.adjustment.amount, dec!(237.50));
    assert_eq!(quote.delivery.fee.amount, dec!(152.40));
    assert_eq!(quote.subtotal.amount, line_sum(&quote));
}

#[tokio::test]
async fn test_cold_start_returns_review_quote() {
    let h = harness();

    let quote = h
        .engine
        .get_quote(request(DOWNTOWN, "2-stall", UsageType::Event, 2))
        .await
        .unwrap();

    assert_eq!(quote.metadata.catalog_version, 0);
    assert!(quote.metadata.requires_review);
    assert!(quote.metadata.degraded);
    assert!(quote.metadata.states.contains(&QuoteState::Degraded));
    assert_eq!(quote.rental.total.amount, dec!(0.00));
    assert_eq!(quote.delivery.fee.amount, dec!(0.00));
    assert_eq!(quote.subtotal.amount, Money::ZERO.to_decimal());
    assert!(!quote.metadata.warnings.is_empty());
}

#[tokio::test]
async fn test_zero_deadline_estimates_then_cache_fills() {
    let config = trailer_quote::config::Config {
        quote_deadline: Duration::ZERO,
        ..test_config()
    };
    let h = harness_with(config, distance_api().with_delay(Duration::from_millis(20)));
    h.sync.refresh().await.unwrap();

    let quote = h
        .engine
        .get_quote(request(LAKE_TRAVIS, "2-stall", UsageType::Event, 1))
        .await
        .unwrap();
    assert_eq!(quote.metadata.location_source, LocationSource::Estimated);
    assert!(quote.delivery.is_estimated);
    assert_eq!(quote.delivery.distance_miles, dec!(25));
    assert!(quote.metadata.degraded);
    assert_eq!(quote.subtotal.amount, line_sum(&quote));

    settle(&h.engine, LAKE_TRAVIS).await;
    let record = h.engine.locations().lookup(LAKE_TRAVIS).await.unwrap();
    assert!(!record.is_estimated);
    assert_eq!(record.distance_miles, dec!(42.00));

    let second = h
        .engine
        .get_quote(request(LAKE_TRAVIS, "2-stall", UsageType::Event, 1))
        .await
        .unwrap();
    assert_eq!(second.metadata.location_source, LocationSource::Cached);
    assert_eq!(second.delivery.fee.amount, dec!(234.00));
}

#[tokio::test]
async fn test_concurrent_warms_resolve_once() {
    let h = harness_with(test_config(), distance_api().with_delay(Duration::from_millis(30)));
    h.sync.refresh().await.unwrap();

    let variants = [
        "100 Congress Ave, Austin, TX 78701",
        "100 congress ave,austin,tx 78701",
        "  100 CONGRESS AVE , AUSTIN , TX 78701. ",
    ];
    let mut tasks = Vec::new();
    for i in 0..24 {
        let engine = h.engine.clone();
        let address = variants[i % variants.len()];
        tasks.push(tokio::spawn(async move {
            engine.warm_location(address).unwrap()
        }));
    }
    let mut keys = Vec::new();
    for task in tasks {
        keys.push(task.await.unwrap());
    }
    keys.dedup();
    assert_eq!(keys.len(), 1);

    settle(&h.engine, DOWNTOWN).await;
    assert_eq!(h.api.geocode_calls(), 1);
    assert_eq!(h.api.route_calls(), 1);

    let a = h.engine.locations().lookup(variants[0]).await.unwrap();
    let b = h.engine.locations().lookup(variants[2]).await.unwrap();
    assert_eq!(a, b);
}

#[tokio::test]
async fn test_quote_warms_address_afterwards() {
    let h = harness_with(test_config(), distance_api().with_delay(Duration::from_millis(10)));
    h.sync.refresh().await.unwrap();

    let _ = h
        .engine
        .get_quote(request(DOWNTOWN, "unknown product", UsageType::Event, 1))
        .await;
    settle(&h.engine, DOWNTOWN).await;
    assert!(h.engine.locations().lookup(DOWNTOWN).await.is_some());
}

#[tokio::test]
async fn test_invalid_requests() {
    let h = harness();
    h.sync.refresh().await.unwrap();

    let unknown = h
        .engine
        .get_quote(request(DOWNTOWN, "porta potty deluxe", UsageType::Event, 1))
        .await;
    assert!(matches!(unknown, Err(QuoteError::InvalidRequest(_))));

    let zero_days = h
        .engine
        .get_quote(request(DOWNTOWN, "2-stall", UsageType::Event, 0))
        .await;
    assert!(matches!(zero_days, Err(QuoteError::InvalidRequest(_))));

    let mut zero_qty = request(DOWNTOWN, "2-stall", UsageType::Event, 1);
    zero_qty.extras = vec![extra("hand-wash", 0)];
    assert!(matches!(
        h.engine.get_quote(zero_qty).await,
        Err(QuoteError::InvalidRequest(_))
    ));

    let blank = h
        .engine
        .get_quote(request("  ", "2-stall", UsageType::Event, 1))
        .await;
    assert!(matches!(blank, Err(QuoteError::InvalidRequest(_))));

    assert_eq!(h.engine.stats().quotes.quotes_rejected, 4);
    assert_eq!(h.sink.count(EventType::QuoteComputed, false), 4);
}

#[tokio::test]
async fn test_unresolvable_address_is_an_error() {
    let h = harness();
    h.sync.refresh().await.unwrap();

    let result = h
        .engine
        .get_quote(request(NOWHERE, "2-stall", UsageType::Event, 1))
        .await;
    assert!(matches!(result, Err(QuoteError::AddressUnresolvable(_))));
}

#[tokio::test]
async fn test_unknown_extra_is_flagged_not_priced() {
    let h = harness();
    h.sync.refresh().await.unwrap();
    h.engine.warm_location(DOWNTOWN).unwrap();
    settle(&h.engine, DOWNTOWN).await;

    let mut req = request(DOWNTOWN, "2-stall", UsageType::Event, 1);
    req.extras = vec![extra("hand-wash", 1), extra("generator", 1)];
    let quote = h.engine.get_quote(req).await.unwrap();

    assert_eq!(quote.extras.len(), 1);
    assert!(quote.metadata.requires_review);
    assert!(quote.metadata.warnings.iter().any(|w| w.contains("generator")));
    assert_eq!(quote.subtotal.amount, line_sum(&quote));
}

#[tokio::test]
async fn test_routing_outage_marks_distance_estimated() {
    let h = harness_with(test_config(), distance_api().failing_routes());
    h.sync.refresh().await.unwrap();

    let quote = h
        .engine
        .get_quote(request(LAKE_TRAVIS, "2-stall", UsageType::Event, 1))
        .await
        .unwrap();
    assert_eq!(quote.metadata.location_source, LocationSource::Resolved);
    assert!(quote.delivery.is_estimated);
    assert!(quote.metadata.degraded);
    assert!(!quote.metadata.requires_review);
    assert_eq!(quote.delivery.branch_id, "austin");
}

#[tokio::test]
async fn test_slow_routing_quotes_straight_line_distance() {
    let h = harness_with(
        test_config(),
        distance_api().with_route_delay(Duration::from_millis(1_000)),
    );
    h.sync.refresh().await.unwrap();

    let quote = h
        .engine
        .get_quote(request(LAKE_TRAVIS, "2-stall", UsageType::Event, 1))
        .await
        .unwrap();
    assert_eq!(quote.metadata.location_source, LocationSource::Estimated);
    assert!(quote.delivery.is_estimated);
    assert_eq!(quote.delivery.branch_id, "austin");
    assert!(quote.delivery.distance_miles > dec!(10));
    assert!(quote.delivery.distance_miles < dec!(20));
    assert!(quote.metadata.requires_review);
    assert_eq!(quote.subtotal.amount, line_sum(&quote));

    settle(&h.engine, LAKE_TRAVIS).await;
    let record = h.engine.locations().lookup(LAKE_TRAVIS).await.unwrap();
    assert!(!record.is_estimated);
    assert_eq!(record.distance_miles, dec!(42.00));
}

#[tokio::test]
async fn test_geocoding_outage_degrades_instead_of_failing() {
    let h = harness_with(test_config(), distance_api().failing_geocode());
    h.sync.refresh().await.unwrap();

    let quote = h
        .engine
        .get_quote(request(DOWNTOWN, "2-stall", UsageType::Event, 1))
        .await
        .unwrap();
    assert_eq!(quote.metadata.location_source, LocationSource::Estimated);
    assert!(quote.delivery.is_estimated);
    assert_eq!(quote.delivery.distance_miles, dec!(25));
    assert!(quote.metadata.requires_review);

    settle(&h.engine, DOWNTOWN).await;
    assert!(h.engine.locations().lookup(DOWNTOWN).await.is_none());
}
