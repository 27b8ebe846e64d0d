//! Catalog records and the immutable snapshot that bundles them.
//!
//! A snapshot is built once per sync, published as an `Arc`, and never
//! mutated afterwards.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::location::geo::Coordinates;
use crate::pricing::money::Money;

/// A rentable unit (restroom trailer or toilet configuration)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProductRate {
    pub product_id: String,
    pub display_name: String,
    pub base_rate_event: Money,
    /// Per-day commercial rate
    pub base_rate_commercial: Money,
    #[serde(default)]
    pub weekly_rate_commercial: Option<Money>,
    #[serde(default)]
    pub monthly_rate_commercial: Option<Money>,
    pub stall_count: u32,
    pub is_ada: bool,
}

/// Recurring calendar day (no year), used for seasonal ranges
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MonthDay {
    pub month: u32,
    pub day: u32,
}

impl MonthDay {
    /// Build a month-day, rejecting impossible dates. Feb 29 is allowed.
    pub fn new(month: u32, day: u32) -> Option<Self> {
        NaiveDate::from_ymd_opt(2000, month, day).map(|_| Self { month, day })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            month: date.month(),
            day: date.day(),
        }
    }
}

/// Seasonal price multiplier over an inclusive, possibly year-wrapping range
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeasonalRule {
    pub name: String,
    pub date_range_start: MonthDay,
    pub date_range_end: MonthDay,
    pub multiplier: Decimal,
}

impl SeasonalRule {
    /// Whether the rule covers the given date (ranges like Dec 15 - Jan 5 wrap).
    pub fn contains(&self, date: NaiveDate) -> bool {
        let md = MonthDay::of(date);
        if self.date_range_start <= self.date_range_end {
            self.date_range_start <= md && md <= self.date_range_end
        } else {
            md >= self.date_range_start || md <= self.date_range_end
        }
    }
}

/// Delivery pricing band; `max_miles` is exclusive and `None` for the last band
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryTier {
    pub min_miles: Decimal,
    pub max_miles: Option<Decimal>,
    pub per_mile_rate: Money,
    pub base_fee: Money,
}

impl DeliveryTier {
    pub fn contains(&self, miles: Decimal) -> bool {
        miles >= self.min_miles && self.max_miles.map_or(true, |max| miles < max)
    }

    pub fn label(&self) -> String {
        match self.max_miles {
            Some(max) => format!("{}-{} mi", self.min_miles.normalize(), max.normalize()),
            None => format!("{}+ mi", self.min_miles.normalize()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PricingMode {
    Flat,
    PerDay,
}

/// Optional add-on (hand-wash station, attendant, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtraItem {
    pub extra_id: String,
    pub display_name: String,
    pub unit_price: Money,
    pub pricing_mode: PricingMode,
}

/// Depot used as the origin for delivery distances
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    pub branch_id: String,
    pub address: String,
    pub coordinates: Coordinates,
}

/// Per-table row accounting from a sync
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableReport {
    pub rows_read: usize,
    pub rows_skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub products: TableReport,
    pub seasonal_rules: TableReport,
    pub delivery_tiers: TableReport,
    pub extras: TableReport,
    pub branches: TableReport,
}

impl SyncReport {
    pub fn rows_skipped(&self) -> usize {
        self.products.rows_skipped
            + self.seasonal_rules.rows_skipped
            + self.delivery_tiers.rows_skipped
            + self.extras.rows_skipped
            + self.branches.rows_skipped
    }
}

/// Immutable, versioned bundle of pricing rules.
///
/// Version 0 is reserved for the bootstrap snapshot served before the first
/// successful sync.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub version: u64,
    pub synced_at: Option<DateTime<Utc>>,
    pub products: Vec<ProductRate>,
    pub seasonal_rules: Vec<SeasonalRule>,
    /// Sorted by `min_miles`
    pub delivery_tiers: Vec<DeliveryTier>,
    pub extras: Vec<ExtraItem>,
    pub branches: Vec<Branch>,
    #[serde(default)]
    pub report: SyncReport,
}

impl CatalogSnapshot {
    pub fn bootstrap() -> Self {
        Self {
            version: 0,
            synced_at: None,
            products: Vec::new(),
            seasonal_rules: Vec::new(),
            delivery_tiers: Vec::new(),
            extras: Vec::new(),
            branches: Vec::new(),
            report: SyncReport::default(),
        }
    }

    pub fn is_bootstrap(&self) -> bool {
        self.version == 0
    }

    pub fn product(&self, product_id: &str) -> Option<&ProductRate> {
        self.products.iter().find(|p| p.product_id == product_id)
    }

    /// Exact id match first, then a loose match on id or display name.
    pub fn find_product(&self, requested: &str) -> Option<&ProductRate> {
        if let Some(product) = self.product(requested) {
            return Some(product);
        }
        let wanted = product_key(requested);
        if wanted.is_empty() {
            return None;
        }
        self.products.iter().find(|p| {
            product_key(&p.product_id) == wanted || product_key(&p.display_name) == wanted
        })
    }

    pub fn extra(&self, extra_id: &str) -> Option<&ExtraItem> {
        self.extras.iter().find(|e| e.extra_id == extra_id).or_else(|| {
            let wanted = product_key(extra_id);
            self.extras.iter().find(|e| product_key(&e.extra_id) == wanted)
        })
    }

    pub fn branch(&self, branch_id: &str) -> Option<&Branch> {
        self.branches.iter().find(|b| b.branch_id == branch_id)
    }

    /// Time since the snapshot was synced; `None` for the bootstrap snapshot.
    pub fn age(&self, now: DateTime<Utc>) -> Option<chrono::Duration> {
        self.synced_at.map(|at| now - at)
    }
}

/// Loose product key: lowercase alphanumeric words separated by single spaces.
fn product_key(raw: &str) -> String {
    raw.split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Reasons a delivery tier table cannot be used
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TierError {
    #[error("no delivery tiers defined")]
    Empty,

    #[error("first delivery tier starts at {0} instead of 0")]
    DoesNotStartAtZero(Decimal),

    #[error("delivery tier {index} has max {max} not above min {min}")]
    EmptyRange {
        index: usize,
        min: Decimal,
        max: Decimal,
    },

    #[error("gap or overlap between delivery tiers {index} and {next}: {end} vs {start}")]
    Discontinuous {
        index: usize,
        next: usize,
        end: Decimal,
        start: Decimal,
    },

    #[error("delivery tier {0} is open-ended but is not the last tier")]
    OpenEndedNotLast(usize),

    #[error("last delivery tier must be open-ended")]
    LastTierBounded,
}

/// Sort tiers by `min_miles` and check they partition `[0, inf)`.
pub fn normalize_tiers(mut tiers: Vec<DeliveryTier>) -> Result<Vec<DeliveryTier>, TierError> {
    tiers.sort_by(|a, b| a.min_miles.cmp(&b.min_miles));

    let first = tiers.first().ok_or(TierError::Empty)?;
    if !first.min_miles.is_zero() {
        return Err(TierError::DoesNotStartAtZero(first.min_miles));
    }

    for (index, pair) in tiers.windows(2).enumerate() {
        let [current, next] = pair else { continue };
        let end = current.max_miles.ok_or(TierError::OpenEndedNotLast(index))?;
        if end <= current.min_miles {
            return Err(TierError::EmptyRange {
                index,
                min: current.min_miles,
                max: end,
            });
        }
        if end != next.min_miles {
            return Err(TierError::Discontinuous {
                index,
                next: index + 1,
                end,
                start: next.min_miles,
            });
        }
    }

    if tiers.last().and_then(|t| t.max_miles).is_some() {
        return Err(TierError::LastTierBounded);
    }

    Ok(tiers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn tier(min: Decimal, max: Option<Decimal>) -> DeliveryTier {
        DeliveryTier {
            min_miles: min,
            max_miles: max,
            per_mile_rate: Money::from_cents(200),
            base_fee: Money::from_cents(15000),
        }
    }

    fn rule(name: &str, start: (u32, u32), end: (u32, u32)) -> SeasonalRule {
        SeasonalRule {
            name: name.to_string(),
            date_range_start: MonthDay::new(start.0, start.1).unwrap(),
            date_range_end: MonthDay::new(end.0, end.1).unwrap(),
            multiplier: dec!(1.2),
        }
    }

    #[test]
    fn test_month_day_rejects_impossible_dates() {
        assert!(MonthDay::new(2, 29).is_some());
        assert!(MonthDay::new(2, 30).is_none());
        assert!(MonthDay::new(13, 1).is_none());
    }

    #[test]
    fn test_seasonal_rule_plain_range() {
        let summer = rule("summer", (6, 1), (8, 31));
        assert!(summer.contains(NaiveDate::from_ymd_opt(2025, 6, 1).unwrap()));
        assert!(summer.contains(NaiveDate::from_ymd_opt(2025, 8, 31).unwrap()));
        assert!(!summer.contains(NaiveDate::from_ymd_opt(2025, 9, 1).unwrap()));
    }

    #[test]
    fn test_seasonal_rule_wraps_year_end() {
        let holidays = rule("holidays", (12, 15), (1, 5));
        assert!(holidays.contains(NaiveDate::from_ymd_opt(2025, 12, 31).unwrap()));
        assert!(holidays.contains(NaiveDate::from_ymd_opt(2026, 1, 5).unwrap()));
        assert!(!holidays.contains(NaiveDate::from_ymd_opt(2026, 1, 6).unwrap()));
        assert!(!holidays.contains(NaiveDate::from_ymd_opt(2025, 12, 14).unwrap()));
    }

    #[test]
    fn test_normalize_tiers_sorts_and_accepts_partition() {
        let tiers = vec![
            tier(dec!(50), Some(dec!(100))),
            tier(dec!(100), None),
            tier(dec!(0), Some(dec!(50))),
        ];
        let sorted = normalize_tiers(tiers).unwrap();
        assert_eq!(sorted[0].min_miles, dec!(0));
        assert_eq!(sorted[2].max_miles, None);
    }

    #[test]
    fn test_normalize_tiers_rejects_gap() {
        let tiers = vec![tier(dec!(0), Some(dec!(50))), tier(dec!(60), None)];
        assert!(matches!(
            normalize_tiers(tiers),
            Err(TierError::Discontinuous { .. })
        ));
    }

    #[test]
    fn test_normalize_tiers_rejects_bounded_last_tier() {
        let tiers = vec![tier(dec!(0), Some(dec!(50)))];
        assert_eq!(normalize_tiers(tiers), Err(TierError::LastTierBounded));
    }

    #[test]
    fn test_normalize_tiers_rejects_nonzero_start() {
        let tiers = vec![tier(dec!(5), None)];
        assert_eq!(normalize_tiers(tiers), Err(TierError::DoesNotStartAtZero(dec!(5))));
        assert_eq!(normalize_tiers(vec![]), Err(TierError::Empty));
    }

    #[test]
    fn test_find_product_falls_back_to_display_name() {
        let mut snapshot = CatalogSnapshot::bootstrap();
        snapshot.products.push(ProductRate {
            product_id: "2-stall".to_string(),
            display_name: "2 Stall Restroom Trailer".to_string(),
            base_rate_event: Money::from_cents(95000),
            base_rate_commercial: Money::from_cents(15000),
            weekly_rate_commercial: None,
            monthly_rate_commercial: None,
            stall_count: 2,
            is_ada: false,
        });
        assert!(snapshot.find_product("2-stall").is_some());
        assert!(snapshot.find_product("2 stall restroom  TRAILER").is_some());
        assert!(snapshot.find_product("3 stall").is_none());
    }
}
