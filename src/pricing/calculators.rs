//! Core pricing calculation functions.
//!
//! Pure functions for pricing math - no I/O, no shared state. All inputs come
//! from a catalog snapshot and the request; all outputs are whole cents.

use chrono::NaiveDate;
use rust_decimal::prelude::*;
use serde::Serialize;

use crate::catalog::models::{DeliveryTier, ExtraItem, PricingMode, ProductRate, SeasonalRule};

use super::money::Money;
use super::requests::UsageType;

const DAYS_PER_WEEK: u32 = 7;
const DAYS_PER_MONTH: u32 = 28;

/// Round to specified decimal places using banker's rounding (ROUND_HALF_EVEN).
///
/// # Examples
/// ```
/// use rust_decimal_macros::dec;
/// use trailer_quote::pricing::round_money;
///
/// assert_eq!(round_money(dec!(2.5), 0), dec!(2));   // rounds to even
/// assert_eq!(round_money(dec!(3.5), 0), dec!(4));   // rounds to even
/// assert_eq!(round_money(dec!(1.234), 2), dec!(1.23));
/// ```
pub fn round_money(amount: Decimal, places: u32) -> Decimal {
    amount.round_dp_with_strategy(places, RoundingStrategy::MidpointNearestEven)
}

/// How a commercial week and month are billed relative to the daily rate,
/// used when the catalog has no explicit weekly/monthly rate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DurationFactors {
    pub week_billed_days: u32,
    pub month_billed_weeks: u32,
}

impl Default for DurationFactors {
    fn default() -> Self {
        Self {
            week_billed_days: 5,
            month_billed_weeks: 3,
        }
    }
}

/// Breakdown of how a rental was billed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "basis", rename_all = "snake_case")]
pub enum RentalBasis {
    EventFlat,
    Commercial { months: u32, weeks: u32, days: u32 },
}

/// Result of [`trailer_rate`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RentalCharge {
    pub base_rate: Money,
    pub total: Money,
    pub basis: RentalBasis,
}

/// Commercial daily, weekly and monthly rates.
///
/// Derived or configured block rates are capped so a larger block never costs
/// more than the smaller blocks it replaces.
pub fn commercial_rates(product: &ProductRate, factors: DurationFactors) -> (Money, Money, Money) {
    let daily = product.base_rate_commercial;
    let weekly = product
        .weekly_rate_commercial
        .unwrap_or_else(|| daily.times(factors.week_billed_days))
        .min(daily.times(DAYS_PER_WEEK));
    let monthly = product
        .monthly_rate_commercial
        .unwrap_or_else(|| weekly.times(factors.month_billed_weeks))
        .min(weekly.times(DAYS_PER_MONTH / DAYS_PER_WEEK));
    (daily, weekly, monthly)
}

/// Trailer rental charge before the seasonal multiplier.
///
/// Event bookings pay `base_rate_event` once. Commercial bookings pay the
/// cheapest combination of month, week and day blocks that covers
/// `rental_days`; covering more days than requested is allowed when cheaper.
pub fn trailer_rate(
    product: &ProductRate,
    usage: UsageType,
    rental_days: u32,
    factors: DurationFactors,
) -> RentalCharge {
    match usage {
        UsageType::Event => RentalCharge {
            base_rate: product.base_rate_event,
            total: product.base_rate_event,
            basis: RentalBasis::EventFlat,
        },
        UsageType::Commercial => {
            let (daily, weekly, monthly) = commercial_rates(product, factors);
            let (total, months, weeks, days) = cheapest_cover(rental_days, daily, weekly, monthly);
            RentalCharge {
                base_rate: daily,
                total,
                basis: RentalBasis::Commercial { months, weeks, days },
            }
        }
    }
}

fn cheapest_cover(
    rental_days: u32,
    daily: Money,
    weekly: Money,
    monthly: Money,
) -> (Money, u32, u32, u32) {
    let max_months = rental_days.div_ceil(DAYS_PER_MONTH);
    let mut best = (daily.times(rental_days), 0, 0, rental_days);

    for months in 0..=max_months {
        let after_months = rental_days.saturating_sub(months * DAYS_PER_MONTH);
        for weeks in 0..=after_months.div_ceil(DAYS_PER_WEEK) {
            let days = after_months.saturating_sub(weeks * DAYS_PER_WEEK);
            let cost = monthly.times(months) + weekly.times(weeks) + daily.times(days);
            if cost < best.0 {
                best = (cost, months, weeks, days);
            }
        }
    }
    best
}

/// Result of [`seasonal_multiplier`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeasonalMatch {
    #[serde(with = "rust_decimal::serde::str")]
    pub multiplier: Decimal,
    pub rule_name: Option<String>,
}

/// Multiplier for the rental start date. The earliest-defined matching rule
/// wins; no match means 1.0.
pub fn seasonal_multiplier(rules: &[SeasonalRule], date: NaiveDate) -> SeasonalMatch {
    rules
        .iter()
        .find(|rule| rule.contains(date))
        .map(|rule| SeasonalMatch {
            multiplier: rule.multiplier,
            rule_name: Some(rule.name.clone()),
        })
        .unwrap_or(SeasonalMatch {
            multiplier: Decimal::ONE,
            rule_name: None,
        })
}

/// Result of [`delivery_fee`]
#[derive(Debug, Clone, PartialEq)]
pub struct DeliveryCharge {
    pub fee: Money,
    pub tier_index: usize,
    pub tier: DeliveryTier,
}

/// Tier lookup for a distance. `tiers` must be sorted by `min_miles`.
///
/// Distances below the first tier's minimum use the first tier.
pub fn find_tier(distance_miles: Decimal, tiers: &[DeliveryTier]) -> Option<(usize, &DeliveryTier)> {
    if let Some(found) = tiers.iter().enumerate().find(|(_, t)| t.contains(distance_miles)) {
        return Some(found);
    }
    tiers
        .first()
        .filter(|first| distance_miles < first.min_miles)
        .map(|first| (0, first))
}

/// `base_fee + per_mile_rate * distance_miles`, rounded to cents once.
pub fn delivery_fee(distance_miles: Decimal, tiers: &[DeliveryTier]) -> Option<DeliveryCharge> {
    // A negative distance prices as zero miles, never as a credit
    let distance_miles = distance_miles.max(Decimal::ZERO);
    let (tier_index, tier) = find_tier(distance_miles, tiers)?;
    let fee = tier.base_fee + tier.per_mile_rate.scale(distance_miles);
    Some(DeliveryCharge {
        fee,
        tier_index,
        tier: tier.clone(),
    })
}

/// One priced extra
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraCharge {
    pub extra_id: String,
    pub display_name: String,
    pub qty: u32,
    pub unit_price: Money,
    pub pricing_mode: PricingMode,
    pub total: Money,
}

/// Result of [`extras_cost`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtrasCharge {
    pub lines: Vec<ExtraCharge>,
    pub total: Money,
}

/// Flat extras cost `qty * unit_price`; per-day extras also multiply by days.
pub fn extras_cost(items: &[(&ExtraItem, u32)], rental_days: u32) -> ExtrasCharge {
    let lines: Vec<ExtraCharge> = items
        .iter()
        .map(|(item, qty)| {
            let units = match item.pricing_mode {
                PricingMode::Flat => item.unit_price.times(*qty),
                PricingMode::PerDay => item.unit_price.times(*qty).times(rental_days),
            };
            ExtraCharge {
                extra_id: item.extra_id.clone(),
                display_name: item.display_name.clone(),
                qty: *qty,
                unit_price: item.unit_price,
                pricing_mode: item.pricing_mode,
                total: units,
            }
        })
        .collect();
    let total = lines.iter().map(|l| l.total).sum();
    ExtrasCharge { lines, total }
}
