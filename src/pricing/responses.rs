//! Response DTOs for the quote API.

use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::Serialize;

use super::calculators::RentalBasis;
use super::money::Money;
use super::requests::UsageType;
use crate::catalog::models::PricingMode;
use crate::location::models::LocationSource;

/// Money value for JSON responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MoneyResponse {
    #[serde(with = "rust_decimal::serde::str")]
    pub amount: Decimal,
    pub currency: String,
}

impl MoneyResponse {
    pub fn new(amount: Money, currency: &str) -> Self {
        Self {
            amount: amount.to_decimal(),
            currency: currency.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineItemKind {
    Rental,
    Delivery,
    Extra,
}

/// One priced line of a quote
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LineItem {
    pub kind: LineItemKind,
    pub code: String,
    pub description: String,
    pub quantity: u32,
    pub unit_price: MoneyResponse,
    pub total: MoneyResponse,
    #[serde(skip)]
    pub total_cents: Money,
}

/// Trailer rental breakdown
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RentalSummary {
    pub product_id: String,
    pub display_name: String,
    pub usage_type: UsageType,
    pub rental_start_date: NaiveDate,
    pub rental_end_date: NaiveDate,
    pub rental_days: u32,
    /// Event flat rate, or the commercial daily rate
    pub base_rate: MoneyResponse,
    #[serde(flatten)]
    pub basis: RentalBasis,
    /// Before the seasonal multiplier
    pub rate_total: MoneyResponse,
    /// After the seasonal multiplier; equals the rental line total
    pub total: MoneyResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SeasonalSummary {
    #[serde(with = "rust_decimal::serde::str")]
    pub multiplier: Decimal,
    pub rule_name: Option<String>,
    /// Rental total change caused by the multiplier (may be negative)
    pub adjustment: MoneyResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeliverySummary {
    pub normalized_address: String,
    pub branch_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub distance_miles: Decimal,
    pub is_estimated: bool,
    pub tier: Option<String>,
    pub base_fee: MoneyResponse,
    pub per_mile_rate: MoneyResponse,
    pub fee: MoneyResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExtraSummary {
    pub extra_id: String,
    pub qty: u32,
    pub pricing_mode: PricingMode,
}

/// Stages a quote passes through
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteState {
    Received,
    CatalogResolved,
    LocationResolved,
    Priced,
    Degraded,
    Returned,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QuoteMetadata {
    pub catalog_version: u64,
    pub catalog_synced_at: Option<DateTime<Utc>>,
    pub location_source: LocationSource,
    /// Distance came from the cache without waiting
    pub location_cache_hit: bool,
    pub calculation_time_ms: f64,
    pub states: Vec<QuoteState>,
    pub degraded: bool,
    pub requires_review: bool,
    pub warnings: Vec<String>,
}

/// Itemized quote; `subtotal` is the exact sum of the line item totals.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Quote {
    pub quote_id: String,
    pub request_id: String,
    pub line_items: Vec<LineItem>,
    pub subtotal: MoneyResponse,
    pub rental: RentalSummary,
    pub seasonal: SeasonalSummary,
    pub delivery: DeliverySummary,
    pub extras: Vec<ExtraSummary>,
    pub metadata: QuoteMetadata,
}

/// Error body returned by the HTTP layer
#[derive(Debug, Serialize)]
pub struct PricingErrorResponse {
    pub error_type: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

/// `202 Accepted` body for fire-and-forget endpoints
#[derive(Debug, Serialize)]
pub struct AcceptedResponse {
    pub accepted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
}
