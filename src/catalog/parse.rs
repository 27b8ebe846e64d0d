//! Sheet rows to catalog records.
//!
//! A malformed row is skipped and counted; a missing column, or a required
//! table with no usable rows, fails the whole table.

use std::collections::{HashMap, HashSet};
use std::str::FromStr;

use chrono::{Datelike, Duration, NaiveDate};
use rust_decimal::prelude::*;
use tracing::warn;

use super::models::{
    Branch, DeliveryTier, ExtraItem, MonthDay, PricingMode, ProductRate, SeasonalRule, TableReport,
};
use super::source::{CatalogTable, SheetTable};
use crate::location::geo::Coordinates;
use crate::pricing::money::Money;

type Record<'a> = HashMap<&'a str, &'a str>;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("{table} sheet is missing column '{column}'")]
    MissingColumn {
        table: CatalogTable,
        column: &'static str,
    },

    #[error("{table} sheet has no usable rows ({skipped} skipped)")]
    NoValidRows { table: CatalogTable, skipped: usize },
}

pub fn parse_products(sheet: &SheetTable) -> Result<(Vec<ProductRate>, TableReport), ParseError> {
    let mut seen = HashSet::new();
    parse_rows(
        CatalogTable::Products,
        sheet,
        &["product_id", "base_rate_event", "base_rate_commercial"],
        true,
        |r| {
            let product_id = non_empty(r, "product_id")?.to_string();
            if !seen.insert(product_id.clone()) {
                return None;
            }
            Some(ProductRate {
                display_name: non_empty(r, "display_name")
                    .unwrap_or(&product_id)
                    .to_string(),
                base_rate_event: parse_money(cell(r, "base_rate_event"))?,
                base_rate_commercial: parse_money(cell(r, "base_rate_commercial"))?,
                weekly_rate_commercial: optional(cell(r, "weekly_rate_commercial"), parse_money)?,
                monthly_rate_commercial: optional(cell(r, "monthly_rate_commercial"), parse_money)?,
                stall_count: optional(cell(r, "stall_count"), parse_count)?.unwrap_or(0),
                is_ada: optional(cell(r, "is_ada"), parse_bool)?.unwrap_or(false),
                product_id,
            })
        },
    )
}

pub fn parse_seasonal_rules(
    sheet: &SheetTable,
) -> Result<(Vec<SeasonalRule>, TableReport), ParseError> {
    parse_rows(
        CatalogTable::SeasonalRules,
        sheet,
        &["name", "start", "end", "multiplier"],
        false,
        |r| {
            let multiplier = parse_decimal(cell(r, "multiplier"))?;
            if multiplier <= Decimal::ZERO {
                return None;
            }
            Some(SeasonalRule {
                name: non_empty(r, "name")?.to_string(),
                date_range_start: parse_month_day(cell(r, "start"))?,
                date_range_end: parse_month_day(cell(r, "end"))?,
                multiplier,
            })
        },
    )
}

/// Tiers come back in sheet order; partition checks happen at snapshot build.
pub fn parse_delivery_tiers(
    sheet: &SheetTable,
) -> Result<(Vec<DeliveryTier>, TableReport), ParseError> {
    parse_rows(
        CatalogTable::DeliveryTiers,
        sheet,
        &["min_miles", "max_miles", "per_mile_rate", "base_fee"],
        true,
        |r| {
            let min_miles = parse_decimal(cell(r, "min_miles"))?;
            if min_miles < Decimal::ZERO {
                return None;
            }
            Some(DeliveryTier {
                min_miles,
                max_miles: optional(cell(r, "max_miles"), parse_decimal)?,
                per_mile_rate: parse_money(cell(r, "per_mile_rate"))?,
                base_fee: parse_money(cell(r, "base_fee"))?,
            })
        },
    )
}

pub fn parse_extras(sheet: &SheetTable) -> Result<(Vec<ExtraItem>, TableReport), ParseError> {
    parse_rows(
        CatalogTable::Extras,
        sheet,
        &["extra_id", "unit_price"],
        false,
        |r| {
            let extra_id = non_empty(r, "extra_id")?.to_string();
            Some(ExtraItem {
                display_name: non_empty(r, "display_name").unwrap_or(&extra_id).to_string(),
                unit_price: parse_money(cell(r, "unit_price"))?,
                pricing_mode: optional(cell(r, "pricing_mode"), parse_pricing_mode)?
                    .unwrap_or(PricingMode::Flat),
                extra_id,
            })
        },
    )
}

pub fn parse_branches(sheet: &SheetTable) -> Result<(Vec<Branch>, TableReport), ParseError> {
    parse_rows(
        CatalogTable::Branches,
        sheet,
        &["branch_id", "latitude", "longitude"],
        true,
        |r| {
            let lat = parse_decimal(cell(r, "latitude"))?.to_f64()?;
            let lng = parse_decimal(cell(r, "longitude"))?.to_f64()?;
            Some(Branch {
                branch_id: non_empty(r, "branch_id")?.to_string(),
                address: cell(r, "address").to_string(),
                coordinates: Coordinates::new(lat, lng)?,
            })
        },
    )
}

fn parse_rows<T>(
    table: CatalogTable,
    sheet: &SheetTable,
    required: &[&'static str],
    require_rows: bool,
    mut parse_row: impl FnMut(&Record<'_>) -> Option<T>,
) -> Result<(Vec<T>, TableReport), ParseError> {
    if let Some(column) = required
        .iter()
        .copied()
        .find(|c| !sheet.headers.iter().any(|h| h.as_str() == *c))
    {
        return Err(ParseError::MissingColumn { table, column });
    }

    let mut report = TableReport::default();
    let mut parsed = Vec::new();
    for (index, record) in sheet.records().iter().enumerate() {
        if record.values().all(|v| v.is_empty()) {
            continue;
        }
        report.rows_read += 1;
        match parse_row(record) {
            Some(item) => parsed.push(item),
            None => {
                report.rows_skipped += 1;
                // +2: header row, and sheets count from 1
                warn!("Skipping malformed {} row {}", table, index + 2);
            }
        }
    }

    if require_rows && parsed.is_empty() {
        return Err(ParseError::NoValidRows {
            table,
            skipped: report.rows_skipped,
        });
    }
    Ok((parsed, report))
}

fn cell<'a>(record: &Record<'a>, column: &str) -> &'a str {
    record.get(column).copied().unwrap_or("")
}

fn non_empty<'a>(record: &Record<'a>, column: &str) -> Option<&'a str> {
    Some(cell(record, column)).filter(|v| !v.is_empty())
}

/// Blank cell -> `Some(None)`; unparsable cell -> `None` (row is bad).
fn optional<T>(raw: &str, parse: impl Fn(&str) -> Option<T>) -> Option<Option<T>> {
    if raw.trim().is_empty() {
        Some(None)
    } else {
        parse(raw).map(Some)
    }
}

pub fn parse_decimal(raw: &str) -> Option<Decimal> {
    let cleaned: String = raw
        .trim()
        .chars()
        .filter(|c| !matches!(c, '$' | ',' | ' '))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    Decimal::from_str(&cleaned)
        .or_else(|_| Decimal::from_scientific(&cleaned))
        .ok()
}

pub fn parse_money(raw: &str) -> Option<Money> {
    parse_decimal(raw)
        .filter(|d| !d.is_sign_negative())
        .map(Money::from_decimal)
}

fn parse_count(raw: &str) -> Option<u32> {
    let value = parse_decimal(raw)?;
    if value.fract().is_zero() {
        value.to_u32()
    } else {
        None
    }
}

pub fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "yes" | "y" | "1" | "x" => Some(true),
        "false" | "no" | "n" | "0" => Some(false),
        _ => None,
    }
}

fn parse_pricing_mode(raw: &str) -> Option<PricingMode> {
    match raw.trim().to_lowercase().replace([' ', '-'], "_").as_str() {
        "flat" | "each" | "one_time" => Some(PricingMode::Flat),
        "per_day" | "daily" | "day" => Some(PricingMode::PerDay),
        _ => None,
    }
}

/// `MM-DD`, `MM/DD`, `YYYY-MM-DD`, `MM/DD/YYYY`, or a spreadsheet date serial.
/// The year is ignored; seasons recur annually.
pub fn parse_month_day(raw: &str) -> Option<MonthDay> {
    let raw = raw.trim();
    if let Some(date) = serial_date(raw) {
        return MonthDay::new(date.month(), date.day());
    }
    let parts: Vec<u32> = raw
        .split(['-', '/'])
        .map(|p| p.trim().parse().ok())
        .collect::<Option<_>>()?;
    match parts.as_slice() {
        [month, day] => MonthDay::new(*month, *day),
        [year, month, day] if *year > 31 => MonthDay::new(*month, *day),
        [month, day, _year] => MonthDay::new(*month, *day),
        _ => None,
    }
}

/// Days since 1899-12-30, as Sheets reports unformatted date cells.
fn serial_date(raw: &str) -> Option<NaiveDate> {
    if raw.is_empty() || !raw.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return None;
    }
    let days = parse_decimal(raw)?.trunc().to_i64()?;
    if days < 60 {
        return None;
    }
    NaiveDate::from_ymd_opt(1899, 12, 30)?.checked_add_signed(Duration::days(days))
}
