//! Environment configuration.
//!
//! Values come from the process environment (after `.env` is loaded by
//! `main`). Everything except the external API credentials has a default.

use std::str::FromStr;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::catalog::SyncPolicy;
use crate::location::LocationCacheConfig;
use crate::pricing::calculators::DurationFactors;
use crate::pricing::QuoteSettings;

/// Longest TTL or grace period accepted
const MAX_AGE: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{0} must be set")]
    Missing(&'static str),

    #[error("{key} has invalid value '{value}'")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: String,
    /// Postgres for catalog snapshots; in-memory when unset
    pub database_url: Option<String>,
    pub sheets_spreadsheet_id: String,
    pub sheets_api_key: String,
    pub maps_api_key: String,
    /// Ops event endpoint; events are only logged when unset
    pub reporting_url: Option<String>,

    pub quote_deadline: Duration,
    pub quote_assembly_reserve: Duration,
    pub max_rental_days: u32,
    pub currency: String,
    pub commercial_week_billed_days: u32,
    pub commercial_month_billed_weeks: u32,

    pub distance_timeout: Duration,
    pub location_ttl: Duration,
    pub location_estimate_ttl: Duration,
    pub location_stale_grace: Duration,
    pub location_cache_capacity: u64,
    pub fallback_distance_miles: Decimal,

    pub catalog_sync_interval: Duration,
    pub catalog_ttl: Duration,
    pub sync_max_attempts: u32,
    pub sync_backoff_base: Duration,
    pub sync_backoff_max: Duration,
    pub sync_alert_after: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8080".to_string(),
            database_url: None,
            sheets_spreadsheet_id: String::new(),
            sheets_api_key: String::new(),
            maps_api_key: String::new(),
            reporting_url: None,
            quote_deadline: Duration::from_millis(500),
            quote_assembly_reserve: Duration::from_millis(20),
            max_rental_days: 365,
            currency: "USD".to_string(),
            commercial_week_billed_days: 5,
            commercial_month_billed_weeks: 3,
            distance_timeout: Duration::from_millis(2000),
            location_ttl: Duration::from_secs(24 * 60 * 60),
            location_estimate_ttl: Duration::from_secs(60 * 60),
            location_stale_grace: Duration::from_secs(7 * 24 * 60 * 60),
            location_cache_capacity: 10_000,
            fallback_distance_miles: Decimal::from(25),
            catalog_sync_interval: Duration::from_secs(15 * 60),
            catalog_ttl: Duration::from_secs(60 * 60),
            sync_max_attempts: 4,
            sync_backoff_base: Duration::from_millis(500),
            sync_backoff_max: Duration::from_secs(30),
            sync_alert_after: 3,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from any key lookup; blank values count as unset.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let required = |key: &'static str| get(key).ok_or(ConfigError::Missing(key));
        let defaults = Config::default();

        let config = Self {
            bind_addr: get("BIND_ADDR").unwrap_or(defaults.bind_addr),
            database_url: get("DATABASE_URL"),
            sheets_spreadsheet_id: required("SHEETS_SPREADSHEET_ID")?,
            sheets_api_key: required("SHEETS_API_KEY")?,
            maps_api_key: required("MAPS_API_KEY")?,
            reporting_url: get("REPORTING_URL"),

            quote_deadline: millis(&get, "QUOTE_DEADLINE_MS", defaults.quote_deadline)?,
            quote_assembly_reserve: millis(
                &get,
                "QUOTE_ASSEMBLY_RESERVE_MS",
                defaults.quote_assembly_reserve,
            )?,
            max_rental_days: parsed(&get, "MAX_RENTAL_DAYS", defaults.max_rental_days)?,
            currency: get("CURRENCY").unwrap_or(defaults.currency),
            commercial_week_billed_days: parsed(
                &get,
                "COMMERCIAL_WEEK_BILLED_DAYS",
                defaults.commercial_week_billed_days,
            )?,
            commercial_month_billed_weeks: parsed(
                &get,
                "COMMERCIAL_MONTH_BILLED_WEEKS",
                defaults.commercial_month_billed_weeks,
            )?,

            distance_timeout: millis(&get, "DISTANCE_TIMEOUT_MS", defaults.distance_timeout)?,
            location_ttl: secs(&get, "LOCATION_TTL_SECS", defaults.location_ttl)?,
            location_estimate_ttl: secs(
                &get,
                "LOCATION_ESTIMATE_TTL_SECS",
                defaults.location_estimate_ttl,
            )?,
            location_stale_grace: secs(
                &get,
                "LOCATION_STALE_GRACE_SECS",
                defaults.location_stale_grace,
            )?,
            location_cache_capacity: parsed(
                &get,
                "LOCATION_CACHE_CAPACITY",
                defaults.location_cache_capacity,
            )?,
            fallback_distance_miles: parsed(
                &get,
                "FALLBACK_DISTANCE_MILES",
                defaults.fallback_distance_miles,
            )?,

            catalog_sync_interval: secs(
                &get,
                "CATALOG_SYNC_INTERVAL_SECS",
                defaults.catalog_sync_interval,
            )?,
            catalog_ttl: secs(&get, "CATALOG_TTL_SECS", defaults.catalog_ttl)?,
            sync_max_attempts: parsed(&get, "SYNC_MAX_ATTEMPTS", defaults.sync_max_attempts)?,
            sync_backoff_base: millis(&get, "SYNC_BACKOFF_BASE_MS", defaults.sync_backoff_base)?,
            sync_backoff_max: millis(&get, "SYNC_BACKOFF_MAX_MS", defaults.sync_backoff_max)?,
            sync_alert_after: parsed(&get, "SYNC_ALERT_AFTER", defaults.sync_alert_after)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values that parse but would stall, panic or overflow later.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let secs = |d: Duration| d.as_secs().to_string();
        check(
            !self.catalog_sync_interval.is_zero(),
            "CATALOG_SYNC_INTERVAL_SECS",
            secs(self.catalog_sync_interval),
        )?;
        check(
            !self.distance_timeout.is_zero(),
            "DISTANCE_TIMEOUT_MS",
            self.distance_timeout.as_millis().to_string(),
        )?;
        check(
            self.sync_max_attempts >= 1,
            "SYNC_MAX_ATTEMPTS",
            self.sync_max_attempts.to_string(),
        )?;
        check(
            self.sync_alert_after >= 1,
            "SYNC_ALERT_AFTER",
            self.sync_alert_after.to_string(),
        )?;
        check(
            self.fallback_distance_miles >= Decimal::ZERO,
            "FALLBACK_DISTANCE_MILES",
            self.fallback_distance_miles.to_string(),
        )?;
        for (key, value) in [
            ("LOCATION_TTL_SECS", self.location_ttl),
            ("LOCATION_ESTIMATE_TTL_SECS", self.location_estimate_ttl),
            ("LOCATION_STALE_GRACE_SECS", self.location_stale_grace),
            ("CATALOG_TTL_SECS", self.catalog_ttl),
        ] {
            check(value <= MAX_AGE, key, secs(value))?;
        }
        Ok(())
    }

    pub fn sync_policy(&self) -> SyncPolicy {
        SyncPolicy {
            interval: self.catalog_sync_interval,
            max_attempts: self.sync_max_attempts,
            backoff_base: self.sync_backoff_base,
            backoff_max: self.sync_backoff_max,
            alert_after: self.sync_alert_after,
        }
    }

    pub fn quote_settings(&self) -> QuoteSettings {
        QuoteSettings {
            deadline: self.quote_deadline,
            assembly_reserve: self.quote_assembly_reserve,
            max_rental_days: self.max_rental_days,
            currency: self.currency.clone(),
            catalog_ttl: chrono::Duration::from_std(self.catalog_ttl)
                .unwrap_or_else(|_| chrono::Duration::hours(1)),
            factors: DurationFactors {
                week_billed_days: self.commercial_week_billed_days,
                month_billed_weeks: self.commercial_month_billed_weeks,
            },
        }
    }

    pub fn location_cache_config(&self) -> LocationCacheConfig {
        LocationCacheConfig {
            capacity: self.location_cache_capacity,
            stale_grace: self.location_stale_grace,
            max_entry_age: self
                .location_ttl
                .max(self.location_estimate_ttl)
                .saturating_add(self.location_stale_grace),
            fallback_distance_miles: self.fallback_distance_miles,
        }
    }
}

fn check(ok: bool, key: &'static str, value: String) -> Result<(), ConfigError> {
    if ok {
        Ok(())
    } else {
        Err(ConfigError::Invalid { key, value })
    }
}

fn parsed<T: FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match get(key) {
        Some(value) => value
            .parse()
            .map_err(|_| ConfigError::Invalid { key, value }),
        None => Ok(default),
    }
}

fn millis(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parsed(get, key, default.as_millis() as u64).map(Duration::from_millis)
}

fn secs(
    get: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: Duration,
) -> Result<Duration, ConfigError> {
    parsed(get, key, default.as_secs()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    const REQUIRED: [(&str, &str); 3] = [
        ("SHEETS_SPREADSHEET_ID", "sheet-1"),
        ("SHEETS_API_KEY", "sheets-key"),
        ("MAPS_API_KEY", "maps-key"),
    ];

    #[test]
    fn test_defaults_apply() {
        let config = Config::from_lookup(env(&REQUIRED)).unwrap();
        assert_eq!(config.quote_deadline, Duration::from_millis(500));
        assert_eq!(config.location_ttl, Duration::from_secs(86_400));
        assert_eq!(config.fallback_distance_miles, Decimal::from(25));
        assert!(config.database_url.is_none());
        assert_eq!(config.sync_policy().alert_after, 3);
    }

    #[test]
    fn test_overrides_and_blank_values() {
        let mut pairs = REQUIRED.to_vec();
        pairs.push(("QUOTE_DEADLINE_MS", "350"));
        pairs.push(("DATABASE_URL", "  "));
        pairs.push(("FALLBACK_DISTANCE_MILES", "12.5"));
        let config = Config::from_lookup(env(&pairs)).unwrap();
        assert_eq!(config.quote_settings().deadline, Duration::from_millis(350));
        assert!(config.database_url.is_none());
        assert_eq!(config.fallback_distance_miles.to_string(), "12.5");
    }

    #[test]
    fn test_values_that_would_break_at_runtime() {
        let cases = [
            ("CATALOG_SYNC_INTERVAL_SECS", "0"),
            ("DISTANCE_TIMEOUT_MS", "0"),
            ("SYNC_MAX_ATTEMPTS", "0"),
            ("SYNC_ALERT_AFTER", "0"),
            ("FALLBACK_DISTANCE_MILES", "-5"),
            ("LOCATION_TTL_SECS", "18446744073709551615"),
            ("LOCATION_STALE_GRACE_SECS", "18446744073709551615"),
            ("CATALOG_TTL_SECS", "18446744073709551615"),
        ];
        for (key, value) in cases {
            let mut pairs = REQUIRED.to_vec();
            pairs.push((key, value));
            assert_eq!(
                Config::from_lookup(env(&pairs)).unwrap_err(),
                ConfigError::Invalid {
                    key,
                    value: value.to_string()
                },
                "{}={}",
                key,
                value
            );
        }
    }

    #[test]
    fn test_entry_age_saturates() {
        let config = Config {
            location_ttl: Duration::MAX,
            location_stale_grace: Duration::from_secs(60),
            ..Config::default()
        };
        assert_eq!(config.location_cache_config().max_entry_age, Duration::MAX);
    }

    #[test]
    fn test_missing_and_invalid() {
        assert_eq!(
            Config::from_lookup(env(&[])).unwrap_err(),
            ConfigError::Missing("SHEETS_SPREADSHEET_ID")
        );

        let mut pairs = REQUIRED.to_vec();
        pairs.push(("SYNC_MAX_ATTEMPTS", "lots"));
        assert_eq!(
            Config::from_lookup(env(&pairs)).unwrap_err(),
            ConfigError::Invalid {
                key: "SYNC_MAX_ATTEMPTS",
                value: "lots".to_string()
            }
        );
    }
}
