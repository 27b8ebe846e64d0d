//! Location records and cache keys.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Resolved delivery distance for one normalized address
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    pub normalized_address: String,
    pub nearest_branch_id: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub distance_miles: Decimal,
    /// Straight-line or default estimate rather than a routed distance
    pub is_estimated: bool,
    pub resolved_at: DateTime<Utc>,
    pub ttl_expires_at: DateTime<Utc>,
}

impl LocationRecord {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        now < self.ttl_expires_at
    }
}

/// Where the orchestrator's location came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationSource {
    /// Fresh record already in the cache
    Cached,
    /// Expired record served while a refresh runs
    Stale,
    /// Resolution finished inside the deadline
    Resolved,
    /// Deadline passed with nothing cached; default estimate
    Estimated,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedLocation {
    pub record: LocationRecord,
    pub source: LocationSource,
}

/// Cache key for an address: lowercase, single spaces, `", "` between parts,
/// no trailing periods. Applying it twice changes nothing.
pub fn normalize_address(raw: &str) -> String {
    let lowered = raw.to_lowercase();
    let parts: Vec<String> = lowered
        .split(',')
        .map(|part| {
            let collapsed = part.split_whitespace().collect::<Vec<_>>().join(" ");
            collapsed
                .trim_end_matches(|c: char| c == '.' || c.is_whitespace())
                .to_string()
        })
        .filter(|part| !part.is_empty())
        .collect();
    parts.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_collapses_case_and_whitespace() {
        let variants = [
            "12 Main St, Austin, TX 78701",
            "  12  MAIN st ,Austin,   tx 78701 ",
            "12 main st,\taustin,\ntx 78701.",
        ];
        for v in variants {
            assert_eq!(normalize_address(v), "12 main st, austin, tx 78701");
        }
    }

    #[test]
    fn test_normalize_drops_empty_parts() {
        assert_eq!(normalize_address("a,, b ,"), "a, b");
        assert_eq!(normalize_address("   "), "");
        assert_eq!(normalize_address("12 Main St., Austin, ."), "12 main st, austin");
    }

    #[test]
    fn test_normalize_is_idempotent() {
        for raw in ["a. .", "12 Main St. , Austin .", "P.O. Box 7,TX"] {
            let once = normalize_address(raw);
            assert_eq!(normalize_address(&once), once);
        }
    }
}
