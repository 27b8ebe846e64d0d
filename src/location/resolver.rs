//! Address -> nearest branch and delivery distance.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::time::timeout;
use tracing::{debug, warn};

use super::geo::{miles_to_decimal, nearest_branch, Coordinates};
use super::models::{normalize_address, LocationRecord};
use crate::catalog::{Branch, CatalogCache};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DistanceApiError {
    #[error("No result for address")]
    NotFound,

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Distance API error: {0}")]
    Api(String),

    #[error("Distance API timed out")]
    Timeout,
}

/// External geocoding and routing service
#[async_trait]
pub trait DistanceApi: Send + Sync {
    async fn geocode(&self, address: &str) -> Result<Coordinates, DistanceApiError>;

    /// Driving distance in miles
    async fn driving_miles(
        &self,
        origin: Coordinates,
        destination: Coordinates,
    ) -> Result<f64, DistanceApiError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ResolveError {
    #[error("Address could not be resolved: {0}")]
    AddressUnresolvable(String),

    #[error("No branches in the catalog")]
    NoBranches,

    #[error("Distance service unavailable: {0}")]
    Unavailable(String),
}

/// An address placed on the map, before routing
#[derive(Debug, Clone, PartialEq)]
pub struct Geocoded {
    pub normalized_address: String,
    pub point: Coordinates,
    pub branch: Branch,
    pub straight_line_miles: f64,
}

pub struct DistanceResolver {
    api: Arc<dyn DistanceApi>,
    catalog: CatalogCache,
    timeout: Duration,
    ttl: chrono::Duration,
    estimate_ttl: chrono::Duration,
}

impl DistanceResolver {
    pub fn new(api: Arc<dyn DistanceApi>, catalog: CatalogCache, timeout: Duration) -> Self {
        Self {
            api,
            catalog,
            timeout,
            ttl: chrono::Duration::hours(24),
            estimate_ttl: chrono::Duration::hours(1),
        }
    }

    /// Lifetimes for routed and estimated records. Estimates expire sooner so
    /// the routed distance replaces them once the API recovers.
    pub fn with_ttl(mut self, ttl: Duration, estimate_ttl: Duration) -> Self {
        self.ttl = chrono::Duration::from_std(ttl).unwrap_or(self.ttl);
        self.estimate_ttl = chrono::Duration::from_std(estimate_ttl).unwrap_or(self.estimate_ttl);
        self
    }

    /// Geocode, then route from the nearest branch.
    pub async fn resolve(&self, address: &str) -> Result<LocationRecord, ResolveError> {
        let geocoded = self.geocode(address).await?;
        Ok(self.route(&geocoded).await)
    }

    /// First stage: place the address and pick its nearest branch.
    pub async fn geocode(&self, address: &str) -> Result<Geocoded, ResolveError> {
        let normalized = normalize_address(address);
        if normalized.is_empty() {
            return Err(ResolveError::AddressUnresolvable(address.to_string()));
        }

        let snapshot = self.catalog.snapshot();
        if snapshot.branches.is_empty() {
            return Err(ResolveError::NoBranches);
        }

        let point = match timeout(self.timeout, self.api.geocode(&normalized)).await {
            Ok(Ok(point)) => point,
            Ok(Err(DistanceApiError::NotFound)) => {
                return Err(ResolveError::AddressUnresolvable(normalized));
            }
            Ok(Err(e)) => return Err(ResolveError::Unavailable(e.to_string())),
            Err(_) => return Err(ResolveError::Unavailable("geocoding timed out".to_string())),
        };

        let (branch, straight_line_miles) =
            nearest_branch(point, &snapshot.branches).ok_or(ResolveError::NoBranches)?;

        Ok(Geocoded {
            normalized_address: normalized,
            point,
            branch: branch.clone(),
            straight_line_miles,
        })
    }

    /// Second stage: routed distance from the branch. Falls back to the
    /// straight-line distance when routing fails or times out.
    pub async fn route(&self, geocoded: &Geocoded) -> LocationRecord {
        let origin = geocoded.branch.coordinates;
        let routed = timeout(self.timeout, self.api.driving_miles(origin, geocoded.point)).await;
        let address = &geocoded.normalized_address;
        let record = match routed {
            Ok(Ok(miles)) if miles.is_finite() && miles >= 0.0 => {
                self.record(geocoded, miles, false)
            }
            Ok(Ok(miles)) => {
                warn!("Distance API returned {} mi for '{}'; using estimate", miles, address);
                self.estimate(geocoded)
            }
            Ok(Err(e)) => {
                warn!("Routed distance failed for '{}': {}; using estimate", address, e);
                self.estimate(geocoded)
            }
            Err(_) => {
                warn!("Routed distance timed out for '{}'; using estimate", address);
                self.estimate(geocoded)
            }
        };
        debug!(
            "Resolved '{}' to {} ({} mi{})",
            address,
            record.nearest_branch_id,
            record.distance_miles,
            if record.is_estimated { ", estimated" } else { "" }
        );
        record
    }

    /// Straight-line record for an address that has been geocoded
    pub fn estimate(&self, geocoded: &Geocoded) -> LocationRecord {
        self.record(geocoded, geocoded.straight_line_miles, true)
    }

    fn record(&self, geocoded: &Geocoded, miles: f64, is_estimated: bool) -> LocationRecord {
        let resolved_at = Utc::now();
        let ttl = if is_estimated { self.estimate_ttl } else { self.ttl };
        LocationRecord {
            normalized_address: geocoded.normalized_address.clone(),
            nearest_branch_id: geocoded.branch.branch_id.clone(),
            distance_miles: miles_to_decimal(miles),
            is_estimated,
            resolved_at,
            ttl_expires_at: resolved_at + ttl,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{Branch, CatalogSnapshot};
    use crate::fakes::FakeDistanceApi;
    use rust_decimal_macros::dec;

    fn catalog_with_branches() -> CatalogCache {
        let cache = CatalogCache::new();
        let mut snapshot = CatalogSnapshot::bootstrap();
        snapshot.version = 1;
        snapshot.branches = vec![
            Branch {
                branch_id: "austin".to_string(),
                address: "Austin, TX".to_string(),
                coordinates: Coordinates::new(30.2672, -97.7431).unwrap(),
            },
            Branch {
                branch_id: "dallas".to_string(),
                address: "Dallas, TX".to_string(),
                coordinates: Coordinates::new(32.7767, -96.7970).unwrap(),
            },
        ];
        cache.publish(Arc::new(snapshot));
        cache
    }

    fn round_rock() -> Coordinates {
        Coordinates::new(30.5083, -97.6789).unwrap()
    }

    #[tokio::test]
    async fn test_routed_distance_from_nearest_branch() {
        let api = Arc::new(FakeDistanceApi::new().with_address("round rock, tx", round_rock(), 19.4));
        let resolver = DistanceResolver::new(api.clone(), catalog_with_branches(), Duration::from_secs(1));

        let record = resolver.resolve("Round Rock,  TX").await.unwrap();
        assert_eq!(record.normalized_address, "round rock, tx");
        assert_eq!(record.nearest_branch_id, "austin");
        assert_eq!(record.distance_miles, dec!(19.40));
        assert!(!record.is_estimated);
        assert!(record.is_fresh(Utc::now()));
    }

    #[tokio::test]
    async fn test_routing_failure_falls_back_to_haversine() {
        let api = Arc::new(
            FakeDistanceApi::new()
                .with_address("round rock, tx", round_rock(), 19.4)
                .failing_routes(),
        );
        let resolver = DistanceResolver::new(api, catalog_with_branches(), Duration::from_secs(1));

        let record = resolver.resolve("round rock, tx").await.unwrap();
        assert!(record.is_estimated);
        assert_eq!(record.nearest_branch_id, "austin");
        assert!(record.distance_miles > dec!(10) && record.distance_miles < dec!(20));
    }

    #[tokio::test]
    async fn test_unknown_address_is_unresolvable() {
        let api = Arc::new(FakeDistanceApi::new());
        let resolver = DistanceResolver::new(api, catalog_with_branches(), Duration::from_secs(1));
        assert_eq!(
            resolver.resolve("nowhere").await,
            Err(ResolveError::AddressUnresolvable("nowhere".to_string()))
        );
    }

    #[tokio::test]
    async fn test_slow_geocoder_is_unavailable() {
        let api = Arc::new(
            FakeDistanceApi::new()
                .with_address("round rock, tx", round_rock(), 19.4)
                .with_delay(Duration::from_millis(200)),
        );
        let resolver = DistanceResolver::new(api, catalog_with_branches(), Duration::from_millis(20));
        assert!(matches!(
            resolver.resolve("round rock, tx").await,
            Err(ResolveError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_geocode_then_route() {
        let api = Arc::new(FakeDistanceApi::new().with_address("round rock, tx", round_rock(), 19.4));
        let resolver = DistanceResolver::new(api.clone(), catalog_with_branches(), Duration::from_secs(1));

        let geocoded = resolver.geocode("Round Rock, TX").await.unwrap();
        assert_eq!(geocoded.branch.branch_id, "austin");
        assert_eq!(api.route_calls(), 0);

        let estimate = resolver.estimate(&geocoded);
        assert!(estimate.is_estimated);
        assert_eq!(estimate.distance_miles, miles_to_decimal(geocoded.straight_line_miles));

        let routed = resolver.route(&geocoded).await;
        assert!(!routed.is_estimated);
        assert_eq!(routed.distance_miles, dec!(19.40));
        assert_eq!(api.route_calls(), 1);
    }

    #[tokio::test]
    async fn test_no_branches() {
        let api = Arc::new(FakeDistanceApi::new().with_address("round rock, tx", round_rock(), 19.4));
        let resolver = DistanceResolver::new(api, CatalogCache::new(), Duration::from_secs(1));
        assert_eq!(resolver.resolve("round rock, tx").await, Err(ResolveError::NoBranches));
    }
}
