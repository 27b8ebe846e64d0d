//! Delivery location resolution and caching.

pub mod cache;
pub mod geo;
pub mod maps;
pub mod models;
pub mod resolver;

pub use cache::{LocationCache, LocationCacheConfig, LocationCacheStats};
pub use geo::Coordinates;
pub use maps::GoogleMapsClient;
pub use models::{normalize_address, LocationRecord, LocationSource, ResolvedLocation};
pub use resolver::{DistanceApi, DistanceApiError, DistanceResolver, ResolveError};
