//! Great-circle distance helpers.

use rust_decimal::prelude::*;
use serde::{Deserialize, Serialize};

use crate::catalog::models::Branch;

const EARTH_RADIUS_MILES: f64 = 3958.8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coordinates {
    pub lat: f64,
    pub lng: f64,
}

impl Coordinates {
    pub fn new(lat: f64, lng: f64) -> Option<Self> {
        let valid = lat.is_finite()
            && lng.is_finite()
            && (-90.0..=90.0).contains(&lat)
            && (-180.0..=180.0).contains(&lng);
        valid.then_some(Self { lat, lng })
    }
}

/// Straight-line distance in miles.
pub fn haversine_miles(a: Coordinates, b: Coordinates) -> f64 {
    let (lat1, lat2) = (a.lat.to_radians(), b.lat.to_radians());
    let dlat = (b.lat - a.lat).to_radians();
    let dlng = (b.lng - a.lng).to_radians();

    let h = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlng / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_MILES * h.sqrt().min(1.0).asin()
}

/// Closest branch by straight-line distance. Ties go to the earlier branch.
pub fn nearest_branch(point: Coordinates, branches: &[Branch]) -> Option<(&Branch, f64)> {
    branches
        .iter()
        .map(|b| (b, haversine_miles(point, b.coordinates)))
        .fold(None, |best, candidate| match best {
            Some((_, best_miles)) if best_miles <= candidate.1 => best,
            _ => Some(candidate),
        })
}

/// Miles as a two-place decimal for pricing. Non-finite input maps to zero.
pub fn miles_to_decimal(miles: f64) -> Decimal {
    Decimal::from_f64(miles.max(0.0))
        .map(|d| d.round_dp(2))
        .unwrap_or(Decimal::ZERO)
}
