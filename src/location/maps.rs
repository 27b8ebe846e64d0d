//! Google Maps geocoding and distance matrix client.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use super::geo::Coordinates;
use super::resolver::{DistanceApi, DistanceApiError};

const MAPS_API_BASE: &str = "https://maps.googleapis.com/maps/api";
const METERS_PER_MILE: f64 = 1609.344;

#[derive(Debug, Deserialize)]
struct GeocodeResponse {
    status: String,
    #[serde(default)]
    results: Vec<GeocodeResult>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GeocodeResult {
    geometry: Geometry,
}

#[derive(Debug, Deserialize)]
struct Geometry {
    location: LatLng,
}

#[derive(Debug, Deserialize)]
struct LatLng {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct MatrixResponse {
    status: String,
    #[serde(default)]
    rows: Vec<MatrixRow>,
    #[serde(default)]
    error_message: Option<String>,
}

#[derive(Debug, Deserialize)]
struct MatrixRow {
    elements: Vec<MatrixElement>,
}

#[derive(Debug, Deserialize)]
struct MatrixElement {
    status: String,
    distance: Option<MatrixDistance>,
}

#[derive(Debug, Deserialize)]
struct MatrixDistance {
    /// Meters
    value: f64,
}

#[derive(Debug, Clone)]
pub struct GoogleMapsClient {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl GoogleMapsClient {
    pub fn new(api_key: String, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            client,
            api_key,
            base_url: MAPS_API_BASE.to_string(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get<T: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        query: &[(&str, &str)],
    ) -> Result<T, DistanceApiError> {
        let url = format!("{}/{}/json", self.base_url, path);
        let resp = self
            .client
            .get(&url)
            .query(query)
            .query(&[("key", self.api_key.as_str())])
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    DistanceApiError::Timeout
                } else {
                    DistanceApiError::Http(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(DistanceApiError::Http(format!("status {}", resp.status())));
        }
        resp.json()
            .await
            .map_err(|e| DistanceApiError::Api(format!("invalid response: {}", e)))
    }
}

fn api_error(status: String, message: Option<String>) -> DistanceApiError {
    match message {
        Some(message) => DistanceApiError::Api(format!("{}: {}", status, message)),
        None => DistanceApiError::Api(status),
    }
}

fn lat_lng(c: Coordinates) -> String {
    format!("{},{}", c.lat, c.lng)
}

#[async_trait]
impl DistanceApi for GoogleMapsClient {
    async fn geocode(&self, address: &str) -> Result<Coordinates, DistanceApiError> {
        let body: GeocodeResponse = self.get("geocode", &[("address", address)]).await?;
        match body.status.as_str() {
            "OK" => {}
            "ZERO_RESULTS" => return Err(DistanceApiError::NotFound),
            _ => return Err(api_error(body.status, body.error_message)),
        }
        let location = body
            .results
            .into_iter()
            .next()
            .map(|r| r.geometry.location)
            .ok_or(DistanceApiError::NotFound)?;
        Coordinates::new(location.lat, location.lng)
            .ok_or_else(|| DistanceApiError::Api("geocoder returned invalid coordinates".to_string()))
    }

    async fn driving_miles(
        &self,
        origin: Coordinates,
        destination: Coordinates,
    ) -> Result<f64, DistanceApiError> {
        let origins = lat_lng(origin);
        let destinations = lat_lng(destination);
        let body: MatrixResponse = self
            .get(
                "distancematrix",
                &[
                    ("origins", origins.as_str()),
                    ("destinations", destinations.as_str()),
                    ("mode", "driving"),
                    ("units", "imperial"),
                ],
            )
            .await?;
        if body.status != "OK" {
            return Err(api_error(body.status, body.error_message));
        }

        let element = body
            .rows
            .into_iter()
            .next()
            .and_then(|row| row.elements.into_iter().next())
            .ok_or_else(|| DistanceApiError::Api("empty distance matrix".to_string()))?;
        match (element.status.as_str(), element.distance) {
            ("OK", Some(distance)) => Ok(distance.value / METERS_PER_MILE),
            (status, _) => Err(DistanceApiError::Api(format!("route status {}", status))),
        }
    }
}
