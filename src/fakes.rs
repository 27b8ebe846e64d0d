//! In-process doubles for the external collaborators.
//!
//! Used by the unit and integration tests, and handy for running the service
//! locally without spreadsheet or maps credentials.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::catalog::source::{CatalogSource, CatalogTable, SheetTable, SourceError};
use crate::location::geo::Coordinates;
use crate::location::resolver::{DistanceApi, DistanceApiError};
use crate::reporting::{EventSink, EventType, OpsEvent};

/// Geocoder and router over a fixed address list
#[derive(Debug, Default)]
pub struct FakeDistanceApi {
    /// normalized address -> (point, routed miles from any branch)
    addresses: HashMap<String, (Coordinates, f64)>,
    delay: Duration,
    route_delay: Duration,
    fail_geocode: bool,
    fail_routes: bool,
    geocode_calls: AtomicUsize,
    route_calls: AtomicUsize,
}

impl FakeDistanceApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_address(mut self, address: &str, point: Coordinates, routed_miles: f64) -> Self {
        self.addresses.insert(address.to_string(), (point, routed_miles));
        self
    }

    /// Sleep before answering each call
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self.route_delay = delay;
        self
    }

    /// Sleep before answering routed-distance calls only
    pub fn with_route_delay(mut self, delay: Duration) -> Self {
        self.route_delay = delay;
        self
    }

    /// Every geocoding call fails with a transport error
    pub fn failing_geocode(mut self) -> Self {
        self.fail_geocode = true;
        self
    }

    /// Every routed-distance call fails
    pub fn failing_routes(mut self) -> Self {
        self.fail_routes = true;
        self
    }

    pub fn geocode_calls(&self) -> usize {
        self.geocode_calls.load(Ordering::SeqCst)
    }

    pub fn route_calls(&self) -> usize {
        self.route_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DistanceApi for FakeDistanceApi {
    async fn geocode(&self, address: &str) -> Result<Coordinates, DistanceApiError> {
        self.geocode_calls.fetch_add(1, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        if self.fail_geocode {
            return Err(DistanceApiError::Http("connection reset".to_string()));
        }
        self.addresses
            .get(address)
            .map(|(point, _)| *point)
            .ok_or(DistanceApiError::NotFound)
    }

    async fn driving_miles(
        &self,
        _origin: Coordinates,
        destination: Coordinates,
    ) -> Result<f64, DistanceApiError> {
        self.route_calls.fetch_add(1, Ordering::SeqCst);
        if !self.route_delay.is_zero() {
            tokio::time::sleep(self.route_delay).await;
        }
        if self.fail_routes {
            return Err(DistanceApiError::Api("OVER_QUERY_LIMIT".to_string()));
        }
        self.addresses
            .values()
            .find(|(point, _)| *point == destination)
            .map(|(_, miles)| *miles)
            .ok_or_else(|| DistanceApiError::Api("NOT_FOUND".to_string()))
    }
}

/// Spreadsheet stand-in; tables can be swapped or failed between syncs
#[derive(Debug, Default)]
pub struct FakeCatalogSource {
    tables: Mutex<HashMap<CatalogTable, SheetTable>>,
    failing: Mutex<HashSet<CatalogTable>>,
    delay: Mutex<Duration>,
    fetches: AtomicUsize,
}

impl FakeCatalogSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_table(&self, table: CatalogTable, rows: &[&[&str]]) {
        let values = rows
            .iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect();
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table, SheetTable::from_values(values));
    }

    pub fn fail_table(&self, table: CatalogTable) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table);
    }

    pub fn heal_table(&self, table: CatalogTable) {
        self.failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&table);
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap_or_else(PoisonError::into_inner) = delay;
    }

    /// Individual table fetches so far
    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CatalogSource for FakeCatalogSource {
    async fn fetch_table(&self, table: CatalogTable) -> Result<SheetTable, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        let delay = *self.delay.lock().unwrap_or_else(PoisonError::into_inner);
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self
            .failing
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(&table)
        {
            return Err(SourceError::Status { table, status: 503 });
        }
        Ok(self
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&table)
            .cloned()
            .unwrap_or_default())
    }
}

/// Records every event it receives
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<OpsEvent>>,
}

impl MemorySink {
    pub fn events(&self) -> Vec<OpsEvent> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn count(&self, event_type: EventType, success: bool) -> usize {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| e.event_type == event_type && e.success == success)
            .count()
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: OpsEvent) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
    }
}
