//! Operational events and in-process counters.
//!
//! Events go to a fire-and-forget [`EventSink`]; nothing in the quote path
//! ever waits on the sink.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    CatalogSync,
    CatalogSyncAlert,
    LocationResolved,
    QuoteComputed,
}

/// One `(event_type, success, payload)` report
#[derive(Debug, Clone, Serialize)]
pub struct OpsEvent {
    pub event_type: EventType,
    pub success: bool,
    pub payload: serde_json::Value,
    pub at: DateTime<Utc>,
}

impl OpsEvent {
    pub fn new(event_type: EventType, success: bool, payload: serde_json::Value) -> Self {
        Self {
            event_type,
            success,
            payload,
            at: Utc::now(),
        }
    }
}

/// Fire-and-forget reporting collaborator
pub trait EventSink: Send + Sync {
    fn emit(&self, event: OpsEvent);
}

/// Writes events to the log
#[derive(Debug, Default, Clone)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: OpsEvent) {
        if event.success {
            debug!(event_type = ?event.event_type, payload = %event.payload, "ops event");
        } else {
            warn!(event_type = ?event.event_type, payload = %event.payload, "ops event failed");
        }
    }
}

/// Posts events as JSON to a reporting endpoint from a background task.
///
/// The queue is bounded; events are dropped when it is full.
#[derive(Debug, Clone)]
pub struct HttpEventSink {
    tx: mpsc::Sender<OpsEvent>,
    dropped: Arc<AtomicU64>,
}

impl HttpEventSink {
    /// Spawn the delivery task. Must be called inside a tokio runtime.
    pub fn spawn(url: String, capacity: usize, timeout: Duration) -> Self {
        let (tx, mut rx) = mpsc::channel::<OpsEvent>(capacity.max(1));
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());

        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match client.post(&url).json(&event).send().await {
                    Ok(resp) if resp.status().is_success() => {}
                    Ok(resp) => warn!("Reporting endpoint returned {}", resp.status()),
                    Err(e) => warn!("Failed to deliver ops event: {}", e),
                }
            }
            info!("Reporting sink stopped");
        });

        Self {
            tx,
            dropped: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl EventSink for HttpEventSink {
    fn emit(&self, event: OpsEvent) {
        if self.tx.try_send(event).is_err() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
        }
    }
}

/// Counters for the quote and cache paths
#[derive(Debug, Default)]
pub struct QuoteMetrics {
    pub quotes_total: AtomicU64,
    pub quotes_degraded: AtomicU64,
    pub quotes_rejected: AtomicU64,
    pub location_hits: AtomicU64,
    pub location_stale_hits: AtomicU64,
    pub location_misses: AtomicU64,
    pub location_estimates: AtomicU64,
    pub resolutions_started: AtomicU64,
    pub resolutions_failed: AtomicU64,
    pub syncs_succeeded: AtomicU64,
    pub syncs_failed: AtomicU64,
}

impl QuoteMetrics {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            quotes_total: self.quotes_total.load(Ordering::Relaxed),
            quotes_degraded: self.quotes_degraded.load(Ordering::Relaxed),
            quotes_rejected: self.quotes_rejected.load(Ordering::Relaxed),
            location_hits: self.location_hits.load(Ordering::Relaxed),
            location_stale_hits: self.location_stale_hits.load(Ordering::Relaxed),
            location_misses: self.location_misses.load(Ordering::Relaxed),
            location_estimates: self.location_estimates.load(Ordering::Relaxed),
            resolutions_started: self.resolutions_started.load(Ordering::Relaxed),
            resolutions_failed: self.resolutions_failed.load(Ordering::Relaxed),
            syncs_succeeded: self.syncs_succeeded.load(Ordering::Relaxed),
            syncs_failed: self.syncs_failed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`QuoteMetrics`] for the stats endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct MetricsSnapshot {
    pub quotes_total: u64,
    pub quotes_degraded: u64,
    pub quotes_rejected: u64,
    pub location_hits: u64,
    pub location_stale_hits: u64,
    pub location_misses: u64,
    pub location_estimates: u64,
    pub resolutions_started: u64,
    pub resolutions_failed: u64,
    pub syncs_succeeded: u64,
    pub syncs_failed: u64,
}
