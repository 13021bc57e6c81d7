//! Metrics collection and export for waypost.
//!
//! Uses the `metrics` crate for instrumentation and exports
//! to Prometheus format.

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tracing::info;
use waypost_core::{BroadcastReport, EvictionOutcome, IngestOutcome};
use waypost_protocol::StreamFrame;

/// Metric names.
pub mod names {
    pub const INGEST_REQUESTS_TOTAL: &str = "waypost_ingest_requests_total";
    pub const INGEST_REJECTED_TOTAL: &str = "waypost_ingest_rejected_total";
    pub const INGEST_LATENCY_SECONDS: &str = "waypost_ingest_latency_seconds";
    pub const REPORTS_TOTAL: &str = "waypost_reports_total";
    pub const PLAYERS_TRACKED: &str = "waypost_players_tracked";
    pub const PLAYERS_EVICTED_TOTAL: &str = "waypost_players_evicted_total";
    pub const BROADCASTS_TOTAL: &str = "waypost_broadcasts_total";
    pub const DELIVERIES_DROPPED_TOTAL: &str = "waypost_deliveries_dropped_total";
    pub const SUBSCRIBERS_EVICTED_TOTAL: &str = "waypost_subscribers_evicted_total";
    pub const STREAMS_TOTAL: &str = "waypost_streams_total";
    pub const STREAMS_ACTIVE: &str = "waypost_streams_active";
    pub const STREAM_FRAMES_TOTAL: &str = "waypost_stream_frames_total";
}

/// Initialize the metrics system.
pub fn init_metrics() {
    metrics::describe_counter!(
        names::INGEST_REQUESTS_TOTAL,
        "Total number of ingest requests received"
    );
    metrics::describe_counter!(
        names::INGEST_REJECTED_TOTAL,
        "Ingest requests rejected as malformed"
    );
    metrics::describe_histogram!(
        names::INGEST_LATENCY_SECONDS,
        "Ingest processing latency in seconds"
    );
    metrics::describe_counter!(
        names::REPORTS_TOTAL,
        "Position reports by outcome (applied or skipped)"
    );
    metrics::describe_gauge!(names::PLAYERS_TRACKED, "Players currently in the store");
    metrics::describe_counter!(
        names::PLAYERS_EVICTED_TOTAL,
        "Players removed for inactivity"
    );
    metrics::describe_counter!(names::BROADCASTS_TOTAL, "Snapshots broadcast to subscribers");
    metrics::describe_counter!(
        names::DELIVERIES_DROPPED_TOTAL,
        "Broadcast deliveries dropped on full mailboxes"
    );
    metrics::describe_counter!(
        names::SUBSCRIBERS_EVICTED_TOTAL,
        "Subscribers removed after their mailbox closed"
    );
    metrics::describe_counter!(names::STREAMS_TOTAL, "Total stream connections since start");
    metrics::describe_gauge!(names::STREAMS_ACTIVE, "Current number of open streams");
    metrics::describe_counter!(names::STREAM_FRAMES_TOTAL, "Frames written to streams");

    info!("Metrics initialized");
}

/// Start the Prometheus metrics server.
///
/// # Errors
///
/// Returns an error if the server cannot be started.
pub fn start_metrics_server(port: u16) -> Result<(), Box<dyn std::error::Error>> {
    let addr: SocketAddr = format!("0.0.0.0:{}", port).parse()?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()?;

    info!("Metrics server listening on {}", addr);
    Ok(())
}

/// Record an ingest request.
pub fn record_ingest_request() {
    counter!(names::INGEST_REQUESTS_TOTAL).increment(1);
}

/// Record a rejected ingest request.
pub fn record_rejected(reason: &'static str) {
    counter!(names::INGEST_REJECTED_TOTAL, "reason" => reason).increment(1);
}

/// Record an applied batch and the store size after it.
pub fn record_ingest(outcome: &IngestOutcome, players: usize) {
    counter!(names::REPORTS_TOTAL, "outcome" => "applied").increment(outcome.applied as u64);
    counter!(names::REPORTS_TOTAL, "outcome" => "skipped").increment(outcome.skipped as u64);
    gauge!(names::PLAYERS_TRACKED).set(players as f64);
    record_broadcast(&outcome.broadcast);
}

/// Record one snapshot fan-out.
pub fn record_broadcast(report: &BroadcastReport) {
    counter!(names::BROADCASTS_TOTAL).increment(1);
    counter!(names::DELIVERIES_DROPPED_TOTAL).increment(report.dropped as u64);
    counter!(names::SUBSCRIBERS_EVICTED_TOTAL).increment(report.evicted as u64);
}

/// Record ingest latency.
pub fn record_latency(seconds: f64) {
    histogram!(names::INGEST_LATENCY_SECONDS).record(seconds);
}

/// Record an inactivity sweep and the store size after it.
pub fn record_eviction(outcome: &EvictionOutcome, players: usize) {
    counter!(names::PLAYERS_EVICTED_TOTAL).increment(outcome.removed as u64);
    gauge!(names::PLAYERS_TRACKED).set(players as f64);
    if let Some(report) = &outcome.broadcast {
        record_broadcast(report);
    }
}

/// Metrics guard for an open stream, recording the disconnection on drop.
pub struct StreamMetricsGuard;

impl StreamMetricsGuard {
    /// Create a new metrics guard, recording a connection.
    #[must_use]
    pub fn new() -> Self {
        counter!(names::STREAMS_TOTAL).increment(1);
        gauge!(names::STREAMS_ACTIVE).increment(1.0);
        Self
    }

    /// Record a frame written to this stream.
    pub fn record_frame(&self, frame: &StreamFrame) {
        let event = frame.event().unwrap_or("ping");
        counter!(names::STREAM_FRAMES_TOTAL, "event" => event).increment(1);
    }
}

impl Default for StreamMetricsGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for StreamMetricsGuard {
    fn drop(&mut self) {
        gauge!(names::STREAMS_ACTIVE).decrement(1.0);
    }
}
