//! Metrics collection and exposition.
//!
//! # Metrics
//! - `upload_pack_requests_total` (counter): exchanges by outcome
//! - `upload_pack_duration_seconds` (histogram): exchange latency by outcome
//! - `upload_pack_bytes_total` (counter): bytes relayed by direction
//!
//! # Design Decisions
//! - Recording is a no-op until an exporter is installed
//! - Outcome labels come from `OutcomeKind`, a closed set

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::git::{Direction, OutcomeKind};

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

/// Record one finished upload-pack exchange.
pub fn record_upload_pack(outcome: OutcomeKind, elapsed: Duration, bytes_in: u64, bytes_out: u64) {
    let outcome = outcome.as_str();
    metrics::counter!("upload_pack_requests_total", "outcome" => outcome).increment(1);
    metrics::histogram!("upload_pack_duration_seconds", "outcome" => outcome)
        .record(elapsed.as_secs_f64());
    metrics::counter!("upload_pack_bytes_total", "direction" => Direction::Inbound.as_str())
        .increment(bytes_in);
    metrics::counter!("upload_pack_bytes_total", "direction" => Direction::Outbound.as_str())
        .increment(bytes_out);
}
