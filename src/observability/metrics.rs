//! Metrics collection and exposition.
//!
//! # Metrics
//! - `conn_bytes_total` (counter): bytes transferred, labelled by `direction`
//! - `conn_transfers_total` (counter): successful reads/writes, labelled by `direction`
//! - `conn_closed_total` (counter): connections closed
//! - `conn_close_failures_total` (counter): unclean shutdowns and repeated closes
//!
//! # Design Decisions
//! - Metrics are fed from connection events, so the core stays unaware of them
//! - Exposition is optional and owned by the binary

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::observability::events::{ConnectionEvent, Direction, EventSink};

/// Translates connection events into `metrics` counters.
#[derive(Debug, Clone, Copy, Default)]
pub struct MetricsSink;

impl EventSink for MetricsSink {
    fn emit(&self, event: &ConnectionEvent) {
        match event {
            ConnectionEvent::Transfer { direction, bytes, .. } => {
                let label = match direction {
                    Direction::Inbound => "inbound",
                    Direction::Outbound => "outbound",
                };
                metrics::counter!("conn_bytes_total", "direction" => label)
                    .increment(*bytes as u64);
                metrics::counter!("conn_transfers_total", "direction" => label).increment(1);
            }
            ConnectionEvent::Closed { .. } => {
                metrics::counter!("conn_closed_total").increment(1);
            }
            ConnectionEvent::CloseFailed { .. } => {
                metrics::counter!("conn_close_failures_total").increment(1);
            }
        }
    }
}

/// Install the Prometheus exporter with an HTTP scrape endpoint.
///
/// Must be called from within a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), metrics_exporter_prometheus::BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics exporter listening");
    Ok(())
}
