//! Metrics collection and exposition.
//!
//! # Metrics
//! - `streamgate_streams_accepted_total` (counter): streams created, by server
//! - `streamgate_accept_errors_total` (counter): transient accept failures, by server
//! - `streamgate_stream_registration_failures_total` (counter): streams the router refused
//! - `streamgate_websocket_upgrades_rejected_total` (counter): upgrades without the subprotocol
//! - `streamgate_server_listening` (gauge): 1 while a server is listening, by server
//!
//! Without an installed recorder every update is a no-op.

use std::sync::OnceLock;

use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

static PROMETHEUS: OnceLock<PrometheusHandle> = OnceLock::new();

/// Install the Prometheus recorder. Scraped through the diagnostics endpoint.
pub fn install_recorder() -> Result<(), BuildError> {
    if PROMETHEUS.get().is_some() {
        return Ok(());
    }
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS.set(handle);
    Ok(())
}

/// Current metrics in Prometheus text format, if a recorder is installed.
pub fn render() -> Option<String> {
    PROMETHEUS.get().map(PrometheusHandle::render)
}

pub fn record_stream_accepted(server: &str) {
    metrics::counter!("streamgate_streams_accepted_total", "server" => server.to_string()).increment(1);
}

pub fn record_accept_error(server: &str) {
    metrics::counter!("streamgate_accept_errors_total", "server" => server.to_string()).increment(1);
}

pub fn record_registration_failure(server: &str) {
    metrics::counter!("streamgate_stream_registration_failures_total", "server" => server.to_string())
        .increment(1);
}

pub fn record_upgrade_rejected(server: &str) {
    metrics::counter!("streamgate_websocket_upgrades_rejected_total", "server" => server.to_string())
        .increment(1);
}

pub fn set_listening(server: &str, listening: bool) {
    metrics::gauge!("streamgate_server_listening", "server" => server.to_string())
        .set(if listening { 1.0 } else { 0.0 });
}
