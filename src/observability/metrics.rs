//! Metrics collection and exposition.
//!
//! # Metrics
//! - `ip_allowlist_requests_total` (counter): HTTP decisions by middleware, outcome
//! - `tcp_allowlist_rejected_total` (counter): connections dropped by the TCP allow list
//! - `proxy_upstream_errors_total` (counter): failed upstream requests
//! - `config_reloads_total` (counter): reload attempts by outcome
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;

use metrics::counter;
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder};

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new().with_http_listener(addr).install()?;
    tracing::info!(address = %addr, "Metrics endpoint listening");
    Ok(())
}

pub fn record_allow_list_decision(middleware: &str, allowed: bool) {
    let outcome = if allowed { "allowed" } else { "rejected" };
    counter!(
        "ip_allowlist_requests_total",
        "middleware" => middleware.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_tcp_rejected() {
    counter!("tcp_allowlist_rejected_total").increment(1);
}

pub fn record_upstream_error() {
    counter!("proxy_upstream_errors_total").increment(1);
}

pub fn record_reload(applied: bool) {
    let outcome = if applied { "applied" } else { "rejected" };
    counter!("config_reloads_total", "outcome" => outcome).increment(1);
}
