//! Metrics collection and exposition.
//!
//! # Metrics
//! - `proxy_requests_total` (counter): requests by flow and status
//! - `proxy_cache_hits_total` / `proxy_cache_misses_total` (counters)
//! - `proxy_upstream_fetch_seconds` (histogram): upstream round trips
//! - `proxy_cache_saved_seconds` (histogram): original fetch time avoided by a hit
//! - `proxy_cache_saved_bytes_total` (counter): bytes served without an origin fetch
//! - `proxy_cache_commit_bytes_total` (counter): committed bytes by tier
//! - `proxy_tunnels_total` (counter): CONNECT tunnels by outcome
//! - `proxy_blocked_total` (counter): requests refused by the block list
//!
//! Without an installed recorder every call is a no-op.

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_request(flow: &'static str, status: u16) {
    counter!("proxy_requests_total", "flow" => flow, "status" => status.to_string()).increment(1);
}

pub fn record_cache_lookup(hit: bool) {
    if hit {
        counter!("proxy_cache_hits_total").increment(1);
    } else {
        counter!("proxy_cache_misses_total").increment(1);
    }
}

pub fn record_upstream_fetch(elapsed: Duration) {
    histogram!("proxy_upstream_fetch_seconds").record(elapsed.as_secs_f64());
}

pub fn record_cache_saved(fetch_duration: Duration, bytes: u64) {
    histogram!("proxy_cache_saved_seconds").record(fetch_duration.as_secs_f64());
    counter!("proxy_cache_saved_bytes_total").increment(bytes);
}

pub fn record_cache_commit(tier: &'static str, bytes: u64) {
    counter!("proxy_cache_commit_bytes_total", "tier" => tier).increment(bytes);
}

pub fn record_tunnel(outcome: &'static str) {
    counter!("proxy_tunnels_total", "outcome" => outcome).increment(1);
}

pub fn record_blocked() {
    counter!("proxy_blocked_total").increment(1);
}
