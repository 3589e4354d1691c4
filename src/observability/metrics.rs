//! Metric recording helpers.
//!
//! # Metrics
//! - `sandproxy_requests_total` (counter): dispatched requests by method,
//!   status and kind (app/static)
//! - `sandproxy_request_duration_seconds` (histogram): dispatch latency
//! - `sandproxy_exchanges_total` (counter): worker-side exchanges by status
//! - `sandproxy_protocol_errors_total` (counter): violations by context
//! - `sandproxy_socket_events_total` (counter): virtual socket lifecycle
//! - `sandproxy_stale_lookups_total` (counter): exhausted lookup retries
//! - `sandproxy_cache_lookups_total` (counter) and gauges for cache/registry
//!   sizes
//!
//! Recording is unconditional and cheap; whether anything consumes the
//! metrics is up to the embedding process.

use std::time::Instant;

use metrics::{counter, gauge, histogram};

/// Record one dispatched request on the proxy side.
pub fn record_request(method: &str, status: u16, kind: &'static str, start: Instant) {
    counter!(
        "sandproxy_requests_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
        "kind" => kind,
    )
    .increment(1);
    histogram!("sandproxy_request_duration_seconds", "kind" => kind)
        .record(start.elapsed().as_secs_f64());
}

/// Record one served exchange on the worker side.
pub fn record_exchange(method: &str, status: u16) {
    counter!(
        "sandproxy_exchanges_total",
        "method" => method.to_string(),
        "status" => status.to_string(),
    )
    .increment(1);
}

/// Record a protocol violation and where it was detected.
pub fn record_protocol_error(context: &'static str) {
    counter!("sandproxy_protocol_errors_total", "context" => context).increment(1);
}

/// Record a virtual socket lifecycle event.
pub fn record_socket_event(kind: &'static str) {
    counter!("sandproxy_socket_events_total", "kind" => kind).increment(1);
}

/// Record a lookup that exhausted its retry window.
pub fn record_stale_lookup(prefix: &str) {
    counter!("sandproxy_stale_lookups_total", "prefix" => prefix.to_string()).increment(1);
}

/// Record a cache hit or miss.
pub fn record_cache_lookup(hit: bool) {
    let outcome = if hit { "hit" } else { "miss" };
    counter!("sandproxy_cache_lookups_total", "outcome" => outcome).increment(1);
}

/// Record the current cache entry count.
pub fn record_cache_size(len: usize) {
    gauge!("sandproxy_cache_entries").set(len as f64);
}

/// Record the current registry size.
pub fn record_registry_size(len: usize) {
    gauge!("sandproxy_registered_apps").set(len as f64);
}
