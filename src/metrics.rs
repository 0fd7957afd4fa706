//! Lightweight metrics helpers for Portico.
//!
//! Thin wrappers over the `metrics` crate macros. No exporter is embedded;
//! the embedding application installs whichever recorder it wants, and with
//! no recorder installed every call is a no-op.
//!
//! Provided metrics:
//! * `portico_requests_total` (counter; method, status)
//! * `portico_request_duration_seconds` (histogram; method)
//! * `portico_upstream_requests_total` (counter; upstream, listen_path)
//! * `portico_routes` (gauge)
use std::time::{Duration, Instant};

use metrics::{
    Unit, counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram,
};
use once_cell::sync::Lazy;

pub const PORTICO_REQUESTS_TOTAL: &str = "portico_requests_total";
pub const PORTICO_REQUEST_DURATION_SECONDS: &str = "portico_request_duration_seconds";
pub const PORTICO_UPSTREAM_REQUESTS_TOTAL: &str = "portico_upstream_requests_total";
pub const PORTICO_ROUTES: &str = "portico_routes";

static DESCRIPTIONS: Lazy<()> = Lazy::new(|| {
    describe_counter!(
        PORTICO_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of HTTP requests processed by the gateway."
    );
    describe_histogram!(
        PORTICO_REQUEST_DURATION_SECONDS,
        Unit::Seconds,
        "Latency of HTTP requests processed by the gateway."
    );
    describe_counter!(
        PORTICO_UPSTREAM_REQUESTS_TOTAL,
        Unit::Count,
        "Total number of requests directed to an upstream target."
    );
    describe_gauge!(PORTICO_ROUTES, "Number of listen paths in the active route table.");
});

/// Increment the total request counter for an inbound gateway request.
pub fn increment_request_total(method: &str, status: u16) {
    counter!(
        PORTICO_REQUESTS_TOTAL,
        "method" => method.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record a completed inbound request's duration.
pub fn record_request_duration(method: &str, duration: Duration) {
    histogram!(PORTICO_REQUEST_DURATION_SECONDS, "method" => method.to_string())
        .record(duration.as_secs_f64());
}

pub fn increment_upstream_request(upstream: &str, listen_path: &str) {
    counter!(
        PORTICO_UPSTREAM_REQUESTS_TOTAL,
        "upstream" => upstream.to_string(),
        "listen_path" => listen_path.to_string()
    )
    .increment(1);
}

/// Publish the size of the active route table.
pub fn set_routes(count: usize) {
    gauge!(PORTICO_ROUTES).set(count as f64);
}

/// RAII helper measuring inbound request duration.
pub struct RequestTimer {
    start: Instant,
    method: String,
}

impl RequestTimer {
    pub fn new(method: &str) -> Self {
        Self {
            start: Instant::now(),
            method: method.to_string(),
        }
    }
}

impl Drop for RequestTimer {
    fn drop(&mut self) {
        record_request_duration(&self.method, self.start.elapsed());
    }
}

/// Register metric descriptions with the installed recorder (idempotent).
pub fn init_metrics() {
    Lazy::force(&DESCRIPTIONS);
    tracing::debug!("Portico metric descriptions registered");
}
