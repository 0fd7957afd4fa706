use crate::{
    metrics::increment_upstream_request,
    ports::stats_client::{StatsClient, UpstreamEvent},
};

/// Stats collaborator backed by the `metrics` facade and a debug event.
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsStatsClient;

impl MetricsStatsClient {
    pub fn new() -> Self {
        Self
    }
}

impl StatsClient for MetricsStatsClient {
    fn track_upstream(&self, event: &UpstreamEvent) {
        increment_upstream_request(&event.upstream_host, &event.listen_path);
        tracing::debug!(
            upstream = %event.upstream_host,
            listen_path = %event.listen_path,
            method = %event.method,
            uri = %event.inbound_uri,
            "Upstream elected"
        );
    }
}
