/// One proxied request as seen by the stats collaborator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamEvent {
    /// The inbound request URI, before rewriting
    pub inbound_uri: String,
    /// Host (and port) of the elected upstream
    pub upstream_host: String,
    /// Listen path of the route that matched
    pub listen_path: String,
    pub method: String,
}

/// Receives one event per proxied request. Implementations must be cheap and
/// non-blocking; they run inline on the request task.
pub trait StatsClient: Send + Sync + 'static {
    fn track_upstream(&self, event: &UpstreamEvent);
}
