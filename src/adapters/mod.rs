pub mod definition_sources;
pub mod http_client;
pub mod http_handler;
pub mod middleware;
pub mod stats;

/// Re-export commonly used types from adapters
pub use definition_sources::{FileDefinitionSource, HttpDefinitionSource};
pub use http_client::HttpClientAdapter;
pub use http_handler::HttpHandler;
pub use middleware::*;
pub use stats::MetricsStatsClient;
