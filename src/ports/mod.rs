pub mod definition_source;
pub mod http_client;
pub mod stats_client;
