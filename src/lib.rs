//! Portico - a dynamic API gateway with a hot-swappable route table.
//!
//! Portico matches inbound requests against a table of API definitions,
//! elects an upstream target for the matched route, rewrites the request path
//! (strip / append / `{param}` interpolation) and forwards it. The route table
//! can be rebuilt at any time from a new definition set and is published with
//! a single atomic swap, so in-flight requests are never disturbed.
//!
//! # Features
//! - Listen paths with literal prefixes, `*` wildcards and `{name}` parameters
//! - Per-route method and host filtering (405 with `Allow`, 404 otherwise)
//! - Pluggable load balancing (`roundrobin`, `weight`)
//! - Transport-level request / response transform chains ("shackles")
//! - Built-in plugins: request id, CORS, security headers, header rewriting
//! - Definitions from a watched file or a polled HTTP endpoint
//! - Metrics through the `metrics` facade and structured tracing via `tracing`
//!
//! # Quick Example
//! ```no_run
//! use std::sync::Arc;
//!
//! use portico::{
//!     GatewayService, HttpClientAdapter,
//!     adapters::{MetricsStatsClient, builtin_plugins},
//!     config::ServerConfig,
//!     core::ProxyContext,
//! };
//!
//! # fn main() -> eyre::Result<()> {
//! let cfg: ServerConfig = portico::config::loader::load_config_sync("portico.yaml")?;
//! let context = ProxyContext::new(
//!     Arc::new(HttpClientAdapter::new(&cfg.proxy)?),
//!     Arc::new(MetricsStatsClient::new()),
//! );
//! let gateway = GatewayService::new(context, builtin_plugins());
//! gateway.reload(&cfg.apis)?;
//! # Ok(()) }
//! ```
//!
//! # Architecture
//! The crate separates **ports** (traits) from **adapters** (implementations)
//! while keeping routing and rewriting logic inside `core`, which performs no
//! I/O of its own.
//!
//! # Error Handling
//! Library components return domain error types built with `thiserror`;
//! application plumbing returns `eyre::Result<T>` with context attached.
pub mod config;
pub mod metrics;
pub mod ports;
pub mod tracing_setup;

pub mod adapters;
pub mod core;

// Re-export the specific types needed by the binary crate
pub use crate::{
    adapters::{HttpClientAdapter, HttpHandler},
    core::{GatewayService, Register, Route},
    ports::{definition_source::DefinitionSource, http_client::HttpClient},
};
