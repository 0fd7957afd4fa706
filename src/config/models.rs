//! Configuration data structures for portico.
//!
//! These types map directly to YAML / JSON / TOML configuration files. They are
//! serde-friendly and carry defaults so that minimal definitions stay concise.
//! `Definition` and friends are the route-rule shape consumed by the routing
//! core; everything that produces definitions (files, remote sources, tests)
//! only needs to build these values.
use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};

/// Sentinel method name registering a route for every HTTP method.
pub const ALL_METHODS: &str = "ALL";

fn default_true() -> bool {
    true
}

fn default_listen_addr() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_balancing() -> String {
    "roundrobin".to_string()
}

fn default_methods() -> Vec<String> {
    vec![ALL_METHODS.to_string()]
}

/// A single upstream backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Target {
    /// Absolute URL of the backend, optionally carrying a base path and query.
    #[serde(alias = "target")]
    pub url: String,
    /// Relative weight used by the `weight` balancer.
    #[serde(default)]
    pub weight: i32,
}

impl Target {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            weight: 0,
        }
    }

    pub fn weighted(url: impl Into<String>, weight: i32) -> Self {
        Self {
            url: url.into(),
            weight,
        }
    }
}

/// The upstream set of a route and the algorithm electing among it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Upstreams {
    #[serde(default = "default_balancing")]
    pub balancing: String,
    #[serde(default)]
    pub targets: Vec<Target>,
}

impl Default for Upstreams {
    fn default() -> Self {
        Self {
            balancing: default_balancing(),
            targets: Vec::new(),
        }
    }
}

/// Route rule: where to listen and how to rewrite towards the upstreams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Definition {
    pub listen_path: String,
    #[serde(default)]
    pub upstreams: Upstreams,
    #[serde(default)]
    pub preserve_host: bool,
    #[serde(default)]
    pub strip_path: bool,
    #[serde(default)]
    pub append_path: bool,
    #[serde(default)]
    pub enable_load_balancing: bool,
    #[serde(default = "default_methods")]
    pub methods: Vec<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
}

impl Definition {
    /// A definition listening on `listen_path` for every method with no upstreams.
    pub fn new(listen_path: impl Into<String>) -> Self {
        Self {
            listen_path: listen_path.into(),
            upstreams: Upstreams::default(),
            preserve_host: false,
            strip_path: false,
            append_path: false,
            enable_load_balancing: false,
            methods: default_methods(),
            hosts: Vec::new(),
        }
    }

    pub fn with_target(mut self, target: Target) -> Self {
        self.upstreams.targets.push(target);
        self
    }

    pub fn with_balancing(mut self, algorithm: impl Into<String>) -> Self {
        self.upstreams.balancing = algorithm.into();
        self.enable_load_balancing = true;
        self
    }

    pub fn with_methods<I, S>(mut self, methods: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.methods = methods.into_iter().map(Into::into).collect();
        self
    }

    /// True when the definition accepts every method.
    pub fn accepts_all_methods(&self) -> bool {
        self.methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(ALL_METHODS))
    }
}

/// Per-plugin configuration attached to an API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PluginConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub config: serde_json::Value,
}

impl PluginConfig {
    pub fn new(name: impl Into<String>, config: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            enabled: true,
            config,
        }
    }
}

/// A named API: the proxy definition plus the plugins attached to it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiDefinition {
    pub name: String,
    #[serde(default = "default_true")]
    pub active: bool,
    pub proxy: Definition,
    #[serde(default)]
    pub plugins: Vec<PluginConfig>,
}

impl ApiDefinition {
    pub fn new(name: impl Into<String>, proxy: Definition) -> Self {
        Self {
            name: name.into(),
            active: true,
            proxy,
            plugins: Vec::new(),
        }
    }

    pub fn with_plugin(mut self, plugin: PluginConfig) -> Self {
        self.plugins.push(plugin);
        self
    }
}

/// Header add/remove actions used by the header rewriting plugins.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct HeaderActions {
    #[serde(default)]
    pub add: HashMap<String, String>,
    #[serde(default)]
    pub remove: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LogConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

/// Upstream transport settings. Durations use humantime syntax ("30s", "1m").
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    pub upstream_timeout: String,
    pub pool_idle_timeout: String,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            upstream_timeout: "30s".to_string(),
            pool_idle_timeout: "90s".to_string(),
        }
    }
}

impl ProxyConfig {
    pub fn upstream_timeout(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.upstream_timeout)
    }

    pub fn pool_idle_timeout(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.pool_idle_timeout)
    }
}

fn default_poll_interval() -> String {
    "10s".to_string()
}

/// Remote definition source polled over HTTP. The endpoint returns a JSON
/// array of [`ApiDefinition`].
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct RemoteSourceConfig {
    pub url: String,
    #[serde(default = "default_poll_interval")]
    pub poll_interval: String,
}

impl RemoteSourceConfig {
    pub fn poll_interval(&self) -> Result<Duration, humantime::DurationError> {
        humantime::parse_duration(&self.poll_interval)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default)]
    pub log: LogConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
    #[serde(default)]
    pub source: Option<RemoteSourceConfig>,
    #[serde(default)]
    pub apis: Vec<ApiDefinition>,
}

impl ServerConfig {
    /// Create a new server configuration builder
    pub fn builder() -> ServerConfigBuilder {
        ServerConfigBuilder::default()
    }

    /// APIs that should be routed (inactive ones are kept but not served).
    pub fn active_apis(&self) -> impl Iterator<Item = &ApiDefinition> {
        self.apis.iter().filter(|api| api.active)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            log: LogConfig::default(),
            proxy: ProxyConfig::default(),
            source: None,
            apis: Vec::new(),
        }
    }
}

/// Builder for ServerConfig to allow for cleaner configuration creation
#[derive(Default)]
pub struct ServerConfigBuilder {
    listen_addr: Option<String>,
    log: Option<LogConfig>,
    proxy: Option<ProxyConfig>,
    source: Option<RemoteSourceConfig>,
    apis: Vec<ApiDefinition>,
}

impl ServerConfigBuilder {
    /// Set the listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.listen_addr = Some(addr.into());
        self
    }

    pub fn log(mut self, log: LogConfig) -> Self {
        self.log = Some(log);
        self
    }

    pub fn proxy(mut self, proxy: ProxyConfig) -> Self {
        self.proxy = Some(proxy);
        self
    }

    /// Poll definitions from a remote URL instead of the config file
    pub fn source(mut self, source: RemoteSourceConfig) -> Self {
        self.source = Some(source);
        self
    }

    /// Add an API definition
    pub fn api(mut self, api: ApiDefinition) -> Self {
        self.apis.push(api);
        self
    }

    /// Build the final ServerConfig
    pub fn build(self) -> ServerConfig {
        ServerConfig {
            listen_addr: self.listen_addr.unwrap_or_else(default_listen_addr),
            log: self.log.unwrap_or_default(),
            proxy: self.proxy.unwrap_or_default(),
            source: self.source,
            apis: self.apis,
        }
    }
}
