//! Plugin registry.
//!
//! Plugins are looked up by name in an explicitly constructed
//! [`PluginRegistry`] and turn their JSON configuration into a
//! [`PluginChain`]: handler middleware plus transport links. The registry is
//! passed to whoever builds routes; there is no global registration.
use std::{collections::HashMap, fmt, sync::Arc};

use serde::de::DeserializeOwned;
use thiserror::Error;

use crate::{
    config::PluginConfig,
    core::{
        route::{Middleware, Route},
        shackles::{InLink, OutLink},
    },
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum PluginError {
    #[error("unknown plugin '{0}'")]
    Unknown(String),

    #[error("invalid configuration for plugin '{name}': {message}")]
    InvalidConfig { name: String, message: String },
}

/// What a plugin contributes to a route.
#[derive(Clone, Default)]
pub struct PluginChain {
    pub middleware: Vec<Middleware>,
    pub in_links: Vec<InLink>,
    pub out_links: Vec<OutLink>,
}

impl PluginChain {
    pub fn middleware(middleware: Middleware) -> Self {
        Self {
            middleware: vec![middleware],
            ..Self::default()
        }
    }

    pub fn in_link(link: InLink) -> Self {
        Self {
            in_links: vec![link],
            ..Self::default()
        }
    }

    pub fn out_link(link: OutLink) -> Self {
        Self {
            out_links: vec![link],
            ..Self::default()
        }
    }

    pub fn extend(&mut self, other: PluginChain) {
        self.middleware.extend(other.middleware);
        self.in_links.extend(other.in_links);
        self.out_links.extend(other.out_links);
    }

    /// Attach the chain to `route`, after whatever it already carries.
    pub fn apply(self, mut route: Route) -> Route {
        route.inbound.extend(self.middleware);
        route.outbound.in_links.extend(self.in_links);
        route.outbound.out_links.extend(self.out_links);
        route
    }
}

pub type PluginConstructor =
    Arc<dyn Fn(&serde_json::Value) -> Result<PluginChain, PluginError> + Send + Sync>;

/// Name to constructor map.
#[derive(Clone, Default)]
pub struct PluginRegistry {
    constructors: HashMap<String, PluginConstructor>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: impl Into<String>, constructor: F)
    where
        F: Fn(&serde_json::Value) -> Result<PluginChain, PluginError> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
    }

    pub fn with<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&serde_json::Value) -> Result<PluginChain, PluginError> + Send + Sync + 'static,
    {
        self.register(name, constructor);
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Build the combined chain of every enabled plugin, in order.
    pub fn build(&self, plugins: &[PluginConfig]) -> Result<PluginChain, PluginError> {
        let mut chain = PluginChain::default();
        for plugin in plugins.iter().filter(|p| p.enabled) {
            let constructor = self
                .constructors
                .get(&plugin.name)
                .ok_or_else(|| PluginError::Unknown(plugin.name.clone()))?;
            chain.extend(constructor(&plugin.config)?);
        }
        Ok(chain)
    }
}

impl fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("plugins", &self.names())
            .finish()
    }
}

/// Deserialize a plugin configuration; `null` yields the default.
pub fn parse_config<T>(name: &str, value: &serde_json::Value) -> Result<T, PluginError>
where
    T: DeserializeOwned + Default,
{
    if value.is_null() {
        return Ok(T::default());
    }
    serde_json::from_value(value.clone()).map_err(|e| PluginError::InvalidConfig {
        name: name.to_string(),
        message: e.to_string(),
    })
}
