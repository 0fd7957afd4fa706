//! Core gateway orchestration service.
//!
//! The `GatewayService` owns the active [`Register`] and rebuilds it whenever
//! the definition set changes. A rebuild constructs a brand-new register off
//! to the side from the full set of active API definitions and publishes it
//! with a single atomic swap:
//! * in-flight requests finish on the register they started with
//! * requests arriving after the swap see the complete new table
//! * a failed rebuild leaves the active register untouched
//!
//! Request dispatch only loads the current register; it never blocks on, or
//! is blocked by, a reload.
use std::sync::Arc;

use arc_swap::ArcSwap;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

use crate::{
    config::ApiDefinition,
    core::{
        plugin::{PluginError, PluginRegistry},
        proxy::ProxyContext,
        register::{Register, RegisterError},
        route::Route,
    },
};

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum GatewayError {
    #[error("api '{api}': {source}")]
    Plugin {
        api: String,
        #[source]
        source: PluginError,
    },

    #[error(transparent)]
    Register(#[from] RegisterError),
}

/// Central orchestrator holding the active route table.
pub struct GatewayService {
    register: ArcSwap<Register>,
    context: ProxyContext,
    plugins: PluginRegistry,
}

impl GatewayService {
    /// A gateway with an empty route table.
    pub fn new(context: ProxyContext, plugins: PluginRegistry) -> Self {
        let register = Register::new(context.clone());
        Self {
            register: ArcSwap::from_pointee(register),
            context,
            plugins,
        }
    }

    /// Build a register for `apis` without activating it. Inactive APIs are
    /// skipped.
    pub fn build_register(&self, apis: &[ApiDefinition]) -> Result<Register, GatewayError> {
        let routes = apis
            .iter()
            .filter(|api| api.active)
            .map(|api| self.route_for(api))
            .collect::<Result<Vec<_>, _>>()?;

        let register = Register::new(self.context.clone());
        register.add_many(routes)?;
        Ok(register)
    }

    fn route_for(&self, api: &ApiDefinition) -> Result<Route, GatewayError> {
        let definition = &api.proxy;
        if !definition.enable_load_balancing && definition.upstreams.targets.len() > 1 {
            tracing::warn!(
                api = %api.name,
                targets = definition.upstreams.targets.len(),
                "Load balancing disabled, only the first target receives traffic"
            );
        }

        let chain = self
            .plugins
            .build(&api.plugins)
            .map_err(|source| GatewayError::Plugin {
                api: api.name.clone(),
                source,
            })?;
        Ok(chain.apply(Route::new(definition.clone())))
    }

    /// Rebuild the route table from `apis` and make it active. Returns the
    /// number of routes now served.
    pub fn reload(&self, apis: &[ApiDefinition]) -> Result<usize, GatewayError> {
        let register = self.build_register(apis)?;
        let routes = register.listen_paths().len();
        self.register.store(Arc::new(register));

        crate::metrics::set_routes(routes);
        tracing::info!(routes, "Route table rebuilt");
        Ok(routes)
    }

    /// The register currently serving requests.
    pub fn register(&self) -> Arc<Register> {
        self.register.load_full()
    }

    /// Dispatch through the active register.
    pub async fn handle(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let register = self.register.load_full();
        register.serve(req).await
    }
}
