pub mod balancer;
pub mod director;
pub mod gateway;
pub mod matcher;
pub mod plugin;
pub mod proxy;
pub mod register;
pub mod route;
pub mod shackles;

#[cfg(test)]
pub(crate) mod testing;

pub use balancer::{Balancer, BalancerError, BalancerFactory};
pub use director::{Director, DirectorError, RouteParams};
pub use gateway::{GatewayError, GatewayService};
pub use plugin::{PluginChain, PluginError, PluginRegistry};
pub use proxy::{ProxyContext, ReverseProxy};
pub use register::{Register, RegisterError};
pub use route::{Handler, Middleware, Route, handler_fn, middleware_fn};
pub use shackles::{InLink, LinkError, OutLink, Shackles};
