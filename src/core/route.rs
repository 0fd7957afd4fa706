//! Routes and handler composition.
//!
//! A [`Handler`] is the unit the register dispatches to. [`Middleware`]
//! decorates a handler; a route folds its middleware list around the
//! reverse-proxy handler so that the first middleware is the outermost.
use std::{fmt, future::Future, sync::Arc};

use axum::body::Body as AxumBody;
use futures_util::future::BoxFuture;
use http::{StatusCode, header};
use hyper::{Request, Response};

use crate::{
    config::Definition,
    core::{
        proxy::json_error,
        shackles::{InLink, OutLink, Shackles},
    },
    ports::http_client::HttpClient,
};

pub type Handler =
    Arc<dyn Fn(Request<AxumBody>) -> BoxFuture<'static, Response<AxumBody>> + Send + Sync>;

pub type Middleware = Arc<dyn Fn(Handler) -> Handler + Send + Sync>;

/// Build a [`Handler`] from an async function.
pub fn handler_fn<F, Fut>(f: F) -> Handler
where
    F: Fn(Request<AxumBody>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response<AxumBody>> + Send + 'static,
{
    Arc::new(move |req| Box::pin(f(req)))
}

/// Build a [`Middleware`] from a handler decorator.
pub fn middleware_fn<F>(f: F) -> Middleware
where
    F: Fn(Handler) -> Handler + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Request/response links applied at the transport level.
#[derive(Clone, Default)]
pub struct TransportLinks {
    pub in_links: Vec<InLink>,
    pub out_links: Vec<OutLink>,
}

impl TransportLinks {
    pub fn is_empty(&self) -> bool {
        self.in_links.is_empty() && self.out_links.is_empty()
    }
}

/// A definition plus the middleware and transport links attached to it.
#[derive(Clone)]
pub struct Route {
    pub definition: Definition,
    pub inbound: Vec<Middleware>,
    pub outbound: TransportLinks,
}

impl Route {
    pub fn new(definition: Definition) -> Self {
        Self {
            definition,
            inbound: Vec::new(),
            outbound: TransportLinks::default(),
        }
    }

    pub fn listen_path(&self) -> &str {
        &self.definition.listen_path
    }

    pub fn with_middleware(mut self, middleware: Middleware) -> Self {
        self.inbound.push(middleware);
        self
    }

    pub fn with_in_link(mut self, link: InLink) -> Self {
        self.outbound.in_links.push(link);
        self
    }

    pub fn with_out_link(mut self, link: OutLink) -> Self {
        self.outbound.out_links.push(link);
        self
    }

    /// Fold the middleware around `innermost`, outermost first. A host filter
    /// wraps everything when the definition restricts hosts.
    pub fn compose(&self, innermost: Handler) -> Handler {
        let handler = self
            .inbound
            .iter()
            .rev()
            .fold(innermost, |next, middleware| middleware(next));

        if self.definition.hosts.is_empty() {
            handler
        } else {
            host_filter(self.definition.hosts.clone(), handler)
        }
    }

    /// The transport for this route: `base`, or `base` wrapped in the route's
    /// links.
    pub fn transport(&self, base: Arc<dyn HttpClient>) -> Arc<dyn HttpClient> {
        if self.outbound.is_empty() {
            return base;
        }
        Arc::new(
            Shackles::new(base)
                .with_in_links(self.outbound.in_links.iter().cloned())
                .with_out_links(self.outbound.out_links.iter().cloned()),
        )
    }
}

impl fmt::Debug for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Route")
            .field("definition", &self.definition)
            .field("inbound", &self.inbound.len())
            .field("in_links", &self.outbound.in_links.len())
            .field("out_links", &self.outbound.out_links.len())
            .finish()
    }
}

fn host_filter(hosts: Vec<String>, next: Handler) -> Handler {
    let hosts = Arc::new(hosts);
    handler_fn(move |req: Request<AxumBody>| {
        let allowed = request_host(&req)
            .is_some_and(|host| hosts.iter().any(|h| h.eq_ignore_ascii_case(&host)));
        let next = next.clone();
        async move {
            if allowed {
                next(req).await
            } else {
                json_error(StatusCode::NOT_FOUND, "no route for host")
            }
        }
    })
}

/// Host of the request without its port.
fn request_host(req: &Request<AxumBody>) -> Option<String> {
    let raw = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| req.uri().host())?;

    let host = if raw.starts_with('[') {
        raw.split_inclusive(']').next().unwrap_or(raw)
    } else {
        raw.split(':').next().unwrap_or(raw)
    };
    Some(host.to_string())
}
