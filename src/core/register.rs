//! The live route table.
//!
//! A [`Register`] binds routes to a `matchit` router and dispatches inbound
//! requests to them. The table is copy-on-write: writers clone it, mutate the
//! clone and publish it with a single atomic store, so dispatch never takes a
//! lock and never sees a half-applied change. Writers are serialized by a
//! mutex, which makes `add`/`remove` safe to call while serving.
//!
//! Every route owns a slot whose handler is registered once. Adding a route
//! whose listen path already exists swaps the slot content in place, so the
//! endpoints keep pointing at the same handler and always dispatch to the
//! current definition. The matchit routers are recompiled from the live
//! endpoint patterns on every update, so removed patterns free their place.
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
};

use arc_swap::ArcSwap;
use axum::body::Body as AxumBody;
use http::{HeaderValue, Method, StatusCode, header};
use hyper::{Request, Response};
use thiserror::Error;

use crate::core::{
    balancer::BalancerError,
    director::{Director, RouteParams},
    matcher::ListenPathMatcher,
    proxy::{ProxyContext, ReverseProxy, json_error},
    route::{Handler, Route},
};

const TAIL_PARAM: &str = "__tail";
const TAIL_SEGMENT: &str = "/{*__tail}";

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RegisterError {
    #[error("route {listen_path}: {source}")]
    Balancer {
        listen_path: String,
        #[source]
        source: BalancerError,
    },

    #[error("route {listen_path}: invalid method '{method}'")]
    InvalidMethod { listen_path: String, method: String },

    #[error("pattern {pattern} can not be registered: {message}")]
    Conflict { pattern: String, message: String },
}

#[derive(Clone)]
struct Binding {
    // listen path of the route owning the binding; None for raw handlers
    owner: Option<String>,
    handler: Handler,
}

/// Handlers bound to one router pattern. Several routes may share a pattern
/// (`/a` and the prefix of `/a/*`); the most recently bound one answers and
/// releasing it uncovers the previous one.
#[derive(Clone, Default)]
struct Endpoint {
    methods: HashMap<Method, Vec<Binding>>,
    any: Vec<Binding>,
}

impl Endpoint {
    fn is_empty(&self) -> bool {
        self.methods.is_empty() && self.any.is_empty()
    }

    fn binding_for(&self, method: &Method) -> Option<&Binding> {
        self.methods
            .get(method)
            .and_then(|bindings| bindings.last())
            .or_else(|| self.any.last())
    }

    fn release(&mut self, owner: &str) {
        let owned = |binding: &Binding| binding.owner.as_deref() == Some(owner);
        for bindings in self.methods.values_mut() {
            bindings.retain(|binding| !owned(binding));
        }
        self.methods.retain(|_, bindings| !bindings.is_empty());
        self.any.retain(|binding| !owned(binding));
    }

    fn allow_header(&self) -> String {
        let mut methods: Vec<&str> = self.methods.keys().map(Method::as_str).collect();
        methods.sort_unstable();
        methods.join(", ")
    }
}

struct CompiledRoute {
    route: Arc<Route>,
    handler: Handler,
}

struct RouteSlot {
    compiled: ArcSwap<CompiledRoute>,
    methods: Option<HashSet<Method>>,
}

/// Routers compiled from the live endpoint patterns. Catch-alls live apart
/// because matchit refuses a catch-all next to a parameter segment.
struct Routers {
    exact: matchit::Router<String>,
    tails: matchit::Router<String>,
}

impl Routers {
    fn build<'a>(patterns: impl Iterator<Item = &'a String>) -> Result<Self, RegisterError> {
        let mut routers = Self {
            exact: matchit::Router::new(),
            tails: matchit::Router::new(),
        };
        for pattern in patterns {
            let router = if pattern.ends_with(TAIL_SEGMENT) {
                &mut routers.tails
            } else {
                &mut routers.exact
            };
            router
                .insert(pattern.as_str(), pattern.clone())
                .map_err(|e| RegisterError::Conflict {
                    pattern: pattern.clone(),
                    message: e.to_string(),
                })?;
        }
        Ok(routers)
    }
}

#[derive(Clone)]
struct RouteTable {
    routers: Arc<Routers>,
    endpoints: BTreeMap<String, Endpoint>,
    routes: HashMap<String, Arc<RouteSlot>>,
    // in-place replacements, applied when the table is published
    pending: Vec<(Arc<RouteSlot>, Arc<CompiledRoute>)>,
}

impl Default for RouteTable {
    fn default() -> Self {
        Self {
            routers: Arc::new(Routers {
                exact: matchit::Router::new(),
                tails: matchit::Router::new(),
            }),
            endpoints: BTreeMap::new(),
            routes: HashMap::new(),
            pending: Vec::new(),
        }
    }
}

impl RouteTable {
    fn bind(&mut self, pattern: &str, methods: Option<&HashSet<Method>>, binding: Binding) {
        let endpoint = self.endpoints.entry(pattern.to_string()).or_default();
        match methods {
            Some(methods) => {
                for method in methods {
                    endpoint
                        .methods
                        .entry(method.clone())
                        .or_default()
                        .push(binding.clone());
                }
            }
            None => endpoint.any.push(binding),
        }
    }

    fn release(&mut self, owner: &str) {
        for endpoint in self.endpoints.values_mut() {
            endpoint.release(owner);
        }
        self.endpoints.retain(|_, endpoint| !endpoint.is_empty());
    }

    /// Recompile the routers from the current endpoints.
    fn rebuild(&mut self) -> Result<(), RegisterError> {
        self.routers = Arc::new(Routers::build(self.endpoints.keys())?);
        Ok(())
    }

    fn lookup(&self, path: &str) -> Option<(&Endpoint, RouteParams)> {
        let routers = &self.routers;
        let found = routers
            .exact
            .at(path)
            .or_else(|_| routers.tails.at(path))
            .ok()
            .or_else(|| {
                // "/posts/" falls back to "/posts"
                let trimmed = path.strip_suffix('/').filter(|p| !p.is_empty())?;
                routers.exact.at(trimmed).ok()
            })?;
        let endpoint = self.endpoints.get(found.value)?;
        let params = found
            .params
            .iter()
            .filter(|(name, _)| *name != TAIL_PARAM)
            .collect();
        Some((endpoint, params))
    }

    fn add(&mut self, route: Route, context: &ProxyContext) -> Result<(), RegisterError> {
        let listen_path = route.listen_path().to_string();
        let methods = parse_methods(&route)?;
        let compiled = compile(route, context)?;

        if let Some(slot) = self.routes.get(&listen_path).cloned() {
            if slot.methods == methods {
                self.pending.push((slot, Arc::new(compiled)));
                return Ok(());
            }
            self.release(&listen_path);
        }

        let slot = Arc::new(RouteSlot {
            compiled: ArcSwap::from_pointee(compiled),
            methods,
        });
        self.bind_slot(&listen_path, &slot);
        self.routes.insert(listen_path, slot);
        Ok(())
    }

    fn bind_slot(&mut self, listen_path: &str, slot: &Arc<RouteSlot>) {
        let handler = slot_handler(slot.clone());
        for pattern in patterns_for(listen_path) {
            self.bind(
                &pattern,
                slot.methods.as_ref(),
                Binding {
                    owner: Some(listen_path.to_string()),
                    handler: handler.clone(),
                },
            );
        }
    }

    fn remove(&mut self, listen_path: &str) -> bool {
        let removed = self.routes.remove(listen_path).is_some();
        self.release(listen_path);
        removed
    }
}

fn parse_methods(route: &Route) -> Result<Option<HashSet<Method>>, RegisterError> {
    if route.definition.accepts_all_methods() {
        return Ok(None);
    }
    route
        .definition
        .methods
        .iter()
        .map(|m| {
            Method::from_bytes(m.to_ascii_uppercase().as_bytes()).map_err(|_| {
                RegisterError::InvalidMethod {
                    listen_path: route.listen_path().to_string(),
                    method: m.clone(),
                }
            })
        })
        .collect::<Result<HashSet<_>, _>>()
        .map(Some)
}

fn compile(route: Route, context: &ProxyContext) -> Result<CompiledRoute, RegisterError> {
    let director = Director::new(Arc::new(route.definition.clone()), context.stats.clone())
        .map_err(|source| RegisterError::Balancer {
            listen_path: route.listen_path().to_string(),
            source,
        })?;
    let proxy = ReverseProxy::new(director, route.transport(context.transport.clone()));
    let handler = route.compose(proxy.into_handler());
    Ok(CompiledRoute {
        route: Arc::new(route),
        handler,
    })
}

// Dispatches to whatever the slot holds at call time.
fn slot_handler(slot: Arc<RouteSlot>) -> Handler {
    Arc::new(move |req: Request<AxumBody>| {
        let handler = slot.compiled.load().handler.clone();
        handler(req)
    })
}

/// Router patterns for a listen path: the literal prefix and a catch-all
/// beneath it for wildcard paths, the path itself otherwise.
fn patterns_for(listen_path: &str) -> Vec<String> {
    let matcher = ListenPathMatcher::new();
    if !matcher.matches(listen_path) {
        return vec![listen_path.to_string()];
    }
    let prefix = matcher.extract(listen_path);
    let literal = if prefix.is_empty() {
        "/".to_string()
    } else {
        prefix.clone()
    };
    vec![literal, format!("{prefix}{TAIL_SEGMENT}")]
}

/// Hot-swappable table of routes bound to a router.
pub struct Register {
    table: ArcSwap<RouteTable>,
    write: Mutex<()>,
    context: ProxyContext,
}

impl Register {
    pub fn new(context: ProxyContext) -> Self {
        Self {
            table: ArcSwap::from_pointee(RouteTable::default()),
            write: Mutex::new(()),
            context,
        }
    }

    /// Publish a modified copy of the table. Nothing is published on error.
    fn update<F>(&self, f: F) -> Result<(), RegisterError>
    where
        F: FnOnce(&mut RouteTable, &ProxyContext) -> Result<(), RegisterError>,
    {
        let _guard = self.write.lock().unwrap_or_else(PoisonError::into_inner);
        let mut table = RouteTable::clone(&self.table.load());
        f(&mut table, &self.context)?;
        table.rebuild()?;
        for (slot, compiled) in table.pending.drain(..) {
            slot.compiled.store(compiled);
        }
        self.table.store(Arc::new(table));
        Ok(())
    }

    /// Register `route`, replacing in place any route with the same listen
    /// path.
    pub fn add(&self, route: Route) -> Result<(), RegisterError> {
        tracing::debug!(listen_path = %route.listen_path(), "Registering route");
        self.update(|table, context| table.add(route, context))
    }

    /// Register every route in one table update.
    pub fn add_many(&self, routes: impl IntoIterator<Item = Route>) -> Result<(), RegisterError> {
        self.update(|table, context| {
            routes
                .into_iter()
                .try_for_each(|route| table.add(route, context))
        })
    }

    pub fn exists(&self, listen_path: &str) -> bool {
        self.table.load().routes.contains_key(listen_path)
    }

    /// The route currently registered under `listen_path`.
    pub fn get(&self, listen_path: &str) -> Option<Arc<Route>> {
        self.table
            .load()
            .routes
            .get(listen_path)
            .map(|slot| slot.compiled.load().route.clone())
    }

    /// Unregister a route. Returns false when nothing was registered.
    pub fn remove(&self, listen_path: &str) -> bool {
        let mut removed = false;
        let result = self.update(|table, _| {
            removed = table.remove(listen_path);
            Ok(())
        });
        if let Err(e) = result {
            tracing::error!(listen_path, "Failed to remove route: {}", e);
            return false;
        }
        removed
    }

    /// Register a plain handler for one method.
    pub fn handle(
        &self,
        method: Method,
        pattern: &str,
        handler: Handler,
    ) -> Result<(), RegisterError> {
        let methods = HashSet::from([method]);
        self.update(|table, _| {
            for p in patterns_for(pattern) {
                table.bind(
                    &p,
                    Some(&methods),
                    Binding {
                        owner: None,
                        handler: handler.clone(),
                    },
                );
            }
            Ok(())
        })
    }

    /// Register a plain handler for every method.
    pub fn any(&self, pattern: &str, handler: Handler) -> Result<(), RegisterError> {
        self.update(|table, _| {
            for p in patterns_for(pattern) {
                table.bind(
                    &p,
                    None,
                    Binding {
                        owner: None,
                        handler: handler.clone(),
                    },
                );
            }
            Ok(())
        })
    }

    /// Number of router patterns with at least one handler bound.
    pub fn routes_count(&self) -> usize {
        self.table.load().endpoints.len()
    }

    /// Listen paths of every registered route.
    pub fn listen_paths(&self) -> Vec<String> {
        let mut paths: Vec<String> = self.table.load().routes.keys().cloned().collect();
        paths.sort();
        paths
    }

    /// Dispatch `req` to the handler bound for its path and method.
    pub async fn serve(&self, mut req: Request<AxumBody>) -> Response<AxumBody> {
        let handler = {
            let table = self.table.load();
            let Some((endpoint, params)) = table.lookup(req.uri().path()) else {
                return json_error(StatusCode::NOT_FOUND, "no route found");
            };
            match endpoint.binding_for(req.method()) {
                Some(binding) => {
                    req.extensions_mut().insert(params);
                    binding.handler.clone()
                }
                None => {
                    let mut response =
                        json_error(StatusCode::METHOD_NOT_ALLOWED, "method not allowed");
                    if let Ok(allow) = HeaderValue::from_str(&endpoint.allow_header()) {
                        response.headers_mut().insert(header::ALLOW, allow);
                    }
                    return response;
                }
            }
        };
        handler(req).await
    }
}
