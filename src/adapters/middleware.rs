//! Built-in plugins.
//!
//! Handler middleware (`request_id`, `cors`, `security_headers`) wraps the
//! route handler and runs before the request is directed upstream. The header
//! rewriting plugins (`request_headers`, `response_headers`) are transport
//! links: they see the request after rewriting and the raw upstream response.
use std::{collections::HashMap, sync::Arc};

use axum::body::Body as AxumBody;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, header};
use hyper::{Request, Response};
use serde::{Deserialize, Serialize};
use tracing::Instrument;

use crate::{
    config::HeaderActions,
    core::{
        plugin::{PluginChain, PluginRegistry, parse_config},
        route::{Handler, Middleware, handler_fn, middleware_fn},
        shackles::{InLink, OutLink},
    },
};

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Registry holding every built-in plugin.
pub fn builtin_plugins() -> PluginRegistry {
    PluginRegistry::new()
        .with("request_id", |_| {
            Ok(PluginChain::middleware(request_id_middleware()))
        })
        .with("cors", |value| {
            let config: CorsConfig = parse_config("cors", value)?;
            Ok(PluginChain::middleware(cors_middleware(config)))
        })
        .with("security_headers", |_| {
            Ok(PluginChain::middleware(security_headers_middleware()))
        })
        .with("request_headers", |value| {
            let actions: HeaderActions = parse_config("request_headers", value)?;
            Ok(PluginChain::in_link(request_headers_link(actions)))
        })
        .with("response_headers", |value| {
            let actions: HeaderActions = parse_config("response_headers", value)?;
            Ok(PluginChain::out_link(response_headers_link(actions)))
        })
}

/// Tag each request with an id (kept when the caller sent one), expose it to
/// the upstream and in the response, and run the rest of the chain inside a
/// span carrying it.
pub fn request_id_middleware() -> Middleware {
    middleware_fn(|next: Handler| {
        handler_fn(move |mut req: Request<AxumBody>| {
            let request_id = req
                .headers()
                .get(REQUEST_ID_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            let value = HeaderValue::from_str(&request_id).ok();
            if let Some(value) = &value {
                req.headers_mut().insert(REQUEST_ID_HEADER, value.clone());
            }

            let span = tracing::info_span!("request_id", request.id = %request_id);
            let next = next.clone();
            async move {
                let mut response = next(req).await;
                if let Some(value) = value {
                    response.headers_mut().insert(REQUEST_ID_HEADER, value);
                }
                response
            }
            .instrument(span)
        })
    })
}

fn default_allow_methods() -> String {
    "GET, POST, PUT, DELETE, OPTIONS".to_string()
}

fn default_allow_headers() -> String {
    "Content-Type, Authorization, X-Requested-With".to_string()
}

fn default_max_age() -> u64 {
    86400
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CorsConfig {
    /// Origins allowed to call; empty reflects any caller origin.
    #[serde(default)]
    pub allowed_origins: Vec<String>,
    #[serde(default = "default_allow_methods")]
    pub allowed_methods: String,
    #[serde(default = "default_allow_headers")]
    pub allowed_headers: String,
    #[serde(default = "default_max_age")]
    pub max_age: u64,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            allowed_origins: Vec::new(),
            allowed_methods: default_allow_methods(),
            allowed_headers: default_allow_headers(),
            max_age: default_max_age(),
        }
    }
}

impl CorsConfig {
    fn allows(&self, origin: &HeaderValue) -> bool {
        self.allowed_origins.is_empty()
            || origin
                .to_str()
                .is_ok_and(|o| self.allowed_origins.iter().any(|a| a == o || a == "*"))
    }

    fn decorate(&self, headers: &mut HeaderMap, origin: HeaderValue) {
        headers.insert(header::ACCESS_CONTROL_ALLOW_ORIGIN, origin);
        headers.append(header::VARY, HeaderValue::from_static("Origin"));
        if let Ok(methods) = HeaderValue::from_str(&self.allowed_methods) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_METHODS, methods);
        }
        if let Ok(allowed) = HeaderValue::from_str(&self.allowed_headers) {
            headers.insert(header::ACCESS_CONTROL_ALLOW_HEADERS, allowed);
        }
        headers.insert(header::ACCESS_CONTROL_MAX_AGE, HeaderValue::from(self.max_age));
    }
}

/// Answer preflight requests directly and add CORS headers to responses for
/// allowed origins.
pub fn cors_middleware(config: CorsConfig) -> Middleware {
    let config = Arc::new(config);
    middleware_fn(move |next: Handler| {
        let config = config.clone();
        handler_fn(move |req: Request<AxumBody>| {
            let origin = req
                .headers()
                .get(header::ORIGIN)
                .filter(|o| config.allows(o))
                .cloned();
            let preflight = req.method() == Method::OPTIONS
                && req
                    .headers()
                    .contains_key(header::ACCESS_CONTROL_REQUEST_METHOD);
            let config = config.clone();
            let next = next.clone();
            async move {
                let mut response = if preflight {
                    let mut response = Response::new(AxumBody::empty());
                    *response.status_mut() = StatusCode::NO_CONTENT;
                    response
                } else {
                    next(req).await
                };
                if let Some(origin) = origin {
                    config.decorate(response.headers_mut(), origin);
                }
                response
            }
        })
    })
}

/// Add common security hardening headers without overwriting upstream ones.
pub fn security_headers_middleware() -> Middleware {
    middleware_fn(|next: Handler| {
        handler_fn(move |req: Request<AxumBody>| {
            let next = next.clone();
            async move {
                let mut response = next(req).await;
                let headers = response.headers_mut();
                for (name, value) in [
                    (header::X_CONTENT_TYPE_OPTIONS, "nosniff"),
                    (header::X_FRAME_OPTIONS, "DENY"),
                    (header::X_XSS_PROTECTION, "1; mode=block"),
                    (header::REFERRER_POLICY, "strict-origin-when-cross-origin"),
                ] {
                    headers
                        .entry(name)
                        .or_insert(HeaderValue::from_static(value));
                }
                response
            }
        })
    })
}

/// Header actions with names and values validated once.
#[derive(Debug, Clone, Default)]
struct CompiledActions {
    add: Vec<(HeaderName, HeaderValue)>,
    remove: Vec<HeaderName>,
}

impl CompiledActions {
    fn new(actions: &HeaderActions) -> Self {
        let add = compile_pairs(&actions.add);
        let remove = actions
            .remove
            .iter()
            .filter_map(|name| match HeaderName::from_bytes(name.as_bytes()) {
                Ok(name) => Some(name),
                Err(_) => {
                    tracing::warn!(header = %name, "Ignoring invalid header name");
                    None
                }
            })
            .collect();
        Self { add, remove }
    }

    fn apply(&self, headers: &mut HeaderMap) {
        for name in &self.remove {
            headers.remove(name);
        }
        for (name, value) in &self.add {
            headers.insert(name.clone(), value.clone());
        }
    }
}

fn compile_pairs(pairs: &HashMap<String, String>) -> Vec<(HeaderName, HeaderValue)> {
    pairs
        .iter()
        .filter_map(|(name, value)| {
            match (
                HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(value),
            ) {
                (Ok(name), Ok(value)) => Some((name, value)),
                _ => {
                    tracing::warn!("Invalid custom header: {} = {}", name, value);
                    None
                }
            }
        })
        .collect()
}

/// Rewrite headers of the request sent upstream.
pub fn request_headers_link(actions: HeaderActions) -> InLink {
    let actions = CompiledActions::new(&actions);
    Arc::new(move |mut req| {
        actions.apply(req.headers_mut());
        Ok(req)
    })
}

/// Rewrite headers of the upstream response.
pub fn response_headers_link(actions: HeaderActions) -> OutLink {
    let actions = CompiledActions::new(&actions);
    Arc::new(move |mut response| {
        actions.apply(response.headers_mut());
        Ok(response)
    })
}
