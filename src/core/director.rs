//! Request rewriting towards an elected upstream.
//!
//! The [`Director`] turns a request matched by a route into the request sent
//! to the upstream: it elects a target, computes the upstream path according
//! to the route's strip/append flags, interpolates `{name}` placeholders with
//! the values captured by the router, merges query strings and fixes the Host
//! header. It never performs I/O.
use std::sync::Arc;

use http::{HeaderValue, Request, Uri, header};
use thiserror::Error;
use url::Url;

use crate::{
    config::{Definition, Target},
    core::{
        balancer::{Balancer, BalancerError, BalancerFactory},
        matcher::{ListenPathMatcher, ParamNameExtractor},
    },
    ports::stats_client::{StatsClient, UpstreamEvent},
};

/// Named path segments captured by the router for the matched listen path.
///
/// Inserted as a request extension before the route handler runs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteParams(Vec<(String, String)>);

impl RouteParams {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.0.push((name.into(), value.into()));
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RouteParams {
    fn from_iter<T: IntoIterator<Item = (K, V)>>(iter: T) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Errors that abort a rewrite. The proxy answers them with 502.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum DirectorError {
    #[error("failed to elect an upstream: {0}")]
    Election(#[from] BalancerError),

    #[error("invalid upstream target '{url}': {reason}")]
    InvalidTarget { url: String, reason: String },

    #[error("failed to build upstream request: {0}")]
    Request(String),
}

/// A `{name}` placeholder had no captured value.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("no value captured for path parameter '{0}'")]
pub struct ParamError(pub String);

/// Rewrites matched requests for one route.
pub struct Director {
    definition: Arc<Definition>,
    balancer: Box<dyn Balancer>,
    stats: Arc<dyn StatsClient>,
}

impl Director {
    /// Build a director for `definition`. The balancing algorithm is resolved
    /// here so an unknown name fails before any request is served.
    pub fn new(
        definition: Arc<Definition>,
        stats: Arc<dyn StatsClient>,
    ) -> Result<Self, BalancerError> {
        let balancer = BalancerFactory::create(&definition.upstreams.balancing)?;
        Ok(Self {
            definition,
            balancer,
            stats,
        })
    }

    pub fn definition(&self) -> &Definition {
        &self.definition
    }

    fn elect(&self) -> Result<&Target, BalancerError> {
        let targets = &self.definition.upstreams.targets;
        if self.definition.enable_load_balancing {
            self.balancer.elect(targets)
        } else {
            targets.first().ok_or(BalancerError::EmptyBackendList)
        }
    }

    /// Rewrite `req` in place so that its URI points at the elected upstream.
    pub fn direct<B>(&self, req: &mut Request<B>) -> Result<(), DirectorError> {
        let target = self.elect()?;
        let url = Url::parse(&target.url).map_err(|e| DirectorError::InvalidTarget {
            url: target.url.clone(),
            reason: e.to_string(),
        })?;
        let host = url.host_str().ok_or_else(|| DirectorError::InvalidTarget {
            url: target.url.clone(),
            reason: "missing host".to_string(),
        })?;
        let authority = match url.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };

        let params = req
            .extensions()
            .get::<RouteParams>()
            .cloned()
            .unwrap_or_default();
        let path = rewrite_path(
            &self.definition,
            &target_path(&url),
            req.uri().path(),
            &params,
        );
        let query = join_query(url.query(), req.uri().query());
        let path_and_query = if query.is_empty() {
            path
        } else {
            format!("{path}?{query}")
        };

        let upstream = Uri::builder()
            .scheme(url.scheme())
            .authority(authority.as_str())
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| DirectorError::Request(e.to_string()))?;

        if !self.definition.preserve_host {
            let value = HeaderValue::from_str(&authority)
                .map_err(|e| DirectorError::Request(e.to_string()))?;
            req.headers_mut().insert(header::HOST, value);
        } else if !req.headers().contains_key(header::HOST) {
            // HTTP/2 carries the host in the :authority pseudo header
            if let Some(value) = req
                .uri()
                .authority()
                .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            {
                req.headers_mut().insert(header::HOST, value);
            }
        }

        self.stats.track_upstream(&UpstreamEvent {
            inbound_uri: req.uri().to_string(),
            upstream_host: authority,
            listen_path: self.definition.listen_path.clone(),
            method: req.method().to_string(),
        });

        tracing::debug!(
            listen_path = %self.definition.listen_path,
            inbound = %req.uri(),
            upstream = %upstream,
            "Rewrote request"
        );
        *req.uri_mut() = upstream;
        Ok(())
    }
}

// url percent-encodes braces in paths; placeholders need them back.
fn target_path(url: &Url) -> String {
    url.path().replace("%7B", "{").replace("%7D", "}")
}

/// Compute the upstream path for `request_path` matched by `definition`
/// against a target whose own path is `target_path`.
pub fn rewrite_path(
    definition: &Definition,
    target_path: &str,
    request_path: &str,
    params: &RouteParams,
) -> String {
    let literal = ListenPathMatcher::new().extract(&definition.listen_path);
    let prefix = interpolate(&literal, params).unwrap_or(literal);

    let path = if definition.strip_path {
        let mut path = single_joining_slash(target_path, request_path).replacen(&prefix, "", 1);
        if !target_path.ends_with('/') && path.ends_with('/') {
            path.pop();
        }
        path
    } else if definition.append_path {
        let rest = request_path
            .strip_prefix(prefix.as_str())
            .unwrap_or(request_path);
        if rest.is_empty() {
            target_path.to_string()
        } else {
            single_joining_slash(target_path, rest)
        }
    } else {
        target_path.to_string()
    };

    let path = match interpolate(&path, params) {
        Ok(path) => path,
        Err(e) => {
            tracing::warn!(
                listen_path = %definition.listen_path,
                path = %path,
                error = %e,
                "Path parameter interpolation failed, using literal path"
            );
            path
        }
    };

    if path.starts_with('/') {
        path
    } else {
        format!("/{path}")
    }
}

/// Replace every `{name}` in `path` with its captured value. All or nothing.
pub fn interpolate(path: &str, params: &RouteParams) -> Result<String, ParamError> {
    let names = ParamNameExtractor::new().extract(path);
    let mut out = path.to_string();
    for name in names {
        let value = params.get(&name).ok_or_else(|| ParamError(name.clone()))?;
        out = out.replace(&format!("{{{name}}}"), value);
    }
    Ok(out)
}

/// Join two path fragments with exactly one slash between them.
pub fn single_joining_slash(a: &str, b: &str) -> String {
    match (a.ends_with('/'), b.starts_with('/')) {
        (true, true) => format!("{a}{}", &b[1..]),
        (false, false) => format!("{a}/{b}"),
        _ => format!("{a}{b}"),
    }
}

fn join_query(target: Option<&str>, inbound: Option<&str>) -> String {
    match (target.unwrap_or(""), inbound.unwrap_or("")) {
        ("", inbound) => inbound.to_string(),
        (target, "") => target.to_string(),
        (target, inbound) => format!("{target}&{inbound}"),
    }
}
