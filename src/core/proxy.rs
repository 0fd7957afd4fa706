//! The innermost route handler: direct, forward, translate failures.
use std::{net::SocketAddr, sync::Arc};

use axum::{body::Body as AxumBody, extract::ConnectInfo};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode, header};
use hyper::{Request, Response};
use tracing::Instrument;

use crate::{
    core::{
        director::Director,
        route::{Handler, handler_fn},
    },
    ports::{http_client::HttpClient, stats_client::StatsClient},
    tracing_setup::create_backend_span,
};

/// Collaborators shared by every route of a register.
#[derive(Clone)]
pub struct ProxyContext {
    pub transport: Arc<dyn HttpClient>,
    pub stats: Arc<dyn StatsClient>,
}

impl ProxyContext {
    pub fn new(transport: Arc<dyn HttpClient>, stats: Arc<dyn StatsClient>) -> Self {
        Self { transport, stats }
    }
}

const HOP_BY_HOP: [HeaderName; 8] = [
    header::CONNECTION,
    HeaderName::from_static("keep-alive"),
    HeaderName::from_static("proxy-connection"),
    header::PROXY_AUTHENTICATE,
    header::PROXY_AUTHORIZATION,
    header::TE,
    header::TRAILER,
    header::UPGRADE,
];

const X_FORWARDED_FOR: HeaderName = HeaderName::from_static("x-forwarded-for");
const X_FORWARDED_HOST: HeaderName = HeaderName::from_static("x-forwarded-host");
const X_FORWARDED_PROTO: HeaderName = HeaderName::from_static("x-forwarded-proto");

/// Forwards directed requests through a transport.
pub struct ReverseProxy {
    director: Director,
    transport: Arc<dyn HttpClient>,
}

impl ReverseProxy {
    pub fn new(director: Director, transport: Arc<dyn HttpClient>) -> Self {
        Self {
            director,
            transport,
        }
    }

    pub async fn forward(&self, mut req: Request<AxumBody>) -> Response<AxumBody> {
        let client_ip = req
            .extensions()
            .get::<ConnectInfo<SocketAddr>>()
            .map(|ConnectInfo(addr)| addr.ip());
        let inbound_host = req
            .headers()
            .get(header::HOST)
            .cloned()
            .or_else(|| {
                req.uri()
                    .authority()
                    .and_then(|a| HeaderValue::from_str(a.as_str()).ok())
            });
        let proto = match req.uri().scheme_str() {
            Some("https") => "https",
            _ => "http",
        };

        if let Err(e) = self.director.direct(&mut req) {
            tracing::error!(
                listen_path = %self.director.definition().listen_path,
                error = %e,
                "Failed to direct request"
            );
            return json_error(StatusCode::BAD_GATEWAY, &e.to_string());
        }

        let headers = req.headers_mut();
        strip_hop_headers(headers);
        if let Some(ip) = client_ip {
            let forwarded = match headers
                .get(X_FORWARDED_FOR)
                .and_then(|v| v.to_str().ok())
            {
                Some(prior) => format!("{prior}, {ip}"),
                None => ip.to_string(),
            };
            if let Ok(value) = HeaderValue::from_str(&forwarded) {
                headers.insert(X_FORWARDED_FOR, value);
            }
        }
        if let Some(host) = inbound_host {
            headers.insert(X_FORWARDED_HOST, host);
        }
        headers.insert(X_FORWARDED_PROTO, HeaderValue::from_static(proto));

        let upstream = req.uri().to_string();
        let span = create_backend_span(&upstream, req.method().as_str(), req.uri().path());
        match self.transport.send_request(req).instrument(span).await {
            Ok(mut response) => {
                strip_hop_headers(response.headers_mut());
                response
            }
            Err(e) if e.is_timeout() => {
                tracing::error!(upstream = %upstream, error = %e, "Upstream timed out");
                json_error(StatusCode::GATEWAY_TIMEOUT, &e.to_string())
            }
            Err(e) => {
                tracing::error!(upstream = %upstream, error = %e, "Upstream request failed");
                json_error(StatusCode::BAD_GATEWAY, &e.to_string())
            }
        }
    }

    /// Wrap the proxy into a [`Handler`].
    pub fn into_handler(self) -> Handler {
        let proxy = Arc::new(self);
        handler_fn(move |req| {
            let proxy = proxy.clone();
            async move { proxy.forward(req).await }
        })
    }
}

/// Remove hop-by-hop headers, including those named by `Connection`.
pub fn strip_hop_headers(headers: &mut HeaderMap) {
    let named: Vec<HeaderName> = headers
        .get_all(header::CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|name| HeaderName::from_bytes(name.trim().as_bytes()).ok())
        .collect();
    for name in named.iter().chain(HOP_BY_HOP.iter()) {
        headers.remove(name);
    }
}

/// A response with a `{"error": message}` JSON body.
pub fn json_error(status: StatusCode, message: &str) -> Response<AxumBody> {
    let body = serde_json::json!({ "error": message }).to_string();
    let mut response = Response::new(AxumBody::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::{Definition, Target},
        core::testing::{RecordingClient, RecordingStats, body_string},
    };

    fn proxy(definition: Definition, client: Arc<RecordingClient>) -> ReverseProxy {
        let stats = Arc::new(RecordingStats::default());
        let director = Director::new(Arc::new(definition), stats).unwrap();
        ReverseProxy::new(director, client)
    }

    fn definition() -> Definition {
        Definition::new("/api/*").with_target(Target::new("http://upstream:8080"))
    }

    #[tokio::test]
    async fn test_forward_sets_forwarding_headers() {
        let client = Arc::new(RecordingClient::new());
        let proxy = proxy(definition(), client.clone());

        let mut req = Request::builder()
            .uri("/api/items")
            .header(header::HOST, "gateway.local")
            .header("x-forwarded-for", "10.0.0.1")
            .header(header::CONNECTION, "x-private")
            .header("x-private", "secret")
            .header("keep-alive", "timeout=5")
            .body(AxumBody::empty())
            .unwrap();
        req.extensions_mut()
            .insert(ConnectInfo(SocketAddr::from(([192, 168, 1, 2], 4000))));

        let response = proxy.forward(req).await;
        assert_eq!(response.status(), StatusCode::OK);

        let seen = client.last();
        assert_eq!(seen.uri.to_string(), "http://upstream:8080/");
        assert_eq!(seen.headers[header::HOST], "upstream:8080");
        assert_eq!(seen.headers["x-forwarded-for"], "10.0.0.1, 192.168.1.2");
        assert_eq!(seen.headers["x-forwarded-host"], "gateway.local");
        assert_eq!(seen.headers["x-forwarded-proto"], "http");
        assert!(!seen.headers.contains_key("x-private"));
        assert!(!seen.headers.contains_key("keep-alive"));
        assert!(!seen.headers.contains_key(header::CONNECTION));
    }

    #[tokio::test]
    async fn test_director_failure_is_bad_gateway() {
        let client = Arc::new(RecordingClient::new());
        let proxy = proxy(Definition::new("/api/*"), client.clone());

        let response = proxy
            .forward(Request::new(AxumBody::empty()))
            .await;

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(response.headers()[header::CONTENT_TYPE], "application/json");
        assert!(body_string(response).await.contains("error"));
        assert!(client.requests().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_is_gateway_timeout() {
        let proxy = proxy(definition(), Arc::new(RecordingClient::timing_out()));
        let response = proxy.forward(Request::new(AxumBody::empty())).await;
        assert_eq!(response.status(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[tokio::test]
    async fn test_transport_failure_is_bad_gateway() {
        let proxy = proxy(definition(), Arc::new(RecordingClient::refusing()));
        let response = proxy.forward(Request::new(AxumBody::empty())).await;
        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_strip_hop_headers() {
        let mut headers = HeaderMap::new();
        headers.insert(header::CONNECTION, HeaderValue::from_static("close, x-a"));
        headers.insert("x-a", HeaderValue::from_static("1"));
        headers.insert(header::TE, HeaderValue::from_static("trailers"));
        headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("text/plain"));

        strip_hop_headers(&mut headers);

        assert_eq!(headers.len(), 1);
        assert!(headers.contains_key(header::CONTENT_TYPE));
    }
}
