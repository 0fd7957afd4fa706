use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use eyre::{Result, WrapErr};
use hyper::{Request, Response, Version, header, header::HeaderValue};
use hyper_rustls::HttpsConnector;
use hyper_util::{
    client::legacy::{Client, connect::HttpConnector},
    rt::{TokioExecutor, TokioTimer},
};
use rustls_native_certs::load_native_certs;
use tokio::time::timeout;

use crate::{
    config::ProxyConfig,
    ports::http_client::{HttpClient, HttpClientError, HttpClientResult},
};

/// Upstream transport built on the hyper legacy client with rustls.
///
/// Every round trip is bounded by the configured upstream timeout. The Host
/// header is normally chosen by the director; the adapter only fills it in
/// from the URI when nothing set it.
pub struct HttpClientAdapter {
    client: Client<HttpsConnector<HttpConnector>, AxumBody>,
    upstream_timeout: Duration,
}

impl HttpClientAdapter {
    pub fn new(config: &ProxyConfig) -> Result<Self> {
        let upstream_timeout = config
            .upstream_timeout()
            .wrap_err("Invalid proxy.upstream_timeout")?;
        let pool_idle_timeout = config
            .pool_idle_timeout()
            .wrap_err("Invalid proxy.pool_idle_timeout")?;

        // another component may have installed a provider already
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut http_connector = HttpConnector::new();
        http_connector.enforce_http(false);

        let mut root_cert_store = rustls::RootCertStore::empty();
        let native_certs = load_native_certs();

        if !native_certs.certs.is_empty() {
            for cert in native_certs.certs {
                if root_cert_store.add(cert).is_err() {
                    tracing::warn!("Failed to add native certificate to rustls RootCertStore");
                }
            }
            tracing::debug!("Loaded {} native root certificates.", root_cert_store.len());
        }

        if !native_certs.errors.is_empty() {
            tracing::warn!(
                "Some native certificates failed to load: {:?}",
                native_certs.errors
            );
        }

        let tls_config = rustls::ClientConfig::builder()
            .with_root_certificates(root_cert_store)
            .with_no_client_auth();

        let https_connector = hyper_rustls::HttpsConnectorBuilder::new()
            .with_tls_config(tls_config)
            .https_or_http()
            .enable_http1()
            .wrap_connector(http_connector);

        let client = Client::builder(TokioExecutor::new())
            .pool_timer(TokioTimer::new())
            .pool_idle_timeout(pool_idle_timeout)
            .build::<_, AxumBody>(https_connector);

        tracing::info!(
            upstream_timeout = ?upstream_timeout,
            pool_idle_timeout = ?pool_idle_timeout,
            "Created upstream HTTP client"
        );
        Ok(Self {
            client,
            upstream_timeout,
        })
    }

    pub fn upstream_timeout(&self) -> Duration {
        self.upstream_timeout
    }

    fn ensure_host(req: &mut Request<AxumBody>) -> HttpClientResult<()> {
        if req.headers().contains_key(header::HOST) {
            return Ok(());
        }

        let authority = req
            .uri()
            .authority()
            .ok_or_else(|| {
                HttpClientError::InvalidRequest(format!("Outgoing URI has no host: {}", req.uri()))
            })?
            .as_str()
            .to_string();

        let value = HeaderValue::from_str(&authority)
            .map_err(|e| HttpClientError::InvalidRequest(e.to_string()))?;
        req.headers_mut().insert(header::HOST, value);
        Ok(())
    }
}

#[async_trait]
impl HttpClient for HttpClientAdapter {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        if req.uri().host().is_none() {
            tracing::error!("Outgoing URI has no host: {}", req.uri());
            return Err(HttpClientError::InvalidRequest(
                "Outgoing URI has no host".to_string(),
            ));
        }
        Self::ensure_host(&mut req)?;

        let (mut parts, body) = req.into_parts();
        parts.version = Version::HTTP_11;

        let method = parts.method.clone();
        let uri = parts.uri.clone();
        tracing::debug!("Sending request: {} {}", method, uri);
        tracing::trace!("Outgoing request headers: {:?}", parts.headers);

        let outgoing = Request::from_parts(parts, body);

        match timeout(self.upstream_timeout, self.client.request(outgoing)).await {
            Ok(Ok(response)) => {
                tracing::Span::current().record("http.status_code", response.status().as_u16());

                let (mut parts, hyper_body) = response.into_parts();
                // axum frames the body again on the way out
                parts.headers.remove(header::TRANSFER_ENCODING);

                Ok(Response::from_parts(parts, AxumBody::new(hyper_body)))
            }
            Ok(Err(e)) => {
                tracing::Span::current().record("http.status_code", 502u16);
                tracing::error!("Error making request to backend ({} {}): {}", method, uri, e);
                Err(HttpClientError::ConnectionError(format!(
                    "Request to {method} {uri} failed: {e}"
                )))
            }
            Err(_) => {
                tracing::Span::current().record("http.status_code", 504u16);
                tracing::warn!(
                    "Backend did not answer within {:?} ({} {})",
                    self.upstream_timeout,
                    method,
                    uri
                );
                Err(HttpClientError::Timeout(self.upstream_timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::{Router, extract::Request as AxumRequest, routing::get};
    use http_body_util::BodyExt;
    use tokio::net::TcpListener;

    use super::*;

    async fn upstream(app: Router) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        addr
    }

    fn config(upstream_timeout: &str) -> ProxyConfig {
        ProxyConfig {
            upstream_timeout: upstream_timeout.to_string(),
            ..ProxyConfig::default()
        }
    }

    #[tokio::test]
    async fn test_http_client_creation() {
        let client = HttpClientAdapter::new(&ProxyConfig::default()).unwrap();
        assert_eq!(client.upstream_timeout(), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_invalid_timeout_is_rejected() {
        assert!(HttpClientAdapter::new(&config("soon")).is_err());
    }

    #[tokio::test]
    async fn test_sends_request_and_fills_host() {
        let app = Router::new().route(
            "/echo",
            get(|req: AxumRequest| async move {
                req.headers()
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            }),
        );
        let addr = upstream(app).await;

        let client = HttpClientAdapter::new(&ProxyConfig::default()).unwrap();
        let req = Request::builder()
            .uri(format!("http://{addr}/echo"))
            .body(AxumBody::empty())
            .unwrap();

        let response = client.send_request(req).await.unwrap();
        assert!(response.status().is_success());
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, addr.to_string().as_bytes());
    }

    #[tokio::test]
    async fn test_keeps_explicit_host() {
        let app = Router::new().route(
            "/echo",
            get(|req: AxumRequest| async move {
                req.headers()
                    .get(header::HOST)
                    .and_then(|v| v.to_str().ok())
                    .unwrap_or_default()
                    .to_string()
            }),
        );
        let addr = upstream(app).await;

        let client = HttpClientAdapter::new(&ProxyConfig::default()).unwrap();
        let req = Request::builder()
            .uri(format!("http://{addr}/echo"))
            .header(header::HOST, "example.org")
            .body(AxumBody::empty())
            .unwrap();

        let response = client.send_request(req).await.unwrap();
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(body, "example.org".as_bytes());
    }

    #[tokio::test]
    async fn test_slow_upstream_times_out() {
        let app = Router::new().route(
            "/slow",
            get(|| async {
                tokio::time::sleep(Duration::from_secs(2)).await;
                "late"
            }),
        );
        let addr = upstream(app).await;

        let client = HttpClientAdapter::new(&config("100ms")).unwrap();
        let req = Request::builder()
            .uri(format!("http://{addr}/slow"))
            .body(AxumBody::empty())
            .unwrap();

        let err = client.send_request(req).await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_refused_connection_is_a_connection_error() {
        let client = HttpClientAdapter::new(&ProxyConfig::default()).unwrap();
        let req = Request::builder()
            .uri("http://127.0.0.1:9/")
            .body(AxumBody::empty())
            .unwrap();

        let err = client.send_request(req).await.unwrap_err();
        assert!(matches!(err, HttpClientError::ConnectionError(_)));
    }

    #[tokio::test]
    async fn test_relative_uri_is_invalid() {
        let client = HttpClientAdapter::new(&ProxyConfig::default()).unwrap();
        let req = Request::builder()
            .uri("/no-host")
            .body(AxumBody::empty())
            .unwrap();

        let err = client.send_request(req).await.unwrap_err();
        assert!(matches!(err, HttpClientError::InvalidRequest(_)));
    }
}
