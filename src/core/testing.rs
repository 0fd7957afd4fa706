//! In-crate fakes for the ports, shared by unit tests.
use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use http::{HeaderMap, HeaderValue, Method, StatusCode, Uri};
use hyper::{Request, Response};

use crate::{
    config::{Definition, Target},
    core::{proxy::ProxyContext, route::Route},
    ports::{
        http_client::{HttpClient, HttpClientError, HttpClientResult},
        stats_client::{StatsClient, UpstreamEvent},
    },
};

/// Header carrying the URI the fake upstream was called with.
pub const RECORDED_URI: &str = "x-recorded-uri";

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
}

#[derive(Debug, Clone, Copy)]
enum Failure {
    Timeout,
    Refused,
}

/// Fake upstream transport recording every request it receives.
pub struct RecordingClient {
    body: &'static str,
    failure: Option<Failure>,
    requests: Mutex<Vec<RecordedRequest>>,
}

impl RecordingClient {
    pub fn new() -> Self {
        Self::with_body("ok")
    }

    pub fn with_body(body: &'static str) -> Self {
        Self {
            body,
            failure: None,
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn timing_out() -> Self {
        Self {
            failure: Some(Failure::Timeout),
            ..Self::new()
        }
    }

    pub fn refusing() -> Self {
        Self {
            failure: Some(Failure::Refused),
            ..Self::new()
        }
    }

    pub fn requests(&self) -> Vec<RecordedRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn last(&self) -> RecordedRequest {
        self.requests().pop().expect("no request recorded")
    }
}

#[async_trait]
impl HttpClient for RecordingClient {
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>> {
        let (parts, _) = req.into_parts();
        self.requests.lock().unwrap().push(RecordedRequest {
            method: parts.method,
            uri: parts.uri.clone(),
            headers: parts.headers,
        });

        match self.failure {
            Some(Failure::Timeout) => Err(HttpClientError::Timeout(Duration::from_secs(1))),
            Some(Failure::Refused) => Err(HttpClientError::ConnectionError(
                "connection refused".to_string(),
            )),
            None => {
                let mut response = Response::new(AxumBody::from(self.body));
                *response.status_mut() = StatusCode::OK;
                response.headers_mut().insert(
                    RECORDED_URI,
                    HeaderValue::from_str(&parts.uri.to_string()).unwrap(),
                );
                Ok(response)
            }
        }
    }
}

/// Stats client keeping every event in memory.
#[derive(Default)]
pub struct RecordingStats {
    events: Mutex<Vec<UpstreamEvent>>,
}

impl RecordingStats {
    pub fn events(&self) -> Vec<UpstreamEvent> {
        self.events.lock().unwrap().clone()
    }
}

impl StatsClient for RecordingStats {
    fn track_upstream(&self, event: &UpstreamEvent) {
        self.events.lock().unwrap().push(event.clone());
    }
}

pub fn context(client: Arc<RecordingClient>, stats: Arc<RecordingStats>) -> ProxyContext {
    ProxyContext::new(client, stats)
}

pub fn route(listen_path: &str, target: &str) -> Route {
    Route::new(Definition::new(listen_path).with_target(Target::new(target)))
}

pub fn get(uri: &str) -> Request<AxumBody> {
    Request::builder().uri(uri).body(AxumBody::empty()).unwrap()
}

pub async fn body_string(response: Response<AxumBody>) -> String {
    use http_body_util::BodyExt;
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    String::from_utf8(bytes.to_vec()).unwrap()
}
