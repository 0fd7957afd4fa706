use std::{
    convert::Infallible,
    sync::Arc,
    task::{Context, Poll},
};

use axum::body::Body as AxumBody;
use futures_util::future::BoxFuture;
use hyper::{Request, Response};
use tracing::Instrument;

use crate::{
    core::GatewayService,
    metrics::{RequestTimer, increment_request_total},
    tracing_setup::create_request_span,
};

/// Inbound surface of the gateway: a tower service that dispatches every
/// request through the currently active route table.
#[derive(Clone)]
pub struct HttpHandler {
    gateway: Arc<GatewayService>,
}

impl HttpHandler {
    pub fn new(gateway: Arc<GatewayService>) -> Self {
        Self { gateway }
    }

    pub async fn handle_request(&self, req: Request<AxumBody>) -> Response<AxumBody> {
        let method = req.method().to_string();
        let span = create_request_span(&method, req.uri().path());

        async move {
            let _timer = RequestTimer::new(&method);
            let response = self.gateway.handle(req).await;

            let status = response.status().as_u16();
            tracing::Span::current().record("http.status_code", status);
            increment_request_total(&method, status);
            response
        }
        .instrument(span)
        .await
    }
}

impl tower::Service<Request<AxumBody>> for HttpHandler {
    type Response = Response<AxumBody>;
    type Error = Infallible;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, req: Request<AxumBody>) -> Self::Future {
        let handler = self.clone();
        Box::pin(async move { Ok(handler.handle_request(req).await) })
    }
}
