//! Transport-level transform chain.
//!
//! [`Shackles`] decorates an [`HttpClient`] with an ordered list of request
//! links applied before the round trip and an ordered list of response links
//! applied after it. Unlike handler middleware, links see the request after
//! the director rewrote it and the raw upstream response before it is
//! streamed back. Both chains run in registration order.
use std::{fmt, sync::Arc};

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use bytes::Bytes;
use http::{HeaderValue, header};
use http_body_util::BodyExt;
use hyper::{Request, Response};
use thiserror::Error;

use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

/// Failure reported by a link; aborts the round trip.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct LinkError(String);

impl LinkError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Rewrites the outgoing request.
pub type InLink =
    Arc<dyn Fn(Request<AxumBody>) -> Result<Request<AxumBody>, LinkError> + Send + Sync>;

/// Rewrites the buffered upstream response.
pub type OutLink = Arc<dyn Fn(Response<Bytes>) -> Result<Response<Bytes>, LinkError> + Send + Sync>;

/// [`HttpClient`] decorator running the link chains around the inner client.
pub struct Shackles {
    inner: Arc<dyn HttpClient>,
    in_links: Vec<InLink>,
    out_links: Vec<OutLink>,
}

impl Shackles {
    pub fn new(inner: Arc<dyn HttpClient>) -> Self {
        Self {
            inner,
            in_links: Vec::new(),
            out_links: Vec::new(),
        }
    }

    pub fn with_in_links(mut self, links: impl IntoIterator<Item = InLink>) -> Self {
        self.in_links.extend(links);
        self
    }

    pub fn with_out_links(mut self, links: impl IntoIterator<Item = OutLink>) -> Self {
        self.out_links.extend(links);
        self
    }

    pub fn in_link(mut self, link: InLink) -> Self {
        self.in_links.push(link);
        self
    }

    pub fn out_link(mut self, link: OutLink) -> Self {
        self.out_links.push(link);
        self
    }

    /// Drain the body so response links can inspect it.
    async fn buffer(response: Response<AxumBody>) -> HttpClientResult<Response<Bytes>> {
        let (parts, body) = response.into_parts();
        let bytes = body
            .collect()
            .await
            .map_err(|e| HttpClientError::Body(e.to_string()))?
            .to_bytes();
        Ok(Response::from_parts(parts, bytes))
    }
}

impl fmt::Debug for Shackles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Shackles")
            .field("in_links", &self.in_links.len())
            .field("out_links", &self.out_links.len())
            .finish()
    }
}

#[async_trait]
impl HttpClient for Shackles {
    async fn send_request(
        &self,
        mut req: Request<AxumBody>,
    ) -> HttpClientResult<Response<AxumBody>> {
        for (index, link) in self.in_links.iter().enumerate() {
            req = link(req).map_err(|e| HttpClientError::Chain {
                stage: "inbound",
                index,
                message: e.to_string(),
            })?;
        }

        let response = self.inner.send_request(req).await?;
        if self.out_links.is_empty() {
            return Ok(response);
        }

        let mut response = Self::buffer(response).await?;
        for (index, link) in self.out_links.iter().enumerate() {
            response = link(response).map_err(|e| HttpClientError::Chain {
                stage: "outbound",
                index,
                message: e.to_string(),
            })?;
        }

        let (mut parts, bytes) = response.into_parts();
        parts.headers.remove(header::TRANSFER_ENCODING);
        parts
            .headers
            .insert(header::CONTENT_LENGTH, HeaderValue::from(bytes.len()));
        Ok(Response::from_parts(parts, AxumBody::from(bytes)))
    }
}
