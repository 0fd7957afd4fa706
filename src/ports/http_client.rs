use std::time::Duration;

use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to backend fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when the upstream does not answer in time
    #[error("Timeout error after {0:?}")]
    Timeout(Duration),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A transform link aborted the round trip
    #[error("{stage} link #{index} failed: {message}")]
    Chain {
        /// "inbound" or "outbound"
        stage: &'static str,
        /// Position of the failing link in its chain
        index: usize,
        message: String,
    },

    /// The upstream response body could not be read
    #[error("Failed to read upstream body: {0}")]
    Body(String),
}

impl HttpClientError {
    /// Whether the failure is a timeout (mapped to 504 rather than 502).
    pub fn is_timeout(&self) -> bool {
        matches!(self, HttpClientError::Timeout(_))
    }
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for making one round trip to an
/// upstream. Decorators such as [`crate::core::shackles::Shackles`] wrap it.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request whose URI already points at the upstream
    ///
    /// # Arguments
    /// * `req` - The rewritten request
    ///
    /// # Returns
    /// A future that resolves to the backend's response or an error
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
