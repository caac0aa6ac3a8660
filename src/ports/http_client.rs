use async_trait::async_trait;
use axum::body::Body as AxumBody;
use hyper::{Request, Response};
use thiserror::Error;

/// Custom error type for HTTP client operations
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// Error when connection to the downstream fails
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Error when request is invalid
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Error when a request body cannot be buffered for replay
    #[error("Body error: {0}")]
    BodyError(String),
}

/// Result type alias for HTTP client operations
pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// HttpClient defines the port (interface) for performing one outbound HTTP exchange.
///
/// Both the plain transport and the policy-enforcing wrapper implement it, so the wrapper
/// can be dropped in wherever a transport is expected.
#[async_trait]
pub trait HttpClient: Send + Sync + 'static {
    /// Send an HTTP request downstream
    ///
    /// # Arguments
    /// * `req` - The HTTP request to send
    ///
    /// # Returns
    /// A future that resolves to the downstream response or an error
    async fn send_request(&self, req: Request<AxumBody>) -> HttpClientResult<Response<AxumBody>>;
}
