//! Transport layer for the sync endpoint.
//!
//! [`SyncTransport`] exchanges one page. [`HttpTransport`] implements it on
//! top of any [`HttpClient`] and owns the status-code semantics, so the
//! client itself only moves bytes.

use crate::error::{SyncError, SyncResult};
use parking_lot::{Mutex, RwLock};
use sealsync_protocol::{SyncRequest, SyncResponse};
use std::collections::VecDeque;
use std::time::Duration;
use thiserror::Error;

/// Per-request settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestOptions {
    /// Give up after this long.
    pub timeout: Duration,
    /// Bearer token of the session.
    pub access_token: Option<String>,
}

/// A sync transport sends one page to the sync endpoint.
pub trait SyncTransport: Send + Sync {
    /// Sends a request and returns the parsed response.
    fn exchange(&self, request: &SyncRequest, options: &RequestOptions) -> SyncResult<SyncResponse>;
}

/// An outgoing HTTP POST.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    /// Absolute URL.
    pub url: String,
    /// JSON body.
    pub body: Vec<u8>,
    /// Request timeout.
    pub timeout: Duration,
    /// Bearer token.
    pub bearer: Option<String>,
}

/// A received HTTP response.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    /// Status code.
    pub status: u16,
    /// Body bytes.
    pub body: Vec<u8>,
    /// Parsed `Retry-After` header.
    pub retry_after: Option<Duration>,
}

impl HttpResponse {
    /// Creates a response with a JSON body.
    pub fn ok(body: Vec<u8>) -> Self {
        Self {
            status: 200,
            body,
            retry_after: None,
        }
    }

    /// Creates an empty response with the given status.
    pub fn status(status: u16) -> Self {
        Self {
            status,
            body: Vec::new(),
            retry_after: None,
        }
    }
}

/// Failures below the HTTP layer.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No response within the timeout.
    #[error("timed out")]
    Timeout,
    /// Connection closed or reset before the response completed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),
    /// Anything else.
    #[error("i/o error: {0}")]
    Io(String),
}

impl From<TransportError> for SyncError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Timeout => SyncError::Timeout,
            TransportError::ConnectionClosed(msg) => SyncError::ConnectionReset(msg),
            TransportError::Io(msg) => SyncError::Transport(msg),
        }
    }
}

/// HTTP client abstraction.
///
/// Implement this trait to plug in an actual HTTP library, or an in-memory
/// server for tests.
pub trait HttpClient: Send + Sync {
    /// Sends a POST request.
    fn post(&self, request: HttpRequest) -> Result<HttpResponse, TransportError>;
}

impl<C: HttpClient + ?Sized> HttpClient for std::sync::Arc<C> {
    fn post(&self, request: HttpRequest) -> Result<HttpResponse, TransportError> {
        (**self).post(request)
    }
}

/// Path of the sync endpoint relative to the server URL.
pub const SYNC_PATH: &str = "/v1/items/sync";

/// JSON-over-HTTP sync transport.
pub struct HttpTransport<C: HttpClient> {
    base_url: String,
    client: C,
    last_error: RwLock<Option<String>>,
}

impl<C: HttpClient> HttpTransport<C> {
    /// Creates a new HTTP transport.
    pub fn new(base_url: impl Into<String>, client: C) -> Self {
        Self {
            base_url: base_url.into(),
            client,
            last_error: RwLock::new(None),
        }
    }

    /// Returns the base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Returns the underlying client.
    pub fn client(&self) -> &C {
        &self.client
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    fn fail(&self, err: SyncError) -> SyncError {
        *self.last_error.write() = Some(err.to_string());
        err
    }
}

/// Maps an HTTP status onto a sync error. `None` for success.
pub fn classify_status(response: &HttpResponse) -> Option<SyncError> {
    match response.status {
        200..=299 => None,
        413 => Some(SyncError::PayloadTooLarge),
        498 => Some(SyncError::SessionExpired),
        401 => Some(SyncError::Unauthorized),
        429 => Some(SyncError::RateLimited {
            retry_after: response.retry_after,
        }),
        status => Some(SyncError::Server {
            status,
            message: String::from_utf8_lossy(&response.body).into_owned(),
        }),
    }
}

impl<C: HttpClient> SyncTransport for HttpTransport<C> {
    fn exchange(&self, request: &SyncRequest, options: &RequestOptions) -> SyncResult<SyncResponse> {
        let body = serde_json::to_vec(request)
            .map_err(|e| SyncError::validation(format!("failed to encode request: {e}")))?;

        let response = self
            .client
            .post(HttpRequest {
                url: format!("{}{}", self.base_url.trim_end_matches('/'), SYNC_PATH),
                body,
                timeout: options.timeout,
                bearer: options.access_token.clone(),
            })
            .map_err(|e| self.fail(e.into()))?;

        if let Some(err) = classify_status(&response) {
            return Err(self.fail(err));
        }

        let parsed = serde_json::from_slice(&response.body)
            .map_err(|e| self.fail(SyncError::MalformedResponse(e.to_string())))?;
        *self.last_error.write() = None;
        Ok(parsed)
    }
}

/// A scripted transport for testing. Replies are consumed in order.
#[derive(Debug, Default)]
pub struct MockTransport {
    replies: Mutex<VecDeque<SyncResult<SyncResponse>>>,
    requests: Mutex<Vec<(SyncRequest, RequestOptions)>>,
}

impl MockTransport {
    /// Creates a transport with no scripted replies.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queues a successful reply.
    pub fn push_response(&self, response: SyncResponse) {
        self.replies.lock().push_back(Ok(response));
    }

    /// Queues a failure.
    pub fn push_error(&self, error: SyncError) {
        self.replies.lock().push_back(Err(error));
    }

    /// Every request received so far.
    pub fn requests(&self) -> Vec<(SyncRequest, RequestOptions)> {
        self.requests.lock().clone()
    }

    /// Number of replies not yet consumed.
    pub fn remaining(&self) -> usize {
        self.replies.lock().len()
    }
}

impl SyncTransport for MockTransport {
    fn exchange(&self, request: &SyncRequest, options: &RequestOptions) -> SyncResult<SyncResponse> {
        self.requests.lock().push((request.clone(), options.clone()));
        self.replies
            .lock()
            .pop_front()
            .unwrap_or_else(|| Err(SyncError::Transport("no scripted reply".into())))
    }
}
