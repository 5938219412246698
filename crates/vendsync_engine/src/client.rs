//! Retrying request client.
//!
//! The wire transport is abstracted via [`HttpClient`] so the engine can run
//! against a real blocking HTTP library, or against [`MockHttpClient`] in
//! tests. [`RequestClient`] layers authentication, JSON decoding, bounded
//! retry with linear backoff, and dry-run suppression of writes on top.
//!
//! [`MockHttpClient`]: crate::MockHttpClient

use crate::config::RetryConfig;
use crate::error::{SyncError, SyncResult};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// HTTP method of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Read.
    Get,
    /// Create.
    Post,
    /// Partial update.
    Patch,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Patch => "PATCH",
        };
        f.write_str(name)
    }
}

/// A single HTTP request handed to the transport.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpRequest {
    /// Method.
    pub method: Method,
    /// Absolute URL, query string included.
    pub url: String,
    /// Header name/value pairs.
    pub headers: Vec<(String, String)>,
    /// JSON body for writes.
    pub body: Option<Value>,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl HttpRequest {
    /// Returns the value of a header, if set.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .map(|(_, value)| value.as_str())
    }
}

/// HTTP client abstraction.
///
/// Implementations perform exactly one network round trip per call and
/// return the raw response body. Failures must be reported as
/// [`SyncError::Transport`], with `status` set when the server answered
/// with a non-success status.
pub trait HttpClient: Send + Sync {
    /// Sends the request and returns the response body.
    fn send(&self, request: &HttpRequest) -> SyncResult<Vec<u8>>;
}

impl<C: HttpClient + ?Sized> HttpClient for Arc<C> {
    fn send(&self, request: &HttpRequest) -> SyncResult<Vec<u8>> {
        (**self).send(request)
    }
}

/// How requests are authenticated.
#[derive(Clone, PartialEq, Eq)]
pub enum Auth {
    /// `Authorization: Bearer <token>`.
    Bearer(String),
    /// `xc-token: <token>`.
    XcToken(String),
}

impl Auth {
    fn header(&self) -> (String, String) {
        match self {
            Auth::Bearer(token) => ("Authorization".into(), format!("Bearer {token}")),
            Auth::XcToken(token) => ("xc-token".into(), token.clone()),
        }
    }
}

impl fmt::Debug for Auth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Auth::Bearer(_) => f.write_str("Bearer(***)"),
            Auth::XcToken(_) => f.write_str("XcToken(***)"),
        }
    }
}

/// Authenticated JSON client with bounded retry.
///
/// - GET retries on any failure, up to `read_retry.max_attempts`.
/// - POST and PATCH retry only when the server answered with an HTTP error
///   status, up to `write_retry.max_attempts`.
/// - In dry-run mode writes are not sent; a synthetic acknowledgement
///   `{"dry_run": true}` is returned instead. Reads are never suppressed.
#[derive(Debug, Clone)]
pub struct RequestClient<C: HttpClient> {
    client: C,
    auth: Auth,
    read_retry: RetryConfig,
    write_retry: RetryConfig,
    timeout: Duration,
    dry_run: bool,
}

impl<C: HttpClient> RequestClient<C> {
    /// Creates a new request client with default retry policies.
    pub fn new(client: C, auth: Auth) -> Self {
        Self {
            client,
            auth,
            read_retry: RetryConfig::reads(),
            write_retry: RetryConfig::writes(),
            timeout: Duration::from_secs(30),
            dry_run: false,
        }
    }

    /// Sets the read and write retry policies.
    pub fn with_retry(mut self, read: RetryConfig, write: RetryConfig) -> Self {
        self.read_retry = read;
        self.write_retry = write;
        self
    }

    /// Sets the per-request timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Enables or disables dry-run mode.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Returns true if writes are suppressed.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Fetches and decodes a JSON document.
    pub fn get(&self, url: &str) -> SyncResult<Value> {
        let request = self.request(Method::Get, url, None);
        self.execute(&request, &self.read_retry, |_| true)
    }

    /// Posts a JSON body and decodes the response.
    pub fn post(&self, url: &str, body: &Value) -> SyncResult<Value> {
        self.write(Method::Post, url, body)
    }

    /// Patches a resource with a JSON body and decodes the response.
    pub fn patch(&self, url: &str, body: &Value) -> SyncResult<Value> {
        self.write(Method::Patch, url, body)
    }

    fn write(&self, method: Method, url: &str, body: &Value) -> SyncResult<Value> {
        if self.dry_run {
            debug!(%method, url, "dry run, write suppressed");
            return Ok(json!({ "dry_run": true }));
        }
        let request = self.request(method, url, Some(body.clone()));
        self.execute(&request, &self.write_retry, SyncError::is_status_failure)
    }

    fn request(&self, method: Method, url: &str, body: Option<Value>) -> HttpRequest {
        let mut headers = vec![self.auth.header()];
        if body.is_some() {
            headers.push(("Content-Type".into(), "application/json".into()));
        }
        HttpRequest {
            method,
            url: url.to_string(),
            headers,
            body,
            timeout: self.timeout,
        }
    }

    fn execute(
        &self,
        request: &HttpRequest,
        policy: &RetryConfig,
        should_retry: fn(&SyncError) -> bool,
    ) -> SyncResult<Value> {
        let attempts = policy.attempts();
        let mut attempt = 0;

        loop {
            let result = self
                .client
                .send(request)
                .and_then(|body| decode_body(&body));

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            attempt += 1;
            if attempt >= attempts || !should_retry(&err) {
                return Err(SyncError::RequestFailed {
                    method: request.method.to_string(),
                    url: request.url.clone(),
                    attempts: attempt,
                    source: Box::new(err),
                });
            }

            let delay = policy.delay_for_attempt(attempt - 1);
            warn!(
                method = %request.method,
                url = %request.url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "request failed, retrying"
            );
            std::thread::sleep(delay);
        }
    }
}

fn decode_body(body: &[u8]) -> SyncResult<Value> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_slice(body)?)
}
