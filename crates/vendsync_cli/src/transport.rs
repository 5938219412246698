//! Blocking HTTP transport backed by reqwest.

use tracing::debug;
use vendsync_engine::{HttpClient, HttpRequest, Method, SyncError, SyncResult};

/// Longest response excerpt kept in an error message.
const BODY_EXCERPT: usize = 300;

/// [`HttpClient`] over a pooled `reqwest` blocking client.
#[derive(Clone, Debug)]
pub struct ReqwestClient {
    inner: reqwest::blocking::Client,
}

impl ReqwestClient {
    /// Creates a client with the crate's user agent.
    pub fn new() -> SyncResult<Self> {
        let inner = reqwest::blocking::Client::builder()
            .user_agent(concat!("vendsync/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Configuration(format!("http client: {e}")))?;
        Ok(Self { inner })
    }
}

impl HttpClient for ReqwestClient {
    fn send(&self, request: &HttpRequest) -> SyncResult<Vec<u8>> {
        let mut builder = match request.method {
            Method::Get => self.inner.get(&request.url),
            Method::Post => self.inner.post(&request.url),
            Method::Patch => self.inner.patch(&request.url),
        }
        .timeout(request.timeout);

        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            builder = builder.json(body);
        }

        let response = builder.send().map_err(classify)?;
        let status = response.status();
        let body = response.bytes().map_err(classify)?;
        debug!(method = %request.method, status = status.as_u16(), bytes = body.len(), "response");

        if !status.is_success() {
            return Err(SyncError::http_status(
                status.as_u16(),
                format!("{status}: {}", excerpt(&body)),
            ));
        }
        Ok(body.to_vec())
    }
}

fn classify(err: reqwest::Error) -> SyncError {
    if let Some(status) = err.status() {
        return SyncError::http_status(status.as_u16(), err.to_string());
    }
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        SyncError::transport_retryable(err.to_string())
    } else {
        SyncError::transport_fatal(err.to_string())
    }
}

fn excerpt(body: &[u8]) -> String {
    let text = String::from_utf8_lossy(body);
    let mut end = text.len().min(BODY_EXCERPT);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}
