//! Error types for the sync engine.

use thiserror::Error;

/// Result type for sync operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Errors that can occur during a sync or bootstrap run.
#[derive(Error, Debug)]
pub enum SyncError {
    /// Required settings are absent or invalid.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Network or transport error.
    #[error("transport error: {message}")]
    Transport {
        /// Error message.
        message: String,
        /// HTTP status, when the server answered.
        status: Option<u16>,
        /// Whether the operation can be retried.
        retryable: bool,
    },

    /// A request failed after its retry budget was spent, or failed with a
    /// failure class that is not retried.
    #[error("{method} {url} failed after {attempts} attempt(s): {source}")]
    RequestFailed {
        /// HTTP method.
        method: String,
        /// Request URL.
        url: String,
        /// Number of attempts made.
        attempts: u32,
        /// The last failure.
        #[source]
        source: Box<SyncError>,
    },

    /// An expected source table does not exist.
    #[error("source table not found: {table}")]
    MissingUpstream {
        /// Table name.
        table: String,
    },

    /// A response did not have the expected shape.
    #[error("unexpected response: {0}")]
    Decode(String),

    /// JSON encode/decode failure.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

impl SyncError {
    /// Creates a retryable transport error.
    pub fn transport_retryable(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
            retryable: true,
        }
    }

    /// Creates a non-retryable transport error.
    pub fn transport_fatal(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
            retryable: false,
        }
    }

    /// Creates an error for a response carrying a non-success HTTP status.
    ///
    /// Server errors (5xx) and throttling (429) are retryable.
    pub fn http_status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: Some(status),
            retryable: status >= 500 || status == 429,
        }
    }

    /// Returns true if this error can be retried.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Transport { retryable, .. } => *retryable,
            SyncError::Decode(_) | SyncError::Json(_) => true,
            _ => false,
        }
    }

    /// Returns true if the server answered with an HTTP error status.
    pub fn is_status_failure(&self) -> bool {
        matches!(self, SyncError::Transport { status: Some(_), .. })
    }

    /// Returns the HTTP status attached to this error, looking through
    /// [`SyncError::RequestFailed`].
    pub fn status(&self) -> Option<u16> {
        match self {
            SyncError::Transport { status, .. } => *status,
            SyncError::RequestFailed { source, .. } => source.status(),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_errors() {
        assert!(SyncError::transport_retryable("connection reset").is_retryable());
        assert!(!SyncError::transport_fatal("invalid certificate").is_retryable());
        assert!(SyncError::http_status(503, "unavailable").is_retryable());
        assert!(SyncError::http_status(429, "slow down").is_retryable());
        assert!(!SyncError::http_status(400, "bad request").is_retryable());
        assert!(!SyncError::Configuration("missing".into()).is_retryable());
    }

    #[test]
    fn status_failures() {
        assert!(SyncError::http_status(400, "bad request").is_status_failure());
        assert!(!SyncError::transport_retryable("timeout").is_status_failure());

        let wrapped = SyncError::RequestFailed {
            method: "POST".into(),
            url: "http://localhost/x".into(),
            attempts: 2,
            source: Box::new(SyncError::http_status(422, "invalid")),
        };
        assert_eq!(wrapped.status(), Some(422));
    }

    #[test]
    fn error_display() {
        let err = SyncError::MissingUpstream {
            table: "商品".into(),
        };
        assert_eq!(err.to_string(), "source table not found: 商品");

        let err = SyncError::RequestFailed {
            method: "GET".into(),
            url: "http://localhost/x".into(),
            attempts: 4,
            source: Box::new(SyncError::transport_retryable("timed out")),
        };
        assert!(err.to_string().contains("4 attempt(s)"));
        assert!(err.to_string().contains("timed out"));
    }
}
