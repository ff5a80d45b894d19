use std::fmt;
use std::time::Duration;

use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;

/// Boxed cause carried by transport-level failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Stable discriminator callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    HttpError,
    NetworkError,
    TimeoutError,
    Aborted,
    ConnectionTimeout,
    IdleTimeout,
    StreamError,
    InvalidRequest,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::HttpError => "HTTP_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::TimeoutError => "TIMEOUT_ERROR",
            Self::Aborted => "ABORTED",
            Self::ConnectionTimeout => "CONNECTION_TIMEOUT",
            Self::IdleTimeout => "IDLE_TIMEOUT",
            Self::StreamError => "STREAM_ERROR",
            Self::InvalidRequest => "INVALID_REQUEST",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classified failure surfaced by every client operation.
///
/// Exactly one kind is populated per error; only [`SandboxError::Http`]
/// carries a status code.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("{message}")]
    Http {
        status: StatusCode,
        message: String,
        body: Option<Value>,
    },

    #[error("Network request failed")]
    Network {
        #[source]
        source: BoxError,
    },

    #[error("Request timed out after {}ms", .timeout.as_millis())]
    Timeout { timeout: Duration },

    #[error("Request was aborted")]
    Aborted,

    #[error("Job {job_id} did not finish within {}ms", .max_wait.as_millis())]
    WaitTimeout { job_id: String, max_wait: Duration },

    #[error("Stream connection was not established within {}ms", .timeout.as_millis())]
    ConnectionTimeout { timeout: Duration },

    #[error("Stream idle for more than {}ms", .timeout.as_millis())]
    IdleTimeout { timeout: Duration },

    #[error("Stream read failed")]
    Stream {
        #[source]
        source: BoxError,
    },

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl SandboxError {
    /// Classify a failed (or empty) HTTP response.
    #[must_use]
    pub fn from_response(status: StatusCode, body: Option<Value>) -> Self {
        let message = body
            .as_ref()
            .and_then(|body| body.get("error"))
            .and_then(error_field_message)
            .unwrap_or_else(|| format!("HTTP {}", status.as_u16()));

        Self::Http {
            status,
            message,
            body,
        }
    }

    /// A 2xx response whose body does not match the expected shape.
    ///
    /// Carries the success status and raw body; never retryable.
    #[must_use]
    pub fn undecodable(status: StatusCode, body: Value, cause: impl fmt::Display) -> Self {
        Self::Http {
            status,
            message: format!("failed to decode response body: {cause}"),
            body: Some(body),
        }
    }

    #[must_use]
    pub fn network(cause: impl Into<BoxError>) -> Self {
        Self::Network {
            source: cause.into(),
        }
    }

    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    #[must_use]
    pub fn aborted() -> Self {
        Self::Aborted
    }

    #[must_use]
    pub fn stream(cause: impl Into<BoxError>) -> Self {
        Self::Stream {
            source: cause.into(),
        }
    }

    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest(message.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::Http { .. } => ErrorCode::HttpError,
            Self::Network { .. } => ErrorCode::NetworkError,
            Self::Timeout { .. } | Self::WaitTimeout { .. } => ErrorCode::TimeoutError,
            Self::Aborted => ErrorCode::Aborted,
            Self::ConnectionTimeout { .. } => ErrorCode::ConnectionTimeout,
            Self::IdleTimeout { .. } => ErrorCode::IdleTimeout,
            Self::Stream { .. } => ErrorCode::StreamError,
            Self::InvalidRequest(_) => ErrorCode::InvalidRequest,
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } => Some(status.as_u16()),
            _ => None,
        }
    }

    /// Raw response body for HTTP failures.
    pub fn body(&self) -> Option<&Value> {
        match self {
            Self::Http { body, .. } => body.as_ref(),
            _ => None,
        }
    }

    /// Network failures and 5xx responses are transient; everything else is terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. } => true,
            Self::Http { status, .. } => status.is_server_error(),
            _ => false,
        }
    }
}

fn error_field_message(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(message) => Some(message.clone()),
        other => Some(other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use std::error::Error as _;
    use std::time::Duration;

    use reqwest::StatusCode;
    use serde_json::json;

    use super::{ErrorCode, SandboxError};

    #[test]
    fn from_response_uses_error_field() {
        let error =
            SandboxError::from_response(StatusCode::NOT_FOUND, Some(json!({"error": "Job not found"})));

        assert_eq!(error.code(), ErrorCode::HttpError);
        assert_eq!(error.code().as_str(), "HTTP_ERROR");
        assert_eq!(error.status(), Some(404));
        assert_eq!(error.to_string(), "Job not found");
        assert_eq!(error.body(), Some(&json!({"error": "Job not found"})));
    }

    #[test]
    fn from_response_synthesizes_message_without_body() {
        let error = SandboxError::from_response(StatusCode::INTERNAL_SERVER_ERROR, None);
        assert_eq!(error.to_string(), "HTTP 500");
        assert!(error.body().is_none());
    }

    #[test]
    fn from_response_stringifies_structured_error_field() {
        let error = SandboxError::from_response(
            StatusCode::BAD_REQUEST,
            Some(json!({"error": {"reason": "bad prompt"}})),
        );
        assert_eq!(error.to_string(), r#"{"reason":"bad prompt"}"#);

        let error =
            SandboxError::from_response(StatusCode::BAD_REQUEST, Some(json!({"error": null})));
        assert_eq!(error.to_string(), "HTTP 400");
    }

    #[test]
    fn fixed_messages_and_codes() {
        let network = SandboxError::network("connection refused");
        assert_eq!(network.to_string(), "Network request failed");
        assert_eq!(network.code(), ErrorCode::NetworkError);
        assert_eq!(network.status(), None);
        assert_eq!(
            network.source().map(ToString::to_string).as_deref(),
            Some("connection refused")
        );

        let timeout = SandboxError::timeout(Duration::from_millis(50));
        assert_eq!(timeout.to_string(), "Request timed out after 50ms");
        assert_eq!(timeout.code().as_str(), "TIMEOUT_ERROR");
        assert_eq!(timeout.status(), None);

        let aborted = SandboxError::aborted();
        assert_eq!(aborted.to_string(), "Request was aborted");
        assert_eq!(aborted.code(), ErrorCode::Aborted);
    }

    #[test]
    fn undecodable_success_is_terminal_http_error() {
        let error = SandboxError::undecodable(
            StatusCode::ACCEPTED,
            json!({"jobId": "j1"}),
            "missing field `job_id`",
        );
        assert_eq!(error.code(), ErrorCode::HttpError);
        assert_eq!(error.status(), Some(202));
        assert_eq!(error.body(), Some(&json!({"jobId": "j1"})));
        assert_eq!(
            error.to_string(),
            "failed to decode response body: missing field `job_id`"
        );
        assert!(!error.is_retryable());
    }

    #[test]
    fn retryability_follows_kind_and_status() {
        assert!(SandboxError::network("reset").is_retryable());
        assert!(SandboxError::from_response(StatusCode::BAD_GATEWAY, None).is_retryable());
        assert!(!SandboxError::from_response(StatusCode::TOO_MANY_REQUESTS, None).is_retryable());
        assert!(!SandboxError::timeout(Duration::from_secs(1)).is_retryable());
        assert!(!SandboxError::aborted().is_retryable());
    }

    #[test]
    fn wait_timeout_shares_timeout_code() {
        let error = SandboxError::WaitTimeout {
            job_id: "job_1".to_owned(),
            max_wait: Duration::from_millis(50),
        };
        assert_eq!(error.code(), ErrorCode::TimeoutError);
        assert_eq!(error.to_string(), "Job job_1 did not finish within 50ms");
    }
}
