use serde_json::Value;
use std::time::Duration;
use thiserror::Error;

/// Closed classification of everything that can go wrong talking to a
/// chat backend. Every failure maps to exactly one kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The request was malformed or rejected by validation.
    InvalidRequest,
    /// Missing or invalid credentials.
    Unauthorized,
    /// Valid credentials without access to the resource.
    Forbidden,
    /// Unknown model, endpoint, or resource.
    NotFound,
    /// The vendor is throttling the caller.
    RateLimited,
    /// The prompt exceeded the model's context window.
    ContextLengthExceeded,
    /// The dialect cannot express the request (for example a video part).
    Unsupported,
    /// The vendor refused the content on safety grounds.
    SafetyBlocked,
    /// The vendor is shedding load.
    Overloaded,
    /// The vendor endpoint is down or returned a bad gateway.
    ProviderUnavailable,
    /// The request or the caller's deadline timed out.
    Timeout,
    /// A connection-level failure.
    Network,
    /// A vendor-side internal error.
    Internal,
    /// The caller cancelled the request.
    Canceled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::Unauthorized => "unauthorized",
            ErrorKind::Forbidden => "forbidden",
            ErrorKind::NotFound => "not_found",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::ContextLengthExceeded => "context_length_exceeded",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::SafetyBlocked => "safety_blocked",
            ErrorKind::Overloaded => "overloaded",
            ErrorKind::ProviderUnavailable => "provider_unavailable",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Network => "network",
            ErrorKind::Internal => "internal",
            ErrorKind::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

/// Message substrings that mark a vendor `Internal` error as transient.
const TRANSIENT_MARKERS: &[&str] = &["temporarily", "transient", "try again", "timeout"];

/// An error from any layer of the runtime, classified into the closed
/// [`ErrorKind`] taxonomy and carrying enough context for a caller to
/// retry, report, or branch programmatically.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct LlmError {
    /// The classification of the failure.
    pub kind: ErrorKind,
    /// Human-readable description, usually the vendor's own message.
    pub message: String,
    /// HTTP status of the failing response, when there was one.
    pub status: Option<u16>,
    /// Tag of the provider that produced the error ("openai", ...).
    pub provider: Option<String>,
    /// Model the request addressed, when known.
    pub model: Option<String>,
    /// Vendor-suggested wait before retrying.
    pub retry_after: Option<Duration>,
    /// Raw vendor error payload for debugging.
    pub raw: Option<Value>,
}

impl LlmError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            status: None,
            provider: None,
            model: None,
            retry_after: None,
            raw: None,
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unsupported, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled, "request canceled by caller")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_raw(mut self, raw: Value) -> Self {
        self.raw = Some(raw);
        self
    }

    /// Whether the transport may retry the request.
    ///
    /// `Internal` errors are retryable only when the vendor message carries
    /// a transient indicator.
    pub fn is_retryable(&self) -> bool {
        match self.kind {
            ErrorKind::RateLimited
            | ErrorKind::Overloaded
            | ErrorKind::Timeout
            | ErrorKind::Network
            | ErrorKind::ProviderUnavailable => true,
            ErrorKind::Internal => {
                let message = self.message.to_ascii_lowercase();
                TRANSIENT_MARKERS.iter().any(|m| message.contains(m))
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_set() {
        assert!(LlmError::new(ErrorKind::RateLimited, "slow down").is_retryable());
        assert!(LlmError::new(ErrorKind::Overloaded, "overloaded").is_retryable());
        assert!(LlmError::timeout("deadline").is_retryable());
        assert!(LlmError::network("reset").is_retryable());
        assert!(LlmError::new(ErrorKind::ProviderUnavailable, "502").is_retryable());
        assert!(!LlmError::invalid_request("bad").is_retryable());
        assert!(!LlmError::new(ErrorKind::Unauthorized, "key").is_retryable());
        assert!(!LlmError::canceled().is_retryable());
    }

    #[test]
    fn test_internal_transient_marker() {
        assert!(LlmError::internal("server temporarily unavailable").is_retryable());
        assert!(LlmError::internal("please try again later").is_retryable());
        assert!(!LlmError::internal("assertion failed").is_retryable());
    }

    #[test]
    fn test_display_includes_kind() {
        let err = LlmError::new(ErrorKind::ContextLengthExceeded, "too long").with_status(400);
        assert_eq!(err.to_string(), "context_length_exceeded: too long");
        assert_eq!(err.status, Some(400));
    }
}
