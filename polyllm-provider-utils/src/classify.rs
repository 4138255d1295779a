use polyllm_provider::{ErrorKind, LlmError};
use serde_json::Value;
use std::time::Duration;
use std::time::{SystemTime, UNIX_EPOCH};

/// Map a vendor error `code` field to a kind. The code is the strongest
/// signal and wins over everything else.
fn kind_from_code(code: &str) -> Option<ErrorKind> {
    match code {
        "context_length_exceeded" | "max_tokens_exceeded" => {
            Some(ErrorKind::ContextLengthExceeded)
        }
        "rate_limit_exceeded" | "insufficient_quota" => Some(ErrorKind::RateLimited),
        "invalid_api_key" | "account_deactivated" => Some(ErrorKind::Unauthorized),
        "model_not_found" => Some(ErrorKind::NotFound),
        "content_policy_violation" => Some(ErrorKind::SafetyBlocked),
        _ => None,
    }
}

/// Map a vendor error `type` string to a kind.
fn kind_from_type(error_type: &str) -> Option<ErrorKind> {
    match error_type {
        "invalid_request_error" => Some(ErrorKind::InvalidRequest),
        "authentication_error" => Some(ErrorKind::Unauthorized),
        "permission_error" => Some(ErrorKind::Forbidden),
        "not_found_error" => Some(ErrorKind::NotFound),
        "rate_limit_error" => Some(ErrorKind::RateLimited),
        "overloaded_error" => Some(ErrorKind::Overloaded),
        "api_error" => Some(ErrorKind::Internal),
        _ => None,
    }
}

/// Substring heuristics over the human-readable message.
fn kind_from_message(message: &str) -> Option<ErrorKind> {
    let message = message.to_ascii_lowercase();
    if message.contains("context length") || message.contains("context window") {
        Some(ErrorKind::ContextLengthExceeded)
    } else if message.contains("rate limit") {
        Some(ErrorKind::RateLimited)
    } else if message.contains("overload") {
        Some(ErrorKind::Overloaded)
    } else if message.contains("safety") || message.contains("content policy") {
        Some(ErrorKind::SafetyBlocked)
    } else {
        None
    }
}

/// HTTP status fallback, consulted last.
fn kind_from_status(status: u16) -> ErrorKind {
    match status {
        400 | 422 => ErrorKind::InvalidRequest,
        401 => ErrorKind::Unauthorized,
        403 => ErrorKind::Forbidden,
        404 => ErrorKind::NotFound,
        408 => ErrorKind::Timeout,
        429 => ErrorKind::RateLimited,
        502 => ErrorKind::ProviderUnavailable,
        503 => ErrorKind::ProviderUnavailable,
        504 => ErrorKind::Timeout,
        529 => ErrorKind::Overloaded,
        500..=599 => ErrorKind::Internal,
        _ => ErrorKind::Internal,
    }
}

/// Pull `code`, `type`, and `message` out of a vendor error body.
///
/// Handles the common shapes: `{"error": {"code", "type", "message"}}`,
/// the same fields at the top level, and the bare `{"error": "message"}`
/// used by local endpoints.
fn extract_error_fields(body: &Value) -> (Option<String>, Option<String>, Option<String>) {
    let node = match body.get("error") {
        Some(Value::String(message)) => return (None, None, Some(message.clone())),
        Some(inner) => inner,
        None => body,
    };
    let get = |key: &str| {
        node.get(key)
            .and_then(Value::as_str)
            .map(ToString::to_string)
    };
    (get("code"), get("type"), get("message"))
}

/// Parse a `Retry-After` header value: either whole seconds or a future
/// Unix timestamp.
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    let seconds: u64 = value.trim().parse().ok()?;
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    // Anything that looks like a point in time rather than a delay is
    // interpreted against the current clock.
    if seconds > now {
        Some(Duration::from_secs(seconds - now))
    } else {
        Some(Duration::from_secs(seconds))
    }
}

/// Classify a failed HTTP response into the closed taxonomy.
///
/// Precedence: vendor error code, vendor error type, message substrings,
/// HTTP status. 502 and 504 map by status regardless of what the body
/// says, so they always stay retryable. `RateLimited` errors carry the
/// parsed `Retry-After` value or `default_retry_after`.
pub fn classify_response(
    provider: &str,
    status: u16,
    retry_after: Option<Duration>,
    body: &str,
    default_retry_after: Duration,
) -> LlmError {
    let payload: Option<Value> = serde_json::from_str(body).ok();

    let (code, error_type, message) = payload
        .as_ref()
        .map(extract_error_fields)
        .unwrap_or_default();
    let message = message.unwrap_or_else(|| {
        if body.is_empty() {
            format!("HTTP {status}")
        } else {
            body.chars().take(500).collect()
        }
    });

    let kind = if status == 502 || status == 504 {
        kind_from_status(status)
    } else {
        let mut kind = code
            .as_deref()
            .and_then(kind_from_code)
            .or_else(|| error_type.as_deref().and_then(kind_from_type));
        // Generic kinds carry no real signal; the message heuristics may
        // refine them (e.g. "invalid_request_error" wrapping a context
        // overflow).
        if matches!(kind, None | Some(ErrorKind::InvalidRequest) | Some(ErrorKind::Internal)) {
            kind = kind_from_message(&message).or(kind);
        }
        kind.unwrap_or_else(|| kind_from_status(status))
    };

    let mut error = LlmError::new(kind, message)
        .with_status(status)
        .with_provider(provider);
    if let Some(payload) = payload {
        error = error.with_raw(payload);
    }
    if kind == ErrorKind::RateLimited {
        error = error.with_retry_after(retry_after.unwrap_or(default_retry_after));
    }
    error
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEFAULT_RETRY: Duration = Duration::from_secs(30);

    #[test]
    fn test_401_maps_to_unauthorized() {
        let err = classify_response("openai", 401, None, "nonsense body", DEFAULT_RETRY);
        assert_eq!(err.kind, ErrorKind::Unauthorized);
        assert_eq!(err.status, Some(401));
    }

    #[test]
    fn test_429_carries_retry_after() {
        let err = classify_response(
            "openai",
            429,
            Some(Duration::from_secs(60)),
            r#"{"error":{"type":"rate_limit_error","message":"Rate limit reached"}}"#,
            DEFAULT_RETRY,
        );
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.retry_after, Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_429_without_header_uses_default() {
        let err = classify_response("openai", 429, None, "", DEFAULT_RETRY);
        assert_eq!(err.kind, ErrorKind::RateLimited);
        assert_eq!(err.retry_after, Some(DEFAULT_RETRY));
    }

    #[test]
    fn test_context_length_message_refines_generic_type() {
        // A context overflow wrapped in a generic invalid_request_error
        // must classify as the specific kind, vendor-independently.
        let err = classify_response(
            "anthropic",
            400,
            None,
            r#"{"error":{"type":"invalid_request_error","message":"Context length exceeded maximum allowed"}}"#,
            DEFAULT_RETRY,
        );
        assert_eq!(err.kind, ErrorKind::ContextLengthExceeded);

        let err = classify_response(
            "openai",
            400,
            None,
            r#"{"error":{"message":"Context length exceeded maximum allowed"}}"#,
            DEFAULT_RETRY,
        );
        assert_eq!(err.kind, ErrorKind::ContextLengthExceeded);
    }

    #[test]
    fn test_specific_type_beats_message_heuristic() {
        // A specific type mapping is a stronger signal than message
        // substrings.
        let err = classify_response(
            "anthropic",
            401,
            None,
            r#"{"error":{"type":"authentication_error","message":"rate limit your key requests"}}"#,
            DEFAULT_RETRY,
        );
        assert_eq!(err.kind, ErrorKind::Unauthorized);
    }

    #[test]
    fn test_502_and_504_ignore_body() {
        let err = classify_response(
            "openai",
            502,
            None,
            r#"{"error":{"type":"invalid_request_error","message":"nope"}}"#,
            DEFAULT_RETRY,
        );
        assert_eq!(err.kind, ErrorKind::ProviderUnavailable);
        assert!(err.is_retryable());

        let err = classify_response("openai", 504, None, "<html>gateway</html>", DEFAULT_RETRY);
        assert_eq!(err.kind, ErrorKind::Timeout);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_bare_string_error_body() {
        let err = classify_response(
            "ollama",
            404,
            None,
            r#"{"error":"model 'nope' not found"}"#,
            DEFAULT_RETRY,
        );
        assert_eq!(err.kind, ErrorKind::NotFound);
        assert!(err.message.contains("not found"));
    }

    #[test]
    fn test_overloaded_type() {
        let err = classify_response(
            "anthropic",
            529,
            None,
            r#"{"error":{"type":"overloaded_error","message":"Overloaded"}}"#,
            DEFAULT_RETRY,
        );
        assert_eq!(err.kind, ErrorKind::Overloaded);
        assert!(err.is_retryable());
    }

    #[test]
    fn test_parse_retry_after_seconds() {
        assert_eq!(parse_retry_after("60"), Some(Duration::from_secs(60)));
        assert_eq!(parse_retry_after("not a number"), None);
    }

    #[test]
    fn test_parse_retry_after_unix_timestamp() {
        let future = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs()
            + 90;
        let parsed = parse_retry_after(&future.to_string()).unwrap();
        assert!(parsed <= Duration::from_secs(91));
        assert!(parsed >= Duration::from_secs(85));
    }
}
