//! Inference error types.
//!
//! Structured logging is the caller's responsibility; these types carry the
//! context needed to build meaningful log entries.

use thiserror::Error;

/// Errors that can occur while calling the reasoning service.
#[derive(Debug, Error)]
pub enum InferenceError {
    /// TCP/HTTP connection to the model endpoint failed.
    #[error("connection failed to {endpoint}: {reason}")]
    ConnectionFailed {
        endpoint: String,
        reason: String,
    },

    /// The endpoint did not respond within the configured timeout.
    #[error("inference timeout after {duration_secs}s")]
    Timeout {
        duration_secs: u64,
    },

    /// Non-2xx HTTP response from the model endpoint.
    #[error("HTTP {status}: {body}")]
    HttpError {
        status: u16,
        body: String,
    },

    /// The response body was not a usable chat completion.
    #[error("response parse error: {reason}")]
    ResponseParseError {
        reason: String,
    },

    /// A tool call's arguments could not be parsed or repaired.
    #[error("tool call parse error: {reason}")]
    ToolCallParseError {
        raw_response: String,
        reason: String,
    },

    /// Configuration loading or validation error.
    #[error("config error: {reason}")]
    ConfigError {
        reason: String,
    },
}

impl InferenceError {
    /// Whether a retry of the same request may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            InferenceError::ConnectionFailed { .. } | InferenceError::Timeout { .. } => true,
            InferenceError::HttpError { status, .. } => *status == 429 || *status >= 500,
            _ => false,
        }
    }

    /// Extract the error body text, if this is an `HttpError`.
    pub fn error_body(&self) -> Option<&str> {
        match self {
            InferenceError::HttpError { body, .. } => Some(body),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_statuses() {
        assert!(InferenceError::HttpError {
            status: 503,
            body: String::new()
        }
        .is_retryable());
        assert!(InferenceError::HttpError {
            status: 429,
            body: String::new()
        }
        .is_retryable());
        assert!(!InferenceError::HttpError {
            status: 400,
            body: String::new()
        }
        .is_retryable());
        assert!(InferenceError::Timeout { duration_secs: 5 }.is_retryable());
    }

    #[test]
    fn test_error_body() {
        let err = InferenceError::HttpError {
            status: 500,
            body: "boom".into(),
        };
        assert_eq!(err.error_body(), Some("boom"));
        assert!(InferenceError::Timeout { duration_secs: 1 }
            .error_body()
            .is_none());
    }
}
