//! Upstream Error Module
//!
//! The single typed error surfaced by the resilience layer, plus the
//! classifier deciding which failures are worth another attempt.

use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

// == Error Class ==
/// How a failure should be treated by callers and by the retry executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Network failure, 5xx or 429. Another attempt may succeed.
    Transient,
    /// Any other 4xx. The request itself is wrong; never retried.
    Fatal,
    /// The overall retry budget elapsed before a response was obtained.
    TimeoutExceeded,
    /// A circuit breaker rejected the call without attempting it.
    CircuitOpen,
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ErrorClass::Transient => "transient",
            ErrorClass::Fatal => "fatal",
            ErrorClass::TimeoutExceeded => "timeout_exceeded",
            ErrorClass::CircuitOpen => "circuit_open",
        };
        f.write_str(label)
    }
}

/// Where the error came from. Only upstream errors are classified by status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    Upstream,
    Deadline,
    Breaker,
}

// == Classifier ==
/// Classifies an optional HTTP-like status.
///
/// No status (network failure, abort), 429 and 5xx are transient.
/// Every other 4xx is fatal. Anything else observed as a failure
/// (1xx/2xx/3xx surfaced as an error by a caller) is treated as transient.
pub fn classify_status(status: Option<u16>) -> ErrorClass {
    match status {
        Some(429) => ErrorClass::Transient,
        Some(code) if (400..500).contains(&code) => ErrorClass::Fatal,
        _ => ErrorClass::Transient,
    }
}

// == Upstream Error ==
/// Normalized failure of a call to an external dependency.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct UpstreamError {
    message: String,
    status: Option<u16>,
    code: Option<String>,
    provider: Option<String>,
    origin: Origin,
}

impl UpstreamError {
    /// Creates an upstream failure with no status, i.e. a network-level failure.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status: None,
            code: None,
            provider: None,
            origin: Origin::Upstream,
        }
    }

    /// Creates an upstream failure carrying the response status.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        Self::new(message).with_status(status)
    }

    /// The overall retry budget ran out; no response was ever obtained.
    pub fn timeout(budget: Duration) -> Self {
        Self {
            origin: Origin::Deadline,
            code: Some("TIMEOUT_EXCEEDED".to_string()),
            ..Self::new(format!(
                "Operation timed out after {}ms",
                budget.as_millis()
            ))
        }
    }

    /// A breaker refused the call without invoking it.
    pub fn circuit_open(breaker: &str) -> Self {
        Self {
            origin: Origin::Breaker,
            code: Some("CIRCUIT_OPEN".to_string()),
            provider: Some(breaker.to_string()),
            ..Self::new(format!("Circuit breaker '{}' is open", breaker))
        }
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    /// Tags the error with the dependency that produced it.
    pub fn with_provider(mut self, provider: impl Into<String>) -> Self {
        self.provider = Some(provider.into());
        self
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn status(&self) -> Option<u16> {
        self.status
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn provider(&self) -> Option<&str> {
        self.provider.as_deref()
    }

    // == Classification ==
    /// Returns the class of this failure.
    pub fn class(&self) -> ErrorClass {
        match self.origin {
            Origin::Upstream => classify_status(self.status),
            Origin::Deadline => ErrorClass::TimeoutExceeded,
            Origin::Breaker => ErrorClass::CircuitOpen,
        }
    }

    /// True only for transient upstream failures.
    pub fn is_retryable(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    /// True when no response was ever obtained because the budget elapsed.
    pub fn is_timeout(&self) -> bool {
        self.origin == Origin::Deadline
    }

    pub fn is_circuit_open(&self) -> bool {
        self.origin == Origin::Breaker
    }

    /// Status code an HTTP-facing caller should answer with.
    pub fn http_status(&self) -> u16 {
        match self.class() {
            ErrorClass::TimeoutExceeded => 504,
            ErrorClass::CircuitOpen => 503,
            ErrorClass::Transient | ErrorClass::Fatal => match self.status {
                Some(code) if (400..600).contains(&code) => code,
                _ => 502,
            },
        }
    }
}

impl From<std::io::Error> for UpstreamError {
    fn from(err: std::io::Error) -> Self {
        UpstreamError::new(err.to_string()).with_code(format!("{:?}", err.kind()))
    }
}

impl From<String> for UpstreamError {
    fn from(message: String) -> Self {
        UpstreamError::new(message)
    }
}

impl From<&str> for UpstreamError {
    fn from(message: &str) -> Self {
        UpstreamError::new(message)
    }
}

/// Convenience Result type for guarded upstream calls.
pub type UpstreamResult<T> = std::result::Result<T, UpstreamError>;

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_missing_status_is_transient() {
        assert_eq!(classify_status(None), ErrorClass::Transient);
    }

    #[test]
    fn test_classify_server_errors_are_transient() {
        for code in [500, 502, 503, 504, 599] {
            assert_eq!(classify_status(Some(code)), ErrorClass::Transient, "{}", code);
        }
    }

    #[test]
    fn test_classify_rate_limit_is_transient() {
        assert_eq!(classify_status(Some(429)), ErrorClass::Transient);
    }

    #[test]
    fn test_classify_client_errors_are_fatal() {
        for code in [400, 401, 403, 404, 409, 422, 499] {
            assert_eq!(classify_status(Some(code)), ErrorClass::Fatal, "{}", code);
        }
    }

    #[test]
    fn test_timeout_is_terminal() {
        let err = UpstreamError::timeout(Duration::from_millis(250));
        assert!(err.is_timeout());
        assert!(!err.is_retryable());
        assert_eq!(err.class(), ErrorClass::TimeoutExceeded);
        assert_eq!(err.http_status(), 504);
        assert!(err.message().contains("250ms"));
    }

    #[test]
    fn test_circuit_open_is_terminal() {
        let err = UpstreamError::circuit_open("payments");
        assert!(err.is_circuit_open());
        assert!(!err.is_retryable());
        assert_eq!(err.provider(), Some("payments"));
        assert_eq!(err.http_status(), 503);
    }

    #[test]
    fn test_http_status_mapping() {
        assert_eq!(UpstreamError::new("connection reset").http_status(), 502);
        assert_eq!(UpstreamError::from_status(404, "missing").http_status(), 404);
        assert_eq!(UpstreamError::from_status(503, "busy").http_status(), 503);
        assert_eq!(UpstreamError::from_status(302, "moved").http_status(), 502);
    }

    #[test]
    fn test_builder_preserves_fields() {
        let err = UpstreamError::from_status(402, "card declined")
            .with_code("card_declined")
            .with_provider("billing");

        assert_eq!(err.to_string(), "card declined");
        assert_eq!(err.status(), Some(402));
        assert_eq!(err.code(), Some("card_declined"));
        assert_eq!(err.provider(), Some("billing"));
        assert_eq!(err.class(), ErrorClass::Fatal);
    }

    #[test]
    fn test_io_error_is_transient() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "refused");
        let err = UpstreamError::from(io);
        assert!(err.is_retryable());
        assert_eq!(err.code(), Some("ConnectionRefused"));
    }
}
