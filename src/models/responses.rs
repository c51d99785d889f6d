//! Response DTOs for the operator API
//!
//! Defines the structure of outgoing HTTP response bodies.

use serde::Serialize;
use serde_json::Value;

use crate::resilience::BreakerSnapshot;

/// Response body for `GET /cache/:namespace/:key`
#[derive(Debug, Clone, Serialize)]
pub struct GetResponse {
    pub namespace: String,
    pub key: String,
    /// The stored value
    pub value: Value,
}

impl GetResponse {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value,
        }
    }
}

/// Response body for `PUT /cache/:namespace/:key`
#[derive(Debug, Clone, Serialize)]
pub struct SetResponse {
    /// Success message
    pub message: String,
    pub namespace: String,
    pub key: String,
}

impl SetResponse {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let key = key.into();
        Self {
            message: format!("Key '{}' set in '{}'", key, namespace),
            namespace,
            key,
        }
    }
}

/// Response body for `DELETE /cache/:namespace/:key`
#[derive(Debug, Clone, Serialize)]
pub struct DeleteResponse {
    /// Success message
    pub message: String,
    pub namespace: String,
    pub key: String,
}

impl DeleteResponse {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>) -> Self {
        let namespace = namespace.into();
        let key = key.into();
        Self {
            message: format!("Key '{}' deleted from '{}'", key, namespace),
            namespace,
            key,
        }
    }
}

/// Response body for `DELETE /cache/:namespace`
#[derive(Debug, Clone, Serialize)]
pub struct FlushResponse {
    pub message: String,
    pub namespace: String,
}

impl FlushResponse {
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            message: format!("Namespace '{}' flushed", namespace),
            namespace,
        }
    }
}

/// Response body for `GET /breakers`
#[derive(Debug, Clone, Serialize)]
pub struct BreakersResponse {
    pub breakers: Vec<BreakerSnapshot>,
}

/// Response body for the health endpoint (GET /health)
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    /// "healthy", or "degraded" while the cache store is unreachable or a breaker is not closed
    pub status: String,
    pub cache_ready: bool,
    /// Connection lifecycle state of the cache store
    pub cache_state: String,
    /// Redacted store target
    pub cache_backend: String,
    /// Breakers currently not closed
    pub open_breakers: Vec<String>,
    /// Current timestamp in ISO 8601 format
    pub timestamp: String,
}

impl HealthResponse {
    pub fn new(
        cache_ready: bool,
        cache_state: impl Into<String>,
        cache_backend: impl Into<String>,
        open_breakers: Vec<String>,
    ) -> Self {
        let status = if cache_ready && open_breakers.is_empty() {
            "healthy"
        } else {
            "degraded"
        };
        Self {
            status: status.to_string(),
            cache_ready,
            cache_state: cache_state.into(),
            cache_backend: cache_backend.into(),
            open_breakers,
            timestamp: chrono::Utc::now().to_rfc3339(),
        }
    }
}

/// Error response body for all error conditions
#[derive(Debug, Clone, Serialize)]
pub struct ErrorResponse {
    /// Error message describing what went wrong
    pub error: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}
