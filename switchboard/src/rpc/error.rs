//! RPC error kinds and failure classification.
//!
//! Only `Transient` counts toward the circuit breaker: application-level
//! failures (`AgentRejected`) and permanent HTTP errors never trip it.

use thiserror::Error;

/// Error kind set for the agent RPC boundary.
#[derive(Debug, Error)]
pub enum RpcError {
    /// Malformed payload on either side of the wire.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Fast-fail because the endpoint's circuit is open.
    #[error("circuit open for {endpoint}")]
    CircuitOpen { endpoint: String },

    /// Network timeout, connection failure, or 5xx / 408 / 429. Retried with backoff.
    #[error("transient: {0}")]
    Transient(String),

    /// 4xx other than 408/429. Not retried.
    #[error("permanent (status {status}): {message}")]
    Permanent { status: u16, message: String },

    /// The agent returned a structured failure. Not a transport error.
    #[error("agent rejected task: {reason}")]
    AgentRejected { reason: String },

    /// Response body did not decode into the expected shape.
    #[error("serialization: {0}")]
    Serialization(String),
}

impl RpcError {
    /// True when this failure counts toward the endpoint's circuit breaker.
    pub fn is_transport_failure(&self) -> bool {
        matches!(self, RpcError::Transient(_))
    }

    /// True when the retry loop should attempt again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RpcError::Transient(_))
    }

    /// Classifies an HTTP status into Transient or Permanent.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let message = message.into();
        if status >= 500 || status == 408 || status == 429 {
            RpcError::Transient(format!("status {}: {}", status, message))
        } else {
            RpcError::Permanent { status, message }
        }
    }
}

impl From<reqwest::Error> for RpcError {
    fn from(e: reqwest::Error) -> Self {
        if let Some(status) = e.status() {
            RpcError::from_status(status.as_u16(), e.to_string())
        } else {
            // Timeouts, connect failures, and body errors are all transport-level.
            RpcError::Transient(e.to_string())
        }
    }
}

impl From<serde_json::Error> for RpcError {
    fn from(e: serde_json::Error) -> Self {
        RpcError::Serialization(e.to_string())
    }
}
