//! Error types for webhook dispatch operations.
//!
//! Every failure mode of a delivery attempt is categorized here so retry
//! decisions can be made from the error alone. Transport problems and any
//! HTTP error status are retryable up to the attempt budget; security
//! blocks and configuration mistakes are not.

use std::time::Duration;

use hookwire_core::CoreError;
use thiserror::Error;

/// Result type alias for dispatch operations.
pub type Result<T> = std::result::Result<T, DeliveryError>;

/// Error types for webhook dispatch operations.
#[derive(Debug, Clone, Error)]
pub enum DeliveryError {
    /// Network-level connectivity failure.
    #[error("network connection failed: {message}")]
    Network {
        /// Description of the network failure.
        message: String,
    },

    /// HTTP request timeout exceeded.
    #[error("request timeout after {timeout_seconds}s")]
    Timeout {
        /// Seconds before the request timed out.
        timeout_seconds: u64,
    },

    /// HTTP response indicated client error (4xx).
    #[error("client error: HTTP {status_code}")]
    ClientError {
        /// HTTP status code (4xx).
        status_code: u16,
        /// Response body content, truncated.
        body: String,
    },

    /// HTTP response indicated server error (5xx).
    #[error("server error: HTTP {status_code}")]
    ServerError {
        /// HTTP status code (5xx).
        status_code: u16,
        /// Response body content, truncated.
        body: String,
    },

    /// Destination URL failed security validation.
    #[error("destination blocked: {reason}")]
    SecurityBlocked {
        /// Why the destination was rejected.
        reason: String,
    },

    /// Trigger named an event type the entity never declared.
    #[error("unknown event type: {name}")]
    UnknownEventType {
        /// The undeclared full event name.
        name: String,
    },

    /// Invalid engine or endpoint configuration.
    #[error("invalid configuration: {message}")]
    Configuration {
        /// Configuration error message.
        message: String,
    },

    /// Durable-store operation failed during dispatch.
    #[error("storage error: {0}")]
    Storage(#[from] CoreError),

    /// Worker shutdown exceeded its grace period.
    #[error("shutdown timed out after {timeout:?}")]
    ShutdownTimeout {
        /// The grace period that elapsed.
        timeout: Duration,
    },

    /// A worker task panicked.
    #[error("worker {worker_id} panicked: {message}")]
    WorkerPanic {
        /// Identifier of the panicked worker.
        worker_id: usize,
        /// Panic description.
        message: String,
    },

    /// Unexpected internal error.
    #[error("internal delivery error: {message}")]
    Internal {
        /// Internal error message.
        message: String,
    },
}

impl DeliveryError {
    /// Creates a network error from a message.
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network { message: message.into() }
    }

    /// Creates a timeout error.
    pub fn timeout(timeout_seconds: u64) -> Self {
        Self::Timeout { timeout_seconds }
    }

    /// Creates a client error from an HTTP response.
    pub fn client_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ClientError { status_code, body: body.into() }
    }

    /// Creates a server error from an HTTP response.
    pub fn server_error(status_code: u16, body: impl Into<String>) -> Self {
        Self::ServerError { status_code, body: body.into() }
    }

    /// Creates a security-block error.
    pub fn security_blocked(reason: impl Into<String>) -> Self {
        Self::SecurityBlocked { reason: reason.into() }
    }

    /// Creates an unknown-event-type error.
    pub fn unknown_event_type(name: impl Into<String>) -> Self {
        Self::UnknownEventType { name: name.into() }
    }

    /// Creates a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration { message: message.into() }
    }

    /// Creates an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into() }
    }

    /// Returns true if the failure is temporary and the attempt should be
    /// retried.
    ///
    /// Network errors, timeouts, every HTTP error status, and storage
    /// failures are retryable; only the attempt budget ends the series. A
    /// receiver refusing with a 4xx today may accept tomorrow (expired
    /// credentials rotated back in, a route redeployed), so status codes
    /// never short-circuit the budget. Security blocks and configuration
    /// problems will fail the same way every time, so retrying them only
    /// burns attempts.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network { .. }
            | Self::Timeout { .. }
            | Self::ClientError { .. }
            | Self::ServerError { .. }
            | Self::Storage(_) => true,

            Self::SecurityBlocked { .. }
            | Self::UnknownEventType { .. }
            | Self::Configuration { .. }
            | Self::ShutdownTimeout { .. }
            | Self::WorkerPanic { .. }
            | Self::Internal { .. } => false,
        }
    }
}
