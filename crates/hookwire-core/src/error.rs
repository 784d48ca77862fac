//! Error types and result handling for core operations.
//!
//! Covers validation failures, missing records, and uniqueness violations
//! raised by the durable store. Delivery-time failures (network, HTTP,
//! security) live in the delivery crate's own taxonomy.

use thiserror::Error;

/// Result type alias using `CoreError`.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Core error type for domain and storage operations.
#[derive(Debug, Clone, Error)]
pub enum CoreError {
    /// Entity not found.
    #[error("not found: {0}")]
    NotFound(String),

    /// Uniqueness or referential constraint violated.
    ///
    /// Raised by the store when an event's idempotency key collides with an
    /// existing one. Idempotency keys are assigned once and never reused, so
    /// a collision always fails creation.
    #[error("constraint violation: {0}")]
    ConstraintViolation(String),

    /// Invalid input supplied by the caller.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Underlying storage failure.
    #[error("storage error: {0}")]
    Storage(String),
}

impl CoreError {
    /// Creates a not-found error.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound(message.into())
    }

    /// Creates a constraint-violation error.
    pub fn constraint(message: impl Into<String>) -> Self {
        Self::ConstraintViolation(message.into())
    }

    /// Creates an invalid-input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Creates a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_format() {
        let error = CoreError::not_found("endpoint abc");
        assert_eq!(error.to_string(), "not found: endpoint abc");

        let error = CoreError::constraint("duplicate idempotency key");
        assert_eq!(error.to_string(), "constraint violation: duplicate idempotency key");
    }
}
