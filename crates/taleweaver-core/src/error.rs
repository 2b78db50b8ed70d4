//! ============================================================================
//! Core Errors - Failure taxonomy for the story engine
//! ============================================================================
//! Every fallible path in the crate surfaces one of these variants so that
//! callers can distinguish technical faults (timeout, open breaker, provider
//! failure) from content-level rejection by the safety gate.
//! ============================================================================

use thiserror::Error;

/// Errors produced by the taleweaver core.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Malformed or empty input (e.g. embedding an empty string).
    #[error("validation error: {0}")]
    Validation(String),

    /// A query or document embedding does not match the store's dimensionality.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// An operation exceeded its deadline.
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// The circuit breaker guarding a dependency is open.
    #[error("{name}: circuit breaker is open - service temporarily unavailable")]
    CircuitOpen { name: String },

    /// A wrapped failure from an external provider call.
    #[error("{provider} provider error: {message}")]
    Provider { provider: String, message: String },

    /// The safety gate rejected generated content. Not a technical fault.
    #[error("content rejected by safety validation: {}", concerns.join(", "))]
    SafetyRejection { concerns: Vec<String> },
}

impl CoreError {
    /// Shorthand for a provider failure.
    pub fn provider(provider: impl Into<String>, message: impl ToString) -> Self {
        CoreError::Provider {
            provider: provider.into(),
            message: message.to_string(),
        }
    }

    /// True when the failure is content rejection rather than a fault.
    pub fn is_rejection(&self) -> bool {
        matches!(self, CoreError::SafetyRejection { .. })
    }
}
