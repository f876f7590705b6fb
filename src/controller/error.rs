//! Error types for the controller.
//!
//! Defines custom error types with classification for retry behavior.
//! There is no split-brain variant: a partition is a detected state,
//! not a reconcile failure.

use std::time::Duration;
use thiserror::Error;

/// Error type for controller operations
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Write rejected because the object changed since it was read
    #[error("Version conflict writing {0}")]
    Conflict(String),

    /// Read-modify-write gave up after repeated conflicts
    #[error("Gave up writing {name} after {attempts} conflicting attempts")]
    ConflictRetriesExhausted { name: String, attempts: u32 },

    /// An external call exceeded its deadline
    #[error("Timed out after {after:?}: {operation}")]
    Timeout { operation: String, after: Duration },

    /// One or more spec violations, all reported together
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    /// Missing required field in resource
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// Administrative query against a Neo4j server failed
    #[error("Admin query to {pod} failed: {message}")]
    AdminQuery { pod: String, message: String },

    /// Transient error that should be retried
    #[error("Transient error: {0}")]
    Transient(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error indicates a not-found condition
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 404)
    }

    /// Check if this error indicates an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Conflict(_))
            || matches!(self, Error::Kube(kube::Error::Api(e)) if e.code == 409)
    }

    /// Check if this error should be retried
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube(e) => {
                // Retry on network errors, rate limiting, conflicts, and server errors
                matches!(
                    e,
                    kube::Error::Api(api_err)
                        if api_err.code >= 500 || api_err.code == 429 || api_err.code == 409
                ) || matches!(e, kube::Error::Service(_))
            }
            Error::Conflict(_)
            | Error::ConflictRetriesExhausted { .. }
            | Error::Timeout { .. }
            | Error::AdminQuery { .. }
            | Error::Transient(_) => true,
            Error::Validation(_) | Error::MissingField(_) | Error::Serialization(_) => false,
        }
    }

    /// Get the recommended requeue duration for this error
    pub fn requeue_after(&self) -> Duration {
        match self {
            // Contention and slow calls usually clear quickly
            Error::Conflict(_) | Error::ConflictRetriesExhausted { .. } | Error::Timeout { .. } => {
                Duration::from_secs(10)
            }
            e if e.is_retryable() => Duration::from_secs(30),
            // Spec must be edited, which triggers a watch event anyway
            _ => Duration::from_secs(300),
        }
    }

    /// Validation messages, if this is a validation error
    pub fn violations(&self) -> &[String] {
        match self {
            Error::Validation(v) => v,
            _ => &[],
        }
    }
}

/// Result type alias for controller operations
pub type Result<T> = std::result::Result<T, Error>;
