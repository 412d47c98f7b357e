//! Error types for the Nimbus operator

use thiserror::Error;

use crate::graph::ValidationError;

/// Main error type for Nimbus operations
///
/// NotFound is deliberately absent: the store boundary maps a missing
/// object to `Ok(None)` so convergence code can treat it as the create
/// path rather than a failure.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {0}")]
    Kube(#[from] kube::Error),

    /// Optimistic-concurrency conflict from the state store
    #[error("conflict: {0}")]
    Conflict(String),

    /// Workflow graph or domain invariant violation
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Serialization/deserialization error
    #[error("serialization error: {0}")]
    Serialization(String),

    /// External-resource cleanup failed during finalization
    #[error("cleanup error: {0}")]
    Cleanup(String),

    /// A store call exceeded its deadline
    #[error("deadline exceeded: {0}")]
    Deadline(String),
}

impl Error {
    /// Create a conflict error with the given message
    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    /// Create a serialization error with the given message
    pub fn serialization(msg: impl Into<String>) -> Self {
        Self::Serialization(msg.into())
    }

    /// Create a cleanup error with the given message
    pub fn cleanup(msg: impl Into<String>) -> Self {
        Self::Cleanup(msg.into())
    }

    /// Create a deadline error with the given message
    pub fn deadline(msg: impl Into<String>) -> Self {
        Self::Deadline(msg.into())
    }

    /// Whether this error is an optimistic-concurrency conflict
    ///
    /// Conflicts are retried with a refreshed read; every other store error
    /// bubbles up to the controller's error policy for a backoff requeue.
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict(_) => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 409,
            _ => false,
        }
    }
}
