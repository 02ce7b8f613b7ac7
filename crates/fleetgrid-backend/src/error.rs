//! Backend error types.

use std::time::Duration;

use thiserror::Error;

pub type BackendResult<T> = Result<T, BackendError>;

/// Provider-reported, recoverable failures.
///
/// Every variant is something a periodic task surfaces as a
/// `status_message` and then retries or turns into a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    #[error("no capacity: {0}")]
    NoCapacity(String),

    /// The resource is still referenced by something else (e.g. a placement
    /// group with instances in it).
    #[error("resource in use: {0}")]
    InUse(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not supported: {0}")]
    Unsupported(String),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("rate limited: {0}")]
    RateLimited(String),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("provider error: {0}")]
    Provider(String),
}

impl BackendError {
    pub fn is_in_use(&self) -> bool {
        matches!(self, Self::InUse(_))
    }

    pub fn is_no_capacity(&self) -> bool {
        matches!(self, Self::NoCapacity(_))
    }
}

/// Outcome of a backend call dispatched to the blocking pool.
#[derive(Debug, Error)]
pub enum CallError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    /// The backend implementation panicked. Not a provider failure: callers
    /// log it and leave the entity untouched.
    #[error("backend call panicked: {0}")]
    Panicked(String),

    #[error("blocking pool is closed")]
    PoolClosed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_distinguished_errors() {
        assert!(BackendError::InUse("pg-1".to_string()).is_in_use());
        assert!(!BackendError::Provider("boom".to_string()).is_in_use());
        assert!(BackendError::NoCapacity("a100".to_string()).is_no_capacity());
    }

    #[test]
    fn call_error_wraps_backend_error() {
        let err: CallError = BackendError::NotFound("vol-1".to_string()).into();
        assert_eq!(err.to_string(), "not found: vol-1");
    }
}
