use fleetgrid_state::{JobStatus, JobTerminationReason, VolumeStatus};
use thiserror::Error;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LifecycleError {
    #[error("job {job}: invalid transition {from:?} -> {to:?}")]
    InvalidJobTransition {
        job: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// A terminating job may only finish in the status its termination
    /// reason maps to.
    #[error("job {job}: termination reason {reason} finishes as {expected:?}, not {to:?}")]
    ReasonMismatch {
        job: String,
        reason: JobTerminationReason,
        expected: JobStatus,
        to: JobStatus,
    },

    #[error("volume {volume}: invalid transition {from:?} -> {to:?}")]
    InvalidVolumeTransition {
        volume: String,
        from: VolumeStatus,
        to: VolumeStatus,
    },

    #[error("invalid duration: {0:?}")]
    InvalidDuration(String),
}
