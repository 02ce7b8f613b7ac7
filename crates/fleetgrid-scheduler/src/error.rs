//! Scheduler error types.

use thiserror::Error;

/// Errors raised while processing a single entity.
///
/// A task logs these with the entity's ID and moves on to the next entity
/// of its batch; provider failures that are part of normal operation are
/// handled inside the task and never surface here.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("state store error: {0}")]
    State(#[from] fleetgrid_state::StateError),

    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] fleetgrid_lifecycle::LifecycleError),

    #[error("backend call failed: {0}")]
    Call(#[from] fleetgrid_backend::CallError),
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
