//! Job state machine.
//!
//! ```text
//! Submitted → Provisioning → Pulling → Running → Done
//!     │            │            │          │
//!     └────────────┴─────┬──────┴──────────┘
//!                        ▼
//!        Terminating → Terminated | Done | Failed | Aborted
//! ```
//!
//! Any non-terminal status may also jump straight to `Failed` or `Aborted`.
//! Terminal statuses have no outgoing edges.

use fleetgrid_state::{Job, JobStatus, JobTerminationReason};
use tracing::debug;

use crate::error::{LifecycleError, LifecycleResult};

use JobStatus::*;

/// Allowed edges, keyed by source status. Statuses absent from the table
/// are terminal.
const JOB_TRANSITIONS: &[(JobStatus, &[JobStatus])] = &[
    (Submitted, &[Provisioning, Terminating, Failed, Aborted]),
    (Provisioning, &[Pulling, Terminating, Failed, Aborted]),
    (Pulling, &[Running, Terminating, Failed, Aborted]),
    (Running, &[Done, Terminating, Failed, Aborted]),
    (Terminating, &[Terminated, Done, Failed, Aborted]),
];

/// Whether the table has an edge `from -> to`.
pub fn can_transition(from: JobStatus, to: JobStatus) -> bool {
    JOB_TRANSITIONS
        .iter()
        .find(|(source, _)| *source == from)
        .is_some_and(|(_, targets)| targets.contains(&to))
}

/// Move a job to `to`, stamping `started_at`/`finished_at`.
///
/// Leaving `Terminating` must land on the status the job's termination
/// reason maps to.
pub fn apply_transition(job: &mut Job, to: JobStatus, now: u64) -> LifecycleResult<()> {
    if !can_transition(job.status, to) {
        return Err(LifecycleError::InvalidJobTransition {
            job: job.id.clone(),
            from: job.status,
            to,
        });
    }

    if job.status == Terminating
        && let Some(reason) = job.termination_reason
        && reason.to_status() != to
    {
        return Err(LifecycleError::ReasonMismatch {
            job: job.id.clone(),
            reason,
            expected: reason.to_status(),
            to,
        });
    }

    debug!(job = %job.id, from = ?job.status, to = ?to, "job transition");
    job.status = to;
    if to == Running && job.started_at.is_none() {
        job.started_at = Some(now);
    }
    if to.is_finished() {
        job.finished_at = Some(now);
    }
    Ok(())
}

/// Begin terminating a job for the given reason.
///
/// A job that is already terminating keeps its original reason.
pub fn start_termination(
    job: &mut Job,
    reason: JobTerminationReason,
    message: Option<String>,
    now: u64,
) -> LifecycleResult<()> {
    if job.status == Terminating {
        return Ok(());
    }
    apply_transition(job, Terminating, now)?;
    job.termination_reason = Some(reason);
    if message.is_some() {
        job.status_message = message;
    }
    Ok(())
}

/// Finish a terminating job in the status its reason maps to.
/// A job without a reason is treated as terminated by the server.
pub fn finish_termination(job: &mut Job, now: u64) -> LifecycleResult<JobStatus> {
    let reason = *job
        .termination_reason
        .get_or_insert(JobTerminationReason::TerminatedByServer);
    let status = reason.to_status();
    apply_transition(job, status, now)?;
    Ok(status)
}
