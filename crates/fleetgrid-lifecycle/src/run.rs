//! Run status derivation.
//!
//! A run has no transitions of its own while it is active: its status is a
//! function of the latest submission of each (replica, job) slot. Earlier
//! submissions are history and are ignored. Replicas removed by scaling
//! down are ignored as well.

use std::collections::BTreeMap;

use fleetgrid_state::{Job, JobStatus, JobTerminationReason, RunStatus, RunTerminationReason};

/// Run status computed from its jobs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedRunStatus {
    pub status: RunStatus,
    /// Set only for finished runs.
    pub termination_reason: Option<RunTerminationReason>,
    pub status_message: Option<String>,
}

/// The highest-numbered submission of each (replica, job) slot, in slot
/// order.
pub fn latest_submissions(jobs: &[Job]) -> Vec<&Job> {
    let mut latest: BTreeMap<(u32, u32), &Job> = BTreeMap::new();
    for job in jobs {
        let slot = latest.entry((job.replica_num, job.job_num)).or_insert(job);
        if job.submission_num > slot.submission_num {
            *slot = job;
        }
    }
    latest.into_values().collect()
}

/// Run termination reason implied by a finished job.
pub fn run_termination_reason(job: &Job) -> RunTerminationReason {
    match (job.status, job.termination_reason) {
        (JobStatus::Done, _) => RunTerminationReason::AllJobsDone,
        (_, Some(JobTerminationReason::AbortedByUser)) => RunTerminationReason::AbortedByUser,
        (_, Some(JobTerminationReason::TerminatedByUser)) => RunTerminationReason::StoppedByUser,
        _ => RunTerminationReason::JobFailed,
    }
}

/// Derive a run's status from all of its job submissions.
///
/// Returns `None` when no slot is live (a fresh run or a service scaled to
/// zero); the caller keeps the run's current status.
pub fn derive_run_status(jobs: &[Job]) -> Option<DerivedRunStatus> {
    let live: Vec<&Job> = latest_submissions(jobs)
        .into_iter()
        .filter(|j| j.termination_reason != Some(JobTerminationReason::ScaledDown))
        .collect();
    if live.is_empty() {
        return None;
    }

    if live.iter().all(|j| j.status.is_finished()) {
        let derived = match live.iter().find(|j| j.status != JobStatus::Done) {
            None => DerivedRunStatus {
                status: RunStatus::Done,
                termination_reason: Some(RunTerminationReason::AllJobsDone),
                status_message: None,
            },
            Some(job) => {
                let reason = run_termination_reason(job);
                DerivedRunStatus {
                    status: reason.to_status(),
                    termination_reason: Some(reason),
                    status_message: job.termination_reason.map(|r| r.to_string()),
                }
            }
        };
        return Some(derived);
    }

    let any = |statuses: &[JobStatus]| live.iter().any(|j| statuses.contains(&j.status));
    let status = if any(&[JobStatus::Running, JobStatus::Pulling]) {
        RunStatus::Running
    } else if any(&[JobStatus::Provisioning]) {
        RunStatus::Provisioning
    } else if any(&[JobStatus::Terminating]) {
        RunStatus::Terminating
    } else {
        RunStatus::Submitted
    };
    Some(DerivedRunStatus {
        status,
        termination_reason: None,
        status_message: None,
    })
}
