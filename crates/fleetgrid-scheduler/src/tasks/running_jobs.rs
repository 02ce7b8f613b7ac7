//! Follow jobs that hold an instance.
//!
//! Each job's runner is polled under the runner timeout and the job is
//! advanced to what the runner reports. A runner that cannot be reached
//! leaves the job exactly as it was. Jobs past the run's `max_duration`
//! are terminated without asking the runner.

use tracing::{debug, error, info};

use fleetgrid_lifecycle::job::{apply_transition, start_termination};
use fleetgrid_lifecycle::LifecycleResult;
use fleetgrid_state::{epoch_secs, Job, JobStatus, JobTerminationReason};

use crate::context::SchedulerContext;
use crate::error::SchedulerResult;
use crate::runner::RunnerJobState;

/// Statuses a job passes through on its way to running, in order.
const PROGRESSION: [JobStatus; 3] = [JobStatus::Provisioning, JobStatus::Pulling, JobStatus::Running];

pub async fn process_running_jobs(ctx: &SchedulerContext) -> anyhow::Result<()> {
    let claim = ctx.claim(&ctx.claims.jobs, |j: &Job| j.status.is_active())?;
    if claim.is_empty() {
        return Ok(());
    }

    for id in claim.ids() {
        if let Err(e) = process_running_job(ctx, id).await {
            error!(job = %id, error = %e, "failed to process running job");
        }
    }
    ctx.store.touch::<Job>(claim.ids(), epoch_secs())?;
    Ok(())
}

async fn process_running_job(ctx: &SchedulerContext, id: &str) -> SchedulerResult<()> {
    let Some(job) = ctx.store.get_job(id)? else {
        return Ok(());
    };
    let now = epoch_secs();
    let max_duration = ctx.store.get_run(&job.run_id)?.and_then(|r| r.spec.max_duration);
    if let Some(max) = max_duration {
        let since = job.started_at.unwrap_or(job.submitted_at);
        if now.saturating_sub(since) > max {
            info!(job = %job.id, max_duration_secs = max, "job exceeded max duration");
            return update_job(ctx, &job.id, |j| {
                start_termination(
                    j,
                    JobTerminationReason::MaxDurationExceeded,
                    Some(format!("exceeded max duration of {max}s")),
                    now,
                )
            });
        }
    }

    let Some(runner) = &ctx.runner else {
        return Ok(());
    };
    let Some(state) = ctx
        .call_runner("get_job_state", &job.id, runner.get_job_state(&job))
        .await
    else {
        return Ok(());
    };

    debug!(job = %job.id, status = ?job.status, runner_state = ?state, "runner state");
    update_job(ctx, &job.id, |j| advance(j, &state, now))
}

/// Apply a runner report to a job. A job that stopped being active since
/// it was loaded is left alone.
fn advance(job: &mut Job, state: &RunnerJobState, now: u64) -> LifecycleResult<()> {
    if !job.status.is_active() {
        return Ok(());
    }
    match state {
        RunnerJobState::Provisioning => Ok(()),
        RunnerJobState::Pulling => step_to(job, JobStatus::Pulling, now),
        RunnerJobState::Running => step_to(job, JobStatus::Running, now),
        RunnerJobState::Done => {
            step_to(job, JobStatus::Running, now)?;
            start_termination(job, JobTerminationReason::DoneByRunner, None, now)
        }
        RunnerJobState::Failed { reason, message } => {
            start_termination(job, *reason, message.clone(), now)
        }
    }
}

/// Walk forward along [`PROGRESSION`] up to `target`. Never moves back.
fn step_to(job: &mut Job, target: JobStatus, now: u64) -> LifecycleResult<()> {
    let position = |s: JobStatus| PROGRESSION.iter().position(|p| *p == s);
    let (Some(from), Some(to)) = (position(job.status), position(target)) else {
        return Ok(());
    };
    for status in PROGRESSION.iter().take(to + 1).skip(from + 1) {
        apply_transition(job, *status, now)?;
    }
    Ok(())
}

fn update_job<F>(ctx: &SchedulerContext, id: &str, mutate: F) -> SchedulerResult<()>
where
    F: FnOnce(&mut Job) -> LifecycleResult<()>,
{
    let mut outcome = Ok(());
    ctx.store.update::<Job, _>(id, |job| outcome = mutate(job))?;
    Ok(outcome?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use fleetgrid_state::{BackendType, Run, RunSpec};
    use std::sync::Arc;

    struct Setup {
        ctx: SchedulerContext,
        runner: Arc<FakeRunner>,
        run: Run,
    }

    fn setup(spec: RunSpec) -> Setup {
        let runner = Arc::new(FakeRunner::default());
        let ctx = test_context(Arc::new(FakeCompute::new(BackendType::Aws))).with_runner(runner.clone());
        let run = test_run("run-1", spec);
        ctx.store.put_run(&run).unwrap();
        Setup { ctx, runner, run }
    }

    fn put_job(s: &Setup, replica: u32, status: JobStatus) -> Job {
        let mut job = test_job(&s.run, replica, status);
        provisioned(&mut job);
        s.ctx.store.put_job(&job).unwrap();
        job
    }

    fn reload(s: &Setup, job: &Job) -> Job {
        s.ctx.store.get_job(&job.id).unwrap().unwrap()
    }

    #[tokio::test]
    async fn follows_runner_through_pulling_to_running() {
        let s = setup(test_spec());
        let job = put_job(&s, 0, JobStatus::Provisioning);

        s.runner.set_state(&job.id, RunnerJobState::Pulling);
        process_running_jobs(&s.ctx).await.unwrap();
        assert_eq!(reload(&s, &job).status, JobStatus::Pulling);

        s.runner.set_state(&job.id, RunnerJobState::Running);
        process_running_jobs(&s.ctx).await.unwrap();
        let current = reload(&s, &job);
        assert_eq!(current.status, JobStatus::Running);
        assert!(current.started_at.is_some());
    }

    #[tokio::test]
    async fn skipped_steps_are_walked() {
        let s = setup(test_spec());
        let job = put_job(&s, 0, JobStatus::Provisioning);
        s.runner.set_state(&job.id, RunnerJobState::Done);

        process_running_jobs(&s.ctx).await.unwrap();

        let current = reload(&s, &job);
        assert_eq!(current.status, JobStatus::Terminating);
        assert_eq!(current.termination_reason, Some(JobTerminationReason::DoneByRunner));
    }

    #[tokio::test]
    async fn runner_failure_terminates_with_reported_reason() {
        let s = setup(test_spec());
        let job = put_job(&s, 0, JobStatus::Running);
        s.runner.set_state(
            &job.id,
            RunnerJobState::Failed {
                reason: JobTerminationReason::ContainerExitedWithError,
                message: Some("exit code 1".to_string()),
            },
        );

        process_running_jobs(&s.ctx).await.unwrap();

        let current = reload(&s, &job);
        assert_eq!(current.status, JobStatus::Terminating);
        assert_eq!(
            current.termination_reason,
            Some(JobTerminationReason::ContainerExitedWithError)
        );
        assert_eq!(current.status_message.as_deref(), Some("exit code 1"));
    }

    #[tokio::test]
    async fn unreachable_or_hung_runner_leaves_job_untouched() {
        let s = setup(test_spec());
        let unreachable = put_job(&s, 0, JobStatus::Running);
        let before = reload(&s, &unreachable);

        process_running_jobs(&s.ctx).await.unwrap();
        let after = reload(&s, &unreachable);
        assert_eq!(after.status, before.status);
        assert_eq!(after.termination_reason, None);

        s.runner.set_state(&unreachable.id, RunnerJobState::Done);
        s.runner.hang();
        process_running_jobs(&s.ctx).await.unwrap();
        assert_eq!(reload(&s, &unreachable).status, JobStatus::Running);
        assert!(s.ctx.claims.jobs.is_empty());
    }

    #[tokio::test]
    async fn max_duration_terminates_job() {
        let mut spec = test_spec();
        spec.max_duration = Some(60);
        let s = setup(spec);
        let mut job = test_job(&s.run, 0, JobStatus::Running);
        provisioned(&mut job);
        job.started_at = Some(epoch_secs() - 120);
        s.ctx.store.put_job(&job).unwrap();
        s.runner.set_state(&job.id, RunnerJobState::Running);

        process_running_jobs(&s.ctx).await.unwrap();

        let current = reload(&s, &job);
        assert_eq!(current.status, JobStatus::Terminating);
        assert_eq!(
            current.termination_reason,
            Some(JobTerminationReason::MaxDurationExceeded)
        );
    }

    #[test]
    fn stale_report_never_moves_backwards() {
        let run = test_run("run-1", test_spec());
        let mut job = test_job(&run, 0, JobStatus::Running);
        advance(&mut job, &RunnerJobState::Pulling, 10).unwrap();
        assert_eq!(job.status, JobStatus::Running);

        job.status = JobStatus::Terminating;
        advance(&mut job, &RunnerJobState::Running, 11).unwrap();
        assert_eq!(job.status, JobStatus::Terminating);
    }
}
