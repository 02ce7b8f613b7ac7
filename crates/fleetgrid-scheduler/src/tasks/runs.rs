//! Reconcile runs with their jobs.
//!
//! For an active run this decides the replica count, submits a job for
//! every empty or retryable slot, scales surplus replicas down and derives
//! the run status from the latest submissions. For a terminating run it
//! pushes the termination down to the jobs and finishes the run once none
//! of them is left.

use std::collections::HashMap;

use tracing::{debug, error, info};

use fleetgrid_autoscale::get_service_scaler;
use fleetgrid_lifecycle::job::start_termination;
use fleetgrid_lifecycle::{
    derive_run_status, latest_submissions, retry_decision, run_termination_reason, RetryDecision,
};
use fleetgrid_state::{
    epoch_secs, Job, JobStatus, JobTerminationReason, Run, RunStatus, RunTerminationReason,
};

use crate::context::SchedulerContext;
use crate::error::SchedulerResult;

pub async fn process_runs(ctx: &SchedulerContext) -> anyhow::Result<()> {
    let claim = ctx.claim(&ctx.claims.runs, |r: &Run| !r.status.is_finished() && !r.deleted)?;
    if claim.is_empty() {
        return Ok(());
    }

    for id in claim.ids() {
        if let Err(e) = process_run(ctx, id).await {
            error!(run = %id, error = %e, "failed to process run");
        }
    }
    ctx.store.touch::<Run>(claim.ids(), epoch_secs())?;
    Ok(())
}

async fn process_run(ctx: &SchedulerContext, id: &str) -> SchedulerResult<()> {
    let Some(run) = ctx.store.get_run(id)? else {
        return Ok(());
    };
    if run.status == RunStatus::Terminating {
        process_terminating_run(ctx, run)
    } else {
        process_active_run(ctx, run).await
    }
}

fn process_terminating_run(ctx: &SchedulerContext, run: Run) -> SchedulerResult<()> {
    let now = epoch_secs();
    let reason = run.termination_reason.unwrap_or(RunTerminationReason::ServerError);
    let job_reason = reason.to_job_termination_reason();

    let mut unfinished = 0;
    for job in ctx.store.list_jobs_for_run(&run.id)? {
        if job.status.is_finished() {
            continue;
        }
        unfinished += 1;
        let mut outcome = Ok(());
        ctx.store.update::<Job, _>(&job.id, |j| {
            if !j.status.is_finished() {
                outcome = start_termination(j, job_reason, None, now);
            }
        })?;
        outcome?;
    }
    if unfinished > 0 {
        debug!(run = %run.id, unfinished, "waiting for jobs to terminate");
        return Ok(());
    }

    let status = reason.to_status();
    ctx.store.update::<Run, _>(&run.id, |r| {
        if r.status == RunStatus::Terminating {
            r.status = status;
            r.termination_reason = Some(reason);
        }
    })?;
    info!(run = %run.id, ?status, ?reason, "run finished");
    Ok(())
}

async fn process_active_run(ctx: &SchedulerContext, mut run: Run) -> SchedulerResult<()> {
    let now = epoch_secs();
    scale_run(ctx, &mut run, now).await?;

    let jobs = ctx.store.list_jobs_for_run(&run.id)?;
    let plan = plan_slots(&run, &jobs, now);

    if let Some((reason, message)) = plan.terminate {
        info!(run = %run.id, ?reason, %message, "terminating run");
        ctx.store.update::<Run, _>(&run.id, |r| {
            if !r.status.is_finished() {
                r.status = RunStatus::Terminating;
                r.termination_reason = Some(reason);
                r.status_message = Some(message);
            }
        })?;
        return Ok(());
    }

    if !plan.submit.is_empty() {
        for job in &plan.submit {
            info!(
                run = %run.id,
                job = %job.id,
                replica = job.replica_num,
                submission = job.submission_num,
                "submitting job"
            );
        }
        ctx.store.put_jobs(&plan.submit)?;
    }

    for id in &plan.scale_down {
        info!(run = %run.id, job = %id, "scaling down replica");
        let mut outcome = Ok(());
        ctx.store.update::<Job, _>(id, |j| {
            if !j.status.is_finished() {
                outcome = start_termination(j, JobTerminationReason::ScaledDown, None, now);
            }
        })?;
        outcome?;
    }

    let jobs = ctx.store.list_jobs_for_run(&run.id)?;
    let Some(derived) = derive_run_status(&jobs) else {
        return Ok(());
    };
    // Only a run-level decision with a reason may put a run into Terminating.
    if derived.status == RunStatus::Terminating {
        return Ok(());
    }
    if derived.status != run.status {
        info!(run = %run.id, from = ?run.status, to = ?derived.status, "run status changed");
        ctx.store.update::<Run, _>(&run.id, |r| {
            if r.status != RunStatus::Terminating && !r.status.is_finished() {
                r.status = derived.status;
                r.termination_reason = derived.termination_reason;
                r.status_message = derived.status_message;
            }
        })?;
    }
    Ok(())
}

/// Ask the run's scaler for a replica count and store it when it changed.
async fn scale_run(ctx: &SchedulerContext, run: &mut Run, now: u64) -> SchedulerResult<()> {
    let stats = match (&run.spec.scaling, &ctx.stats) {
        (Some(_), Some(source)) => ctx
            .call_runner("get_stats", &run.id, source.get_stats(run))
            .await
            .flatten(),
        _ => None,
    };

    let scaler = get_service_scaler(&run.spec);
    let desired = scaler.get_desired_count(run.desired_replica_count, stats.as_ref(), run.last_scaled_at, now);
    if desired == run.desired_replica_count {
        return Ok(());
    }

    info!(run = %run.id, from = run.desired_replica_count, to = desired, "scaling run");
    ctx.store.update::<Run, _>(&run.id, |r| {
        r.desired_replica_count = desired;
        r.last_scaled_at = Some(now);
    })?;
    run.desired_replica_count = desired;
    run.last_scaled_at = Some(now);
    Ok(())
}

/// What one reconciliation pass changes about a run's jobs.
#[derive(Debug, Default)]
struct SlotPlan {
    submit: Vec<Job>,
    scale_down: Vec<String>,
    terminate: Option<(RunTerminationReason, String)>,
}

fn plan_slots(run: &Run, jobs: &[Job], now: u64) -> SlotPlan {
    let latest: HashMap<(u32, u32), &Job> = latest_submissions(jobs)
        .into_iter()
        .map(|j| ((j.replica_num, j.job_num), j))
        .collect();
    let first_submitted_at = |slot: (u32, u32)| {
        jobs.iter()
            .filter(|j| (j.replica_num, j.job_num) == slot)
            .map(|j| j.submitted_at)
            .min()
            .unwrap_or(now)
    };

    let mut plan = SlotPlan::default();
    for replica_num in 0..run.desired_replica_count {
        for job_num in 0..run.spec.jobs_per_replica {
            let slot = (replica_num, job_num);
            let Some(job) = latest.get(&slot) else {
                plan.submit.push(Job::new_submission(run, replica_num, job_num, 0, now));
                continue;
            };
            if job.termination_reason == Some(JobTerminationReason::ScaledDown) {
                plan.submit
                    .push(Job::new_submission(run, replica_num, job_num, job.submission_num + 1, now));
                continue;
            }
            if !job.status.is_finished() || job.status == JobStatus::Done {
                continue;
            }

            let reason = job.termination_reason;
            let message = reason.map_or_else(|| format!("{:?}", job.status), |r| r.to_string());
            match retry_decision(run.spec.retry.as_ref(), reason, first_submitted_at(slot), now) {
                RetryDecision::Retry => {
                    debug!(run = %run.id, job = %job.id, ?reason, "retrying failed job");
                    plan.submit
                        .push(Job::new_submission(run, replica_num, job_num, job.submission_num + 1, now));
                }
                RetryDecision::LimitExceeded => {
                    plan.terminate = Some((RunTerminationReason::RetryLimitExceeded, message));
                    return plan;
                }
                RetryDecision::NotRetryable => {
                    plan.terminate = Some((run_termination_reason(job), message));
                    return plan;
                }
            }
        }
    }

    plan.scale_down = latest
        .values()
        .filter(|j| j.replica_num >= run.desired_replica_count && !j.status.is_finished())
        .filter(|j| j.termination_reason.is_none())
        .map(|j| j.id.clone())
        .collect();
    plan.scale_down.sort();
    plan
}
