//! Launch instances for submitted jobs.
//!
//! Offers are gathered from every backend of the job's project, ranked by
//! price, and tried in order until one `create_instance` succeeds. When
//! none does, the job terminates with `FailedToStartDueToNoCapacity` and
//! the run's retry policy decides whether it is resubmitted.
//!
//! A `create_instance` that outlives the call timeout may still create the
//! instance, so no further offer is tried. The job stays `Submitted` and
//! claimed until the call returns: a late instance is recorded on the job,
//! or terminated if the job finished meanwhile, and a late failure counts
//! as no capacity.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use fleetgrid_backend::{BlockingPool, CallError, Compute, InstanceConfig, PendingCall};
use fleetgrid_lifecycle::job::{apply_transition, start_termination};
use fleetgrid_offers::{get_offers_by_requirements, rank_by_price};
use fleetgrid_state::{
    epoch_secs, Job, JobProvisioningData, JobStatus, JobTerminationReason, Run, RunStatus, StateStore,
};

use crate::claim::Claim;
use crate::context::SchedulerContext;
use crate::error::SchedulerResult;

pub async fn process_submitted_jobs(ctx: &SchedulerContext) -> anyhow::Result<()> {
    let mut claim = ctx.claim(&ctx.claims.jobs, |j: &Job| j.status == JobStatus::Submitted)?;
    if claim.is_empty() {
        return Ok(());
    }

    let ids = claim.ids().to_vec();
    for id in &ids {
        if let Err(e) = process_submitted_job(ctx, &mut claim, id).await {
            error!(job = %id, error = %e, "failed to process submitted job");
        }
    }
    ctx.store.touch::<Job>(&ids, epoch_secs())?;
    Ok(())
}

async fn process_submitted_job(ctx: &SchedulerContext, claim: &mut Claim, id: &str) -> SchedulerResult<()> {
    let Some(job) = ctx.store.get_job(id)? else {
        return Ok(());
    };
    let Some(run) = ctx.store.get_run(&job.run_id)? else {
        warn!(job = %job.id, run = %job.run_id, "run of submitted job not found");
        return terminate_job(
            &ctx.store,
            &job.id,
            JobTerminationReason::TerminatedByServer,
            "run not found".to_string(),
        );
    };
    if run.status == RunStatus::Terminating || run.status.is_finished() {
        // Run termination reaches the job through `process_runs`.
        debug!(job = %job.id, run = %run.id, "run is stopping, not provisioning");
        return Ok(());
    }

    let requirements = &run.spec.requirements;
    let offers = get_offers_by_requirements(&ctx.backends, &ctx.pool, &job.project, requirements).await;
    let ranked = rank_by_price(offers, requirements, &ctx.backends.backend_order(&job.project));
    if ranked.is_empty() {
        info!(job = %job.id, "no offers match the requirements");
        return terminate_job(
            &ctx.store,
            &job.id,
            JobTerminationReason::FailedToStartDueToNoCapacity,
            "no offers match the requirements".to_string(),
        );
    }

    let config = instance_config(&run, &job);
    let mut tried = 0;
    for offer in ranked.into_iter().take(ctx.config.max_offers_tried) {
        let Some(compute) = ctx.backends.get(&job.project, offer.backend) else {
            continue;
        };
        tried += 1;
        let instance_type = offer.instance.name.clone();
        let backend = offer.backend;
        let config = config.clone();
        let creator = Arc::clone(&compute);
        let pending = ctx.pool.spawn(move || creator.create_instance(&offer, &config));
        match pending.wait(ctx.pool.timeout()).await {
            Ok(Ok(data)) => {
                info!(
                    job = %job.id,
                    %backend,
                    %instance_type,
                    instance_id = %data.instance_id,
                    price = data.price,
                    "instance created"
                );
                return record_instance(&ctx.store, &job.id, data);
            }
            Ok(Err(CallError::Backend(e))) => {
                debug!(job = %job.id, %backend, %instance_type, error = %e, "offer failed");
            }
            Ok(Err(e)) => {
                warn!(job = %job.id, %backend, %instance_type, error = %e, "offer failed unexpectedly");
            }
            Err(pending) => {
                warn!(job = %job.id, %backend, %instance_type, "instance creation timed out, waiting for the outcome");
                return await_late_instance(ctx, claim, &job.id, compute, pending);
            }
        }
    }

    info!(job = %job.id, tried, "all offers failed");
    terminate_job(
        &ctx.store,
        &job.id,
        JobTerminationReason::FailedToStartDueToNoCapacity,
        format!("failed to create an instance from {tried} offers"),
    )
}

fn instance_config(run: &Run, job: &Job) -> InstanceConfig {
    InstanceConfig {
        project: job.project.clone(),
        instance_name: format!("{}-{}-{}", run.name, job.replica_num, job.job_num),
        job_id: job.id.clone(),
        image: run.spec.image.clone(),
    }
}

/// Hand a timed-out `create_instance` to a reconciler that keeps the job
/// claimed until the backend answers.
fn await_late_instance(
    ctx: &SchedulerContext,
    claim: &mut Claim,
    id: &str,
    compute: Arc<dyn Compute>,
    pending: PendingCall<JobProvisioningData>,
) -> SchedulerResult<()> {
    ctx.store.update::<Job, _>(id, |job| {
        job.status_message = Some("instance creation timed out, waiting for the backend".to_string());
    })?;

    let held = claim.split_off(id);
    let store = ctx.store.clone();
    let pool = ctx.pool.clone();
    let id = id.to_string();
    ctx.reconcilers.spawn(async move {
        let _held = held;
        let result = pending.finish().await;
        if let Err(e) = settle_late_instance(&store, &pool, compute, &id, result).await {
            error!(job = %id, error = %e, "failed to settle late instance");
        }
    });
    Ok(())
}

async fn settle_late_instance(
    store: &StateStore,
    pool: &BlockingPool,
    compute: Arc<dyn Compute>,
    id: &str,
    result: Result<JobProvisioningData, CallError>,
) -> SchedulerResult<()> {
    match result {
        Ok(data) => {
            let finished = store.get_job(id)?.is_none_or(|job| job.status.is_finished());
            if !finished {
                info!(job = %id, instance_id = %data.instance_id, "late instance recorded");
                return record_instance(store, id, data);
            }
            warn!(job = %id, instance_id = %data.instance_id, "job finished while its instance was created, terminating instance");
            let JobProvisioningData {
                instance_id, region, ..
            } = data;
            pool.run(move || compute.terminate_instance(&instance_id, &region)).await?;
            Ok(())
        }
        Err(CallError::Backend(e)) => {
            info!(job = %id, error = %e, "instance creation failed after timing out");
            terminate_job(
                store,
                id,
                JobTerminationReason::FailedToStartDueToNoCapacity,
                format!("failed to create an instance: {e}"),
            )
        }
        Err(e) => Err(e.into()),
    }
}

/// Attach the new instance to the job. A job stopped while its instance
/// was being created keeps its status; the instance is recorded so that
/// termination cleans it up.
fn record_instance(store: &StateStore, id: &str, data: JobProvisioningData) -> SchedulerResult<()> {
    let now = epoch_secs();
    let mut outcome = Ok(());
    store.update::<Job, _>(id, |job| {
        if job.status == JobStatus::Submitted {
            outcome = apply_transition(job, JobStatus::Provisioning, now);
            job.status_message = None;
        }
        job.provisioning_data = Some(data);
    })?;
    Ok(outcome?)
}

fn terminate_job(
    store: &StateStore,
    id: &str,
    reason: JobTerminationReason,
    message: String,
) -> SchedulerResult<()> {
    let now = epoch_secs();
    let mut outcome = Ok(());
    store.update::<Job, _>(id, |job| {
        if !job.status.is_finished() {
            outcome = start_termination(job, reason, Some(message), now);
        }
    })?;
    Ok(outcome?)
}
