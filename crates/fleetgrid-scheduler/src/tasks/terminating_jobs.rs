//! Release the instances of terminating jobs.
//!
//! Once the provider confirms the instance is gone (or never existed), the
//! job finishes in the status its termination reason maps to. Provider
//! failures keep the job terminating for the next tick.

use tracing::{error, info, warn};

use fleetgrid_backend::{BackendError, CallError};
use fleetgrid_lifecycle::job::finish_termination;
use fleetgrid_state::{epoch_secs, Job, JobStatus};

use crate::context::SchedulerContext;
use crate::error::SchedulerResult;

pub async fn process_terminating_jobs(ctx: &SchedulerContext) -> anyhow::Result<()> {
    let claim = ctx.claim(&ctx.claims.jobs, |j: &Job| j.status == JobStatus::Terminating)?;
    if claim.is_empty() {
        return Ok(());
    }

    for id in claim.ids() {
        if let Err(e) = process_terminating_job(ctx, id).await {
            error!(job = %id, error = %e, "failed to process terminating job");
        }
    }
    ctx.store.touch::<Job>(claim.ids(), epoch_secs())?;
    Ok(())
}

async fn process_terminating_job(ctx: &SchedulerContext, id: &str) -> SchedulerResult<()> {
    let Some(job) = ctx.store.get_job(id)? else {
        return Ok(());
    };
    if let Some(data) = job.provisioning_data.clone() {
        match ctx.backends.get(&job.project, data.backend) {
            Some(compute) => {
                let instance_id = data.instance_id.clone();
                let result = ctx
                    .pool
                    .run(move || compute.terminate_instance(&data.instance_id, &data.region))
                    .await;
                match result {
                    Ok(()) => info!(job = %job.id, %instance_id, "instance terminated"),
                    Err(CallError::Backend(BackendError::NotFound(_))) => {
                        info!(job = %job.id, %instance_id, "instance already gone");
                    }
                    Err(CallError::Backend(e)) => {
                        warn!(job = %job.id, %instance_id, error = %e, "failed to terminate instance, will retry");
                        ctx.store.update::<Job, _>(&job.id, |j| {
                            j.status_message = Some(format!("failed to terminate instance: {e}"));
                        })?;
                        return Ok(());
                    }
                    Err(e) => return Err(e.into()),
                }
            }
            None => {
                warn!(
                    job = %job.id,
                    backend = %data.backend,
                    instance_id = %data.instance_id,
                    "backend not configured, instance left to the provider"
                );
            }
        }
    }

    let now = epoch_secs();
    let mut outcome = Ok(JobStatus::Terminating);
    ctx.store.update::<Job, _>(&job.id, |j| {
        if j.status == JobStatus::Terminating {
            outcome = finish_termination(j, now);
        }
    })?;
    let status = outcome?;
    info!(job = %job.id, ?status, "job finished");
    Ok(())
}
