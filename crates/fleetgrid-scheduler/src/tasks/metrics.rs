//! Job metrics collection and retention.
//!
//! Collection only reads jobs, so it takes no claims: a job finishing
//! mid-pass simply yields one last point.

use std::collections::HashSet;

use tracing::{debug, info};

use fleetgrid_state::{epoch_micros, JobStatus};

use crate::context::SchedulerContext;

const MICROS_PER_SEC: u64 = 1_000_000;

/// Pull one metrics point from the runner of every running job.
pub async fn collect_metrics(ctx: &SchedulerContext) -> anyhow::Result<()> {
    let Some(runner) = &ctx.runner else {
        return Ok(());
    };

    let jobs: Vec<_> = ctx
        .store
        .list_jobs()?
        .into_iter()
        .filter(|j| j.status == JobStatus::Running)
        .collect();

    let mut collected = 0;
    for job in &jobs {
        let Some(point) = ctx
            .call_runner("get_metrics", &job.id, runner.get_metrics(job))
            .await
            .flatten()
        else {
            continue;
        };
        ctx.store.put_metrics_point(&point)?;
        collected += 1;
    }
    debug!(jobs = jobs.len(), collected, "collected job metrics");
    Ok(())
}

/// Drop metrics older than the retention window. Running jobs keep a short
/// window, everything else a long one.
pub async fn delete_metrics(ctx: &SchedulerContext) -> anyhow::Result<()> {
    let running: HashSet<String> = ctx
        .store
        .list_jobs()?
        .into_iter()
        .filter(|j| j.status == JobStatus::Running)
        .map(|j| j.id)
        .collect();

    let now = epoch_micros();
    let running_cutoff = now.saturating_sub(ctx.retention.running_ttl_secs.saturating_mul(MICROS_PER_SEC));
    let finished_cutoff = now.saturating_sub(ctx.retention.finished_ttl_secs.saturating_mul(MICROS_PER_SEC));

    let deleted = ctx.store.delete_metrics_where(|job_id, timestamp| {
        let cutoff = if running.contains(job_id) {
            running_cutoff
        } else {
            finished_cutoff
        };
        timestamp < cutoff
    })?;
    if deleted > 0 {
        info!(deleted, "deleted expired job metrics");
    }
    Ok(())
}
