//! Terminate compute groups.
//!
//! Like placement groups, termination is retried until a deadline, but
//! attempts are also spaced by the retry interval so a failing provider is
//! not hammered on every tick.

use tracing::{debug, error, info, warn};

use fleetgrid_backend::{BackendError, CallError};
use fleetgrid_lifecycle::TerminationRetry;
use fleetgrid_state::{epoch_secs, ComputeGroup, ComputeGroupStatus};

use crate::context::SchedulerContext;
use crate::error::SchedulerResult;

pub async fn process_compute_groups(ctx: &SchedulerContext) -> anyhow::Result<()> {
    let claim = ctx.claim(&ctx.claims.compute_groups, |g: &ComputeGroup| {
        g.status == ComputeGroupStatus::Terminating && !g.deleted
    })?;
    if claim.is_empty() {
        return Ok(());
    }

    for id in claim.ids() {
        if let Err(e) = terminate_compute_group(ctx, id).await {
            error!(compute_group = %id, error = %e, "failed to process compute group");
        }
    }
    ctx.store.touch::<ComputeGroup>(claim.ids(), epoch_secs())?;
    Ok(())
}

async fn terminate_compute_group(ctx: &SchedulerContext, id: &str) -> SchedulerResult<()> {
    let Some(group) = ctx.store.get_compute_group(id)? else {
        return Ok(());
    };
    let now = epoch_secs();
    if !group.termination_attempt_due(&ctx.termination, now) {
        debug!(compute_group = %group.id, "termination retried recently, waiting");
        return Ok(());
    }

    let id = group.id.clone();
    let backend = group.provisioning_data.backend;
    let Some(compute) = ctx.backends.get(&group.project, backend) else {
        warn!(compute_group = %id, %backend, "backend not configured, marking compute group terminated");
        return mark_terminated(ctx, &id);
    };

    let result = ctx
        .pool
        .run(move || {
            compute
                .as_group_provisioning_support()
                .ok_or_else(|| BackendError::Unsupported("compute groups".to_string()))?
                .terminate_compute_group(&group)
        })
        .await;

    let failure = match result {
        Ok(()) | Err(CallError::Backend(BackendError::NotFound(_))) => {
            info!(compute_group = %id, "compute group terminated");
            return mark_terminated(ctx, &id);
        }
        Err(CallError::Backend(e)) => e,
        Err(e) => return Err(e.into()),
    };
    warn!(compute_group = %id, error = %failure, "failed to terminate compute group, will retry");

    let now = epoch_secs();
    let policy = ctx.termination;
    let mut expired = false;
    ctx.store.update::<ComputeGroup, _>(&id, |g| {
        g.record_termination_failure(now);
        if g.termination_deadline_exceeded(&policy, now) {
            expired = true;
            terminate(g, now);
        }
    })?;
    if expired {
        error!(
            compute_group = %id,
            max_duration_secs = policy.max_duration,
            error = %failure,
            "compute group termination deadline passed, marked terminated"
        );
    }
    Ok(())
}

fn terminate(group: &mut ComputeGroup, now: u64) {
    group.status = ComputeGroupStatus::Terminated;
    group.deleted = true;
    group.deleted_at = Some(now);
}

fn mark_terminated(ctx: &SchedulerContext, id: &str) -> SchedulerResult<()> {
    let now = epoch_secs();
    ctx.store.update::<ComputeGroup, _>(id, |g| terminate(g, now))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use fleetgrid_state::BackendType;
    use std::sync::Arc;

    #[tokio::test]
    async fn terminates_terminating_groups() {
        let compute = Arc::new(FakeCompute::new(BackendType::Aws));
        let ctx = test_context(compute.clone());
        ctx.store.put_compute_group(&test_compute_group("cg-1")).unwrap();
        let mut running = test_compute_group("cg-2");
        running.status = ComputeGroupStatus::Running;
        ctx.store.put_compute_group(&running).unwrap();

        process_compute_groups(&ctx).await.unwrap();

        let cg = ctx.store.get_compute_group("cg-1").unwrap().unwrap();
        assert_eq!(cg.status, ComputeGroupStatus::Terminated);
        assert!(cg.deleted);
        let cg = ctx.store.get_compute_group("cg-2").unwrap().unwrap();
        assert_eq!(cg.status, ComputeGroupStatus::Running);
        assert_eq!(compute.calls(), vec!["terminate_compute_group:cg-1".to_string()]);
    }

    #[tokio::test]
    async fn retries_are_spaced_by_interval() {
        let compute = Arc::new(FakeCompute::new(BackendType::Aws));
        compute.fail("terminate_compute_group", BackendError::RateLimited("slow down".to_string()));
        let ctx = test_context(compute.clone());
        ctx.store.put_compute_group(&test_compute_group("cg-1")).unwrap();

        process_compute_groups(&ctx).await.unwrap();
        process_compute_groups(&ctx).await.unwrap();

        // The second tick came before the retry interval elapsed.
        assert_eq!(compute.count_calls("terminate_compute_group"), 1);
        let cg = ctx.store.get_compute_group("cg-1").unwrap().unwrap();
        assert_eq!(cg.status, ComputeGroupStatus::Terminating);
        assert!(cg.first_termination_retry_at.is_some());
    }

    #[tokio::test]
    async fn deadline_forces_termination() {
        let compute = Arc::new(FakeCompute::new(BackendType::Aws));
        compute.fail("terminate_compute_group", BackendError::Provider("stuck".to_string()));
        let ctx = test_context(compute.clone());
        let mut cg = test_compute_group("cg-1");
        let now = epoch_secs();
        cg.first_termination_retry_at = Some(now - 20 * 60);
        cg.last_termination_retry_at = Some(now - 60);
        ctx.store.put_compute_group(&cg).unwrap();

        process_compute_groups(&ctx).await.unwrap();

        let cg = ctx.store.get_compute_group("cg-1").unwrap().unwrap();
        assert_eq!(cg.status, ComputeGroupStatus::Terminated);
        assert!(cg.deleted);
        assert_eq!(compute.count_calls("terminate_compute_group"), 1);
    }
}
