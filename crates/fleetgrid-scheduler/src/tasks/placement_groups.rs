//! Delete placement groups of deleted fleets.
//!
//! A provider refuses to delete a group while instances still sit in it, so
//! deletion is retried on every tick. Every failure counts toward the
//! termination deadline; once it passes the group is tombstoned anyway.

use tracing::{error, info, warn};

use fleetgrid_backend::{BackendError, CallError};
use fleetgrid_lifecycle::TerminationRetry;
use fleetgrid_state::{epoch_secs, PlacementGroup};

use crate::context::SchedulerContext;
use crate::error::SchedulerResult;

pub async fn process_placement_groups(ctx: &SchedulerContext) -> anyhow::Result<()> {
    let claim = ctx.claim(&ctx.claims.placement_groups, |pg: &PlacementGroup| {
        pg.fleet_deleted && !pg.deleted
    })?;
    if claim.is_empty() {
        return Ok(());
    }

    for id in claim.ids() {
        if let Err(e) = delete_placement_group(ctx, id).await {
            error!(placement_group = %id, error = %e, "failed to process placement group");
        }
    }
    ctx.store.touch::<PlacementGroup>(claim.ids(), epoch_secs())?;
    Ok(())
}

async fn delete_placement_group(ctx: &SchedulerContext, id: &str) -> SchedulerResult<()> {
    let Some(group) = ctx.store.get_placement_group(id)? else {
        return Ok(());
    };
    let id = group.id.clone();
    let backend = group.provisioning_data.backend;
    let Some(compute) = ctx.backends.get(&group.project, backend) else {
        warn!(placement_group = %id, %backend, "backend not configured, marking placement group deleted");
        return mark_deleted(ctx, &id);
    };
    if compute.as_placement_group_support().is_none() {
        warn!(placement_group = %id, %backend, "backend has no placement groups, marking deleted");
        return mark_deleted(ctx, &id);
    }

    let result = ctx
        .pool
        .run(move || {
            compute
                .as_placement_group_support()
                .ok_or_else(|| BackendError::Unsupported("placement groups".to_string()))?
                .delete_placement_group(&group)
        })
        .await;

    let failure = match result {
        Ok(()) | Err(CallError::Backend(BackendError::NotFound(_))) => {
            info!(placement_group = %id, "placement group deleted");
            return mark_deleted(ctx, &id);
        }
        Err(CallError::Backend(e)) => e,
        Err(e) => return Err(e.into()),
    };

    if failure.is_in_use() {
        info!(placement_group = %id, error = %failure, "placement group still in use, will retry");
    } else {
        warn!(placement_group = %id, error = %failure, "failed to delete placement group, will retry");
    }

    let now = epoch_secs();
    let policy = ctx.termination;
    let mut expired = false;
    ctx.store.update::<PlacementGroup, _>(&id, |pg| {
        pg.record_termination_failure(now);
        if pg.termination_deadline_exceeded(&policy, now) {
            expired = true;
            pg.deleted = true;
            pg.deleted_at = Some(now);
        }
    })?;
    if expired {
        error!(
            placement_group = %id,
            max_duration_secs = policy.max_duration,
            error = %failure,
            "placement group deletion deadline passed, marked deleted"
        );
    }
    Ok(())
}

fn mark_deleted(ctx: &SchedulerContext, id: &str) -> SchedulerResult<()> {
    let now = epoch_secs();
    ctx.store.update::<PlacementGroup, _>(id, |pg| {
        pg.deleted = true;
        pg.deleted_at = Some(now);
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::*;
    use fleetgrid_state::BackendType;
    use std::sync::Arc;

    #[tokio::test]
    async fn deletes_groups_of_deleted_fleets_only() {
        let compute = Arc::new(FakeCompute::new(BackendType::Aws));
        let ctx = test_context(compute.clone());
        ctx.store.put_placement_group(&test_placement_group("pg-gone")).unwrap();
        let mut live = test_placement_group("pg-live");
        live.fleet_deleted = false;
        ctx.store.put_placement_group(&live).unwrap();

        process_placement_groups(&ctx).await.unwrap();

        let gone = ctx.store.get_placement_group("pg-gone").unwrap().unwrap();
        assert!(gone.deleted);
        assert!(!ctx.store.get_placement_group("pg-live").unwrap().unwrap().deleted);
        assert_eq!(compute.calls(), vec!["delete_placement_group:pg-gone".to_string()]);
    }

    #[tokio::test]
    async fn in_use_failure_starts_retry_window() {
        let compute = Arc::new(FakeCompute::new(BackendType::Aws));
        compute.fail("delete_placement_group", BackendError::InUse("2 instances".to_string()));
        let ctx = test_context(compute.clone());
        ctx.store.put_placement_group(&test_placement_group("pg-1")).unwrap();

        process_placement_groups(&ctx).await.unwrap();
        let pg = ctx.store.get_placement_group("pg-1").unwrap().unwrap();
        assert!(!pg.deleted);
        let first = pg.first_termination_retry_at.unwrap();
        assert_eq!(pg.last_termination_retry_at, Some(first));

        process_placement_groups(&ctx).await.unwrap();
        let pg = ctx.store.get_placement_group("pg-1").unwrap().unwrap();
        assert_eq!(pg.first_termination_retry_at, Some(first));
        assert_eq!(compute.count_calls("delete_placement_group"), 2);

        compute.succeed("delete_placement_group");
        process_placement_groups(&ctx).await.unwrap();
        assert!(ctx.store.get_placement_group("pg-1").unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn deadline_forces_deletion() {
        let compute = Arc::new(FakeCompute::new(BackendType::Aws));
        compute.fail("delete_placement_group", BackendError::Provider("internal".to_string()));
        let ctx = test_context(compute);
        let mut pg = test_placement_group("pg-1");
        pg.first_termination_retry_at = Some(epoch_secs() - 16 * 60);
        ctx.store.put_placement_group(&pg).unwrap();

        process_placement_groups(&ctx).await.unwrap();

        let pg = ctx.store.get_placement_group("pg-1").unwrap().unwrap();
        assert!(pg.deleted);
        assert!(pg.deleted_at.is_some());
    }

    #[tokio::test]
    async fn in_use_counts_toward_deadline() {
        let compute = Arc::new(FakeCompute::new(BackendType::Aws));
        compute.fail("delete_placement_group", BackendError::InUse("busy".to_string()));
        let ctx = test_context(compute);
        let mut pg = test_placement_group("pg-1");
        pg.first_termination_retry_at = Some(epoch_secs() - 16 * 60);
        ctx.store.put_placement_group(&pg).unwrap();

        process_placement_groups(&ctx).await.unwrap();
        assert!(ctx.store.get_placement_group("pg-1").unwrap().unwrap().deleted);
    }

    #[tokio::test]
    async fn unknown_backend_marks_deleted() {
        let compute = Arc::new(FakeCompute::new(BackendType::Aws));
        let ctx = test_context(compute.clone());
        let mut pg = test_placement_group("pg-1");
        pg.provisioning_data.backend = BackendType::Azure;
        ctx.store.put_placement_group(&pg).unwrap();

        process_placement_groups(&ctx).await.unwrap();
        assert!(ctx.store.get_placement_group("pg-1").unwrap().unwrap().deleted);
        assert!(compute.calls().is_empty());
    }
}
