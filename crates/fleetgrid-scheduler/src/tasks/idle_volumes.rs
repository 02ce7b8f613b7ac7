//! Reap idle volumes.
//!
//! Active volumes with an auto-cleanup duration are checked against the
//! idle predicate; idle ones are deleted on the provider and tombstoned.
//! Volumes that are not idle yet are only stamped as processed.

use tracing::{debug, error, info, warn};

use fleetgrid_backend::{BackendError, CallError};
use fleetgrid_lifecycle::should_delete_volume;
use fleetgrid_state::{epoch_secs, Volume, VolumeStatus};

use crate::context::SchedulerContext;
use crate::error::SchedulerResult;

pub async fn process_idle_volumes(ctx: &SchedulerContext) -> anyhow::Result<()> {
    let claim = ctx.claim(&ctx.claims.volumes, |v: &Volume| {
        v.status == VolumeStatus::Active
            && !v.deleted
            && v.configuration.auto_cleanup_duration.is_some_and(|d| d > 0)
    })?;
    if claim.is_empty() {
        return Ok(());
    }

    let now = epoch_secs();
    let loaded = ctx.store.load_volumes_with_attachments(claim.ids())?;
    let idle: Vec<Volume> = loaded
        .into_iter()
        .filter(|v| should_delete_volume(&v.volume, &v.attachments, now))
        .map(|v| v.volume)
        .collect();
    debug!(claimed = claim.len(), idle = idle.len(), "checked volumes for idleness");

    for volume in idle {
        let id = volume.id.clone();
        if let Err(e) = delete_idle_volume(ctx, volume).await {
            error!(volume = %id, error = %e, "failed to delete idle volume");
        }
    }
    ctx.store.touch::<Volume>(claim.ids(), epoch_secs())?;
    Ok(())
}

async fn delete_idle_volume(ctx: &SchedulerContext, volume: Volume) -> SchedulerResult<()> {
    let backend = volume.configuration.backend;
    let Some(compute) = ctx.backends.get(&volume.project, backend) else {
        warn!(volume = %volume.id, %backend, "backend not configured, cannot delete idle volume");
        return Ok(());
    };

    let id = volume.id.clone();
    let result = ctx
        .pool
        .run(move || {
            compute
                .as_volume_support()
                .ok_or_else(|| BackendError::Unsupported("volumes".to_string()))?
                .delete_volume(&volume)
        })
        .await;

    match result {
        Ok(()) => {}
        // Already gone on the provider side.
        Err(CallError::Backend(BackendError::NotFound(_))) => {}
        Err(CallError::Backend(e)) => {
            warn!(volume = %id, error = %e, "failed to delete idle volume, will retry");
            return Ok(());
        }
        Err(e) => return Err(e.into()),
    }

    let now = epoch_secs();
    ctx.store.update::<Volume, _>(&id, |v| {
        v.deleted = true;
        v.deleted_at = Some(now);
    })?;
    info!(volume = %id, "idle volume deleted");
    Ok(())
}
