//! Provision submitted volumes.
//!
//! A volume configured with an existing provider volume ID is registered,
//! anything else is created. The outcome is terminal either way: `Active`
//! with provisioning data, or `Failed` with the provider's message. A call
//! that times out may still succeed, so the volume stays `Submitted` and
//! claimed until the backend answers.

use tracing::{error, info, warn};

use fleetgrid_backend::{BackendError, CallError, PendingCall};
use fleetgrid_lifecycle::volume::apply_transition;
use fleetgrid_state::{epoch_secs, StateStore, Volume, VolumeProvisioningData, VolumeStatus};

use crate::claim::Claim;
use crate::context::SchedulerContext;
use crate::error::SchedulerResult;

pub async fn process_submitted_volumes(ctx: &SchedulerContext) -> anyhow::Result<()> {
    let mut claim = ctx.claim(&ctx.claims.volumes, |v: &Volume| {
        v.status == VolumeStatus::Submitted && !v.deleted
    })?;
    if claim.is_empty() {
        return Ok(());
    }

    let ids = claim.ids().to_vec();
    for id in &ids {
        if let Err(e) = process_submitted_volume(ctx, &mut claim, id).await {
            error!(volume = %id, error = %e, "failed to process submitted volume");
        }
    }
    ctx.store.touch::<Volume>(&ids, epoch_secs())?;
    Ok(())
}

async fn process_submitted_volume(ctx: &SchedulerContext, claim: &mut Claim, id: &str) -> SchedulerResult<()> {
    let Some(volume) = ctx.store.get_volume(id)? else {
        return Ok(());
    };
    let backend = volume.configuration.backend;
    let Some(compute) = ctx.backends.get(&volume.project, backend) else {
        return fail_volume(&ctx.store, id, format!("backend {backend} is not configured"));
    };
    if compute.as_volume_support().is_none() {
        return fail_volume(&ctx.store, id, format!("backend {backend} does not support volumes"));
    }

    let register = volume.configuration.volume_id.is_some();
    let pending = ctx.pool.spawn(move || {
        let support = compute
            .as_volume_support()
            .ok_or_else(|| BackendError::Unsupported("volumes".to_string()))?;
        if register {
            support.register_volume(&volume)
        } else {
            support.create_volume(&volume)
        }
    });

    match pending.wait(ctx.pool.timeout()).await {
        Ok(result) => settle_volume(&ctx.store, id, result, register),
        Err(pending) => {
            warn!(volume = %id, %backend, "volume provisioning timed out, waiting for the outcome");
            await_late_volume(ctx, claim, id, pending, register)
        }
    }
}

fn settle_volume(
    store: &StateStore,
    id: &str,
    result: Result<VolumeProvisioningData, CallError>,
    registered: bool,
) -> SchedulerResult<()> {
    match result {
        Ok(data) => activate_volume(store, id, data, registered),
        Err(CallError::Backend(e)) => {
            warn!(volume = %id, error = %e, "volume provisioning failed");
            fail_volume(store, id, e.to_string())
        }
        Err(e) => Err(e.into()),
    }
}

fn await_late_volume(
    ctx: &SchedulerContext,
    claim: &mut Claim,
    id: &str,
    pending: PendingCall<VolumeProvisioningData>,
    registered: bool,
) -> SchedulerResult<()> {
    ctx.store.update::<Volume, _>(id, |v| {
        v.status_message = Some("volume provisioning timed out, waiting for the backend".to_string());
    })?;

    let held = claim.split_off(id);
    let store = ctx.store.clone();
    let id = id.to_string();
    ctx.reconcilers.spawn(async move {
        let _held = held;
        let result = pending.finish().await;
        if let Err(e) = settle_volume(&store, &id, result, registered) {
            error!(volume = %id, error = %e, "failed to settle late volume");
        }
    });
    Ok(())
}

fn activate_volume(
    store: &StateStore,
    id: &str,
    data: VolumeProvisioningData,
    registered: bool,
) -> SchedulerResult<()> {
    let mut outcome = Ok(());
    store.update::<Volume, _>(id, |v| {
        outcome = apply_transition(v, VolumeStatus::Active);
        if outcome.is_ok() {
            v.provisioning_data = Some(data);
            v.status_message = None;
        }
    })?;
    outcome?;
    info!(volume = %id, registered, "volume active");
    Ok(())
}

fn fail_volume(store: &StateStore, id: &str, message: String) -> SchedulerResult<()> {
    let mut outcome = Ok(());
    store.update::<Volume, _>(id, |v| {
        outcome = apply_transition(v, VolumeStatus::Failed);
        if outcome.is_ok() {
            v.status_message = Some(message);
        }
    })?;
    Ok(outcome?)
}
