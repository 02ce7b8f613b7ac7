//! Cross-backend offer discovery and caller-side ranking.
//!
//! Candidates are fetched from every backend of a project concurrently and
//! returned unsorted. Which offer is "best" is a caller decision: the job
//! scheduler ranks usable offers by price with [`rank_by_price`], other
//! callers (e.g. a dry-run plan) may choose differently.

use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use fleetgrid_backend::{BackendRegistry, BlockingPool, CallError, Compute};
use fleetgrid_state::{BackendType, InstanceOffer, Requirements};

use crate::selector::{offer_matches, selection_key};

/// Fetch offers from all backends of a project concurrently.
///
/// A backend that fails or times out is logged and skipped. An empty result
/// means no capacity.
pub async fn get_offers_by_requirements(
    registry: &BackendRegistry,
    pool: &BlockingPool,
    project: &str,
    requirements: &Requirements,
) -> Vec<InstanceOffer> {
    let backends = registry.project_backends(project);
    if backends.is_empty() {
        debug!(%project, "project has no backends");
        return Vec::new();
    }
    fetch_offers(backends, pool, requirements).await
}

/// Fan out `get_offers` to the given backends and fan the results back in.
pub async fn fetch_offers(
    backends: Vec<Arc<dyn Compute>>,
    pool: &BlockingPool,
    requirements: &Requirements,
) -> Vec<InstanceOffer> {
    let mut calls = JoinSet::new();
    for compute in backends {
        let pool = pool.clone();
        let req = requirements.clone();
        calls.spawn(async move {
            let backend = compute.backend_type();
            let result = pool.run(move || compute.get_offers(&req)).await;
            (backend, result)
        });
    }

    let mut offers = Vec::new();
    while let Some(joined) = calls.join_next().await {
        match joined {
            Ok((backend, Ok(found))) => {
                debug!(%backend, count = found.len(), "offers fetched");
                offers.extend(found);
            }
            Ok((backend, Err(CallError::Backend(e)))) => {
                warn!(%backend, error = %e, "failed to fetch offers");
            }
            Ok((backend, Err(e))) => {
                warn!(%backend, error = %e, "unexpected error fetching offers");
            }
            Err(e) => {
                warn!(error = %e, "offer fetch task failed");
            }
        }
    }
    offers
}

/// Usable offers ordered cheapest first. Ties go to the backend listed
/// earlier in `backend_order`, then to the smaller instance.
pub fn rank_by_price(
    offers: Vec<InstanceOffer>,
    requirements: &Requirements,
    backend_order: &[BackendType],
) -> Vec<InstanceOffer> {
    let preference = |b: BackendType| {
        backend_order
            .iter()
            .position(|o| *o == b)
            .unwrap_or(backend_order.len())
    };

    let mut usable: Vec<InstanceOffer> = offers
        .into_iter()
        .filter(|o| offer_matches(o, requirements))
        .collect();
    usable.sort_by(|a, b| {
        a.price
            .total_cmp(&b.price)
            .then_with(|| preference(a.backend).cmp(&preference(b.backend)))
            .then_with(|| selection_key(a).cmp(&selection_key(b)))
    });
    usable
}
