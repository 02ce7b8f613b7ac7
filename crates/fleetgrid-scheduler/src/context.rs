//! Shared dependencies of every periodic task.

use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::task::JoinSet;
use tracing::{debug, error, warn};

use fleetgrid_backend::{BackendRegistry, BlockingPool};
use fleetgrid_lifecycle::TerminationRetryPolicy;
use fleetgrid_state::{Record, StateStore};

use crate::claim::{Claim, ClaimGuard};
use crate::config::{MetricsRetention, SchedulerConfig};
use crate::error::SchedulerResult;
use crate::runner::{RunnerClient, ServiceStatsSource};

/// One claim set per entity kind. Every task that mutates a kind shares
/// its guard.
#[derive(Clone)]
pub struct ClaimGuards {
    pub runs: ClaimGuard,
    pub jobs: ClaimGuard,
    pub volumes: ClaimGuard,
    pub placement_groups: ClaimGuard,
    pub compute_groups: ClaimGuard,
}

impl Default for ClaimGuards {
    fn default() -> Self {
        Self {
            runs: ClaimGuard::new("runs"),
            jobs: ClaimGuard::new("jobs"),
            volumes: ClaimGuard::new("volumes"),
            placement_groups: ClaimGuard::new("placement_groups"),
            compute_groups: ClaimGuard::new("compute_groups"),
        }
    }
}

/// Background waits for backend calls whose outcome was not known when
/// their task moved on. Each holds the claim of the entity it settles.
#[derive(Clone, Default)]
pub struct Reconcilers {
    inflight: Arc<Mutex<JoinSet<()>>>,
}

impl Reconcilers {
    pub fn spawn<F>(&self, reconcile: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
        // Reap finished ones so the set does not grow with the daemon's uptime.
        while let Some(result) = inflight.try_join_next() {
            if let Err(e) = result {
                error!(error = %e, "reconciler panicked");
            }
        }
        inflight.spawn(reconcile);
    }

    /// Reconcilers not yet finished.
    pub fn len(&self) -> usize {
        self.inflight.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait for every reconciler, including ones spawned while draining.
    pub async fn drain(&self) {
        loop {
            let mut pending = {
                let mut inflight = self.inflight.lock().unwrap_or_else(PoisonError::into_inner);
                std::mem::take(&mut *inflight)
            };
            if pending.is_empty() {
                return;
            }
            debug!(count = pending.len(), "waiting for reconcilers");
            while let Some(result) = pending.join_next().await {
                if let Err(e) = result {
                    error!(error = %e, "reconciler panicked");
                }
            }
        }
    }
}

pub struct SchedulerContext {
    pub store: StateStore,
    pub backends: BackendRegistry,
    pub pool: BlockingPool,
    pub runner: Option<Arc<dyn RunnerClient>>,
    pub stats: Option<Arc<dyn ServiceStatsSource>>,
    pub claims: ClaimGuards,
    pub reconcilers: Reconcilers,
    pub config: SchedulerConfig,
    pub retention: MetricsRetention,
    pub termination: TerminationRetryPolicy,
}

impl SchedulerContext {
    pub fn new(store: StateStore, backends: BackendRegistry, config: SchedulerConfig) -> Self {
        let pool = BlockingPool::new(config.blocking_pool_size, config.backend_call_timeout());
        Self {
            store,
            backends,
            pool,
            runner: None,
            stats: None,
            claims: ClaimGuards::default(),
            reconcilers: Reconcilers::default(),
            config,
            retention: MetricsRetention::default(),
            termination: TerminationRetryPolicy::default(),
        }
    }

    pub fn with_runner(mut self, runner: Arc<dyn RunnerClient>) -> Self {
        self.runner = Some(runner);
        self
    }

    pub fn with_stats_source(mut self, stats: Arc<dyn ServiceStatsSource>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_retention(mut self, retention: MetricsRetention) -> Self {
        self.retention = retention;
        self
    }

    pub fn with_termination_policy(mut self, policy: TerminationRetryPolicy) -> Self {
        self.termination = policy;
        self
    }

    /// Claim up to `batch_size` rows of `R` matching `eligible`, oldest
    /// `last_processed_at` first.
    pub fn claim<R, F>(&self, guard: &ClaimGuard, eligible: F) -> SchedulerResult<Claim>
    where
        R: Record,
        F: FnMut(&R) -> bool,
    {
        let claim = guard.acquire_batch(|excluded| {
            self.store.claim::<R, F>(excluded, self.config.batch_size, eligible)
        })?;
        Ok(claim)
    }

    /// Await a runner or stats call under the runner timeout. Failures are
    /// logged and yield `None`.
    pub async fn call_runner<T, Fut>(&self, what: &'static str, entity: &str, call: Fut) -> Option<T>
    where
        Fut: Future<Output = anyhow::Result<T>>,
    {
        match tokio::time::timeout(self.config.runner_timeout(), call).await {
            Ok(Ok(value)) => Some(value),
            Ok(Err(e)) => {
                warn!(%entity, call = what, error = %e, "runner call failed");
                None
            }
            Err(_) => {
                warn!(
                    %entity,
                    call = what,
                    timeout_secs = self.config.runner_timeout_secs,
                    "runner call timed out"
                );
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn drain_waits_for_nested_reconcilers() {
        let reconcilers = Reconcilers::default();
        let settled = Arc::new(AtomicUsize::new(0));

        let inner = reconcilers.clone();
        let count = Arc::clone(&settled);
        reconcilers.spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let count_inner = Arc::clone(&count);
            inner.spawn(async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                count_inner.fetch_add(1, Ordering::SeqCst);
            });
            count.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(reconcilers.len(), 1);

        reconcilers.drain().await;
        assert_eq!(settled.load(Ordering::SeqCst), 2);
        assert!(reconcilers.is_empty());
    }
}
