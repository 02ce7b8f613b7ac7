//! Assemble the control plane from a config and run it until shutdown.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::sync::watch;
use tracing::{info, warn};

use fleetgrid_backend::{BackendRegistry, LocalCompute};
use fleetgrid_scheduler::{SchedulerContext, TaskRunner};
use fleetgrid_state::{BackendType, StateStore};

use crate::config::DaemonConfig;

/// Backends with an implementation in this build. Other types configured
/// for a project are skipped with a warning.
pub fn build_registry(config: &DaemonConfig) -> BackendRegistry {
    let mut registry = BackendRegistry::new();
    for backend in &config.backends {
        match backend.backend {
            BackendType::Local => {
                let offers = backend
                    .offers
                    .iter()
                    .map(|o| o.to_offer(BackendType::Local))
                    .collect();
                registry.register(&backend.project, Arc::new(LocalCompute::new(offers)));
                info!(
                    project = %backend.project,
                    offers = backend.offers.len(),
                    "local backend registered"
                );
            }
            other => {
                warn!(project = %backend.project, backend = %other, "backend not available in this build, skipping");
            }
        }
    }
    registry
}

pub fn build_context(config: &DaemonConfig, store: StateStore) -> SchedulerContext {
    SchedulerContext::new(store, build_registry(config), config.scheduler.clone())
        .with_retention(config.retention)
        .with_termination_policy(config.termination)
}

/// Open the store under `data_dir` and run every scheduler task until
/// `shutdown` resolves. In-flight batches and backend calls still being
/// reconciled finish before this returns.
pub async fn run<S>(config: DaemonConfig, data_dir: &Path, shutdown: S) -> anyhow::Result<()>
where
    S: Future<Output = ()>,
{
    std::fs::create_dir_all(data_dir)?;
    let db_path = data_dir.join("fleetgrid.redb");
    let store = StateStore::open(&db_path)?;
    info!(path = ?db_path, "state store opened");

    let ctx = Arc::new(build_context(&config, store));
    let runner = TaskRunner::for_scheduler(Arc::clone(&ctx));
    info!(tasks = runner.len(), "scheduler initialized");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handle = tokio::spawn(runner.run(shutdown_rx));

    shutdown.await;
    info!("shutdown signal received");
    let _ = shutdown_tx.send(true);

    handle.await?;
    ctx.reconcilers.drain().await;
    info!("fleetgrid daemon stopped");
    Ok(())
}
