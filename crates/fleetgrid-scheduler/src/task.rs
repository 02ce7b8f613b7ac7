//! Periodic task template and the runner that drives the tasks.
//!
//! Every task has the same shape: claim a batch, reload the rows, process
//! each entity independently, commit per entity. Tasks are re-entrant, so
//! the runner lets ticks of the same task overlap up to
//! `max_inflight_per_task`; the claim sets keep overlapping ticks off each
//! other's rows.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

use crate::context::SchedulerContext;
use crate::runner::BoxFuture;
use crate::tasks;

pub trait PeriodicTask: Send + Sync {
    fn name(&self) -> &'static str;

    /// Process one batch.
    fn run_once(&self) -> BoxFuture<'_, anyhow::Result<()>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskKind {
    SubmittedVolumes,
    IdleVolumes,
    PlacementGroups,
    ComputeGroups,
    SubmittedJobs,
    RunningJobs,
    TerminatingJobs,
    Runs,
    CollectMetrics,
    DeleteMetrics,
}

impl TaskKind {
    pub const ALL: [TaskKind; 10] = [
        TaskKind::SubmittedVolumes,
        TaskKind::IdleVolumes,
        TaskKind::PlacementGroups,
        TaskKind::ComputeGroups,
        TaskKind::SubmittedJobs,
        TaskKind::RunningJobs,
        TaskKind::TerminatingJobs,
        TaskKind::Runs,
        TaskKind::CollectMetrics,
        TaskKind::DeleteMetrics,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            TaskKind::SubmittedVolumes => "process_submitted_volumes",
            TaskKind::IdleVolumes => "process_idle_volumes",
            TaskKind::PlacementGroups => "process_placement_groups",
            TaskKind::ComputeGroups => "process_compute_groups",
            TaskKind::SubmittedJobs => "process_submitted_jobs",
            TaskKind::RunningJobs => "process_running_jobs",
            TaskKind::TerminatingJobs => "process_terminating_jobs",
            TaskKind::Runs => "process_runs",
            TaskKind::CollectMetrics => "collect_metrics",
            TaskKind::DeleteMetrics => "delete_metrics",
        }
    }
}

/// A scheduler task bound to its context.
pub struct SchedulerTask {
    kind: TaskKind,
    ctx: Arc<SchedulerContext>,
}

impl SchedulerTask {
    pub fn new(kind: TaskKind, ctx: Arc<SchedulerContext>) -> Self {
        Self { kind, ctx }
    }
}

impl PeriodicTask for SchedulerTask {
    fn name(&self) -> &'static str {
        self.kind.name()
    }

    fn run_once(&self) -> BoxFuture<'_, anyhow::Result<()>> {
        let ctx = &*self.ctx;
        match self.kind {
            TaskKind::SubmittedVolumes => Box::pin(tasks::volumes::process_submitted_volumes(ctx)),
            TaskKind::IdleVolumes => Box::pin(tasks::idle_volumes::process_idle_volumes(ctx)),
            TaskKind::PlacementGroups => {
                Box::pin(tasks::placement_groups::process_placement_groups(ctx))
            }
            TaskKind::ComputeGroups => Box::pin(tasks::compute_groups::process_compute_groups(ctx)),
            TaskKind::SubmittedJobs => Box::pin(tasks::submitted_jobs::process_submitted_jobs(ctx)),
            TaskKind::RunningJobs => Box::pin(tasks::running_jobs::process_running_jobs(ctx)),
            TaskKind::TerminatingJobs => {
                Box::pin(tasks::terminating_jobs::process_terminating_jobs(ctx))
            }
            TaskKind::Runs => Box::pin(tasks::runs::process_runs(ctx)),
            TaskKind::CollectMetrics => Box::pin(tasks::metrics::collect_metrics(ctx)),
            TaskKind::DeleteMetrics => Box::pin(tasks::metrics::delete_metrics(ctx)),
        }
    }
}

/// Drives a set of periodic tasks until shutdown.
pub struct TaskRunner {
    tasks: Vec<(Arc<dyn PeriodicTask>, Duration)>,
    max_inflight: usize,
}

impl TaskRunner {
    pub fn new(max_inflight: usize) -> Self {
        Self {
            tasks: Vec::new(),
            max_inflight: max_inflight.max(1),
        }
    }

    /// Every scheduler task, each at its configured interval.
    pub fn for_scheduler(ctx: Arc<SchedulerContext>) -> Self {
        let mut runner = Self::new(ctx.config.max_inflight_per_task);
        for kind in TaskKind::ALL {
            let interval = ctx.config.intervals.for_task(kind);
            runner = runner.with_task(Arc::new(SchedulerTask::new(kind, Arc::clone(&ctx))), interval);
        }
        runner
    }

    pub fn with_task(mut self, task: Arc<dyn PeriodicTask>, interval: Duration) -> Self {
        self.tasks.push((task, interval));
        self
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Run until `shutdown` flips (or its sender is dropped). In-flight
    /// batches are awaited, never aborted.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        info!(tasks = self.tasks.len(), "task runner started");
        let mut loops = JoinSet::new();
        for (task, interval) in self.tasks {
            loops.spawn(run_task_loop(task, interval, self.max_inflight, shutdown.clone()));
        }
        while let Some(result) = loops.join_next().await {
            if let Err(e) = result {
                error!(error = %e, "task loop failed");
            }
        }
        info!("task runner stopped");
    }
}

async fn run_task_loop(
    task: Arc<dyn PeriodicTask>,
    period: Duration,
    max_inflight: usize,
    mut shutdown: watch::Receiver<bool>,
) {
    let name = task.name();
    let permits = Arc::new(Semaphore::new(max_inflight));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut inflight = JoinSet::new();

    debug!(task = name, period_ms = period.as_millis() as u64, "task loop started");
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let Ok(permit) = Arc::clone(&permits).try_acquire_owned() else {
                    debug!(task = name, "all invocations busy, skipping tick");
                    continue;
                };
                let task = Arc::clone(&task);
                inflight.spawn(async move {
                    let _permit = permit;
                    if let Err(e) = task.run_once().await {
                        error!(task = task.name(), error = %format!("{e:#}"), "task invocation failed");
                    }
                });
            }
            Some(result) = inflight.join_next(), if !inflight.is_empty() => {
                if let Err(e) = result {
                    error!(task = name, error = %e, "task invocation panicked");
                }
            }
            _ = shutdown.changed() => break,
        }
    }

    while let Some(result) = inflight.join_next().await {
        if let Err(e) = result {
            error!(task = name, error = %e, "task invocation panicked");
        }
    }
    debug!(task = name, "task loop stopped");
}
