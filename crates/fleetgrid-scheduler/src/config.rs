//! Scheduler tuning. Every value has a default, so a config file only
//! needs to name what it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::task::TaskKind;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Rows claimed per task invocation.
    pub batch_size: usize,
    /// Overlapping invocations allowed per task.
    pub max_inflight_per_task: usize,
    /// Upper bound on a single provider call, in seconds.
    pub backend_call_timeout_secs: u64,
    /// Upper bound on a single runner or stats call, in seconds.
    pub runner_timeout_secs: u64,
    /// Provider calls allowed to block at once.
    pub blocking_pool_size: usize,
    /// Offers tried per submitted job before giving up for lack of capacity.
    pub max_offers_tried: usize,
    pub intervals: TaskIntervals,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            max_inflight_per_task: 2,
            backend_call_timeout_secs: 120,
            runner_timeout_secs: 10,
            blocking_pool_size: 32,
            max_offers_tried: 15,
            intervals: TaskIntervals::default(),
        }
    }
}

impl SchedulerConfig {
    pub fn backend_call_timeout(&self) -> Duration {
        Duration::from_secs(self.backend_call_timeout_secs)
    }

    pub fn runner_timeout(&self) -> Duration {
        Duration::from_secs(self.runner_timeout_secs)
    }
}

/// Tick interval of each task, in seconds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TaskIntervals {
    pub submitted_volumes: u64,
    pub idle_volumes: u64,
    pub placement_groups: u64,
    pub compute_groups: u64,
    pub submitted_jobs: u64,
    pub running_jobs: u64,
    pub terminating_jobs: u64,
    pub runs: u64,
    pub collect_metrics: u64,
    pub delete_metrics: u64,
}

impl Default for TaskIntervals {
    fn default() -> Self {
        Self {
            submitted_volumes: 10,
            idle_volumes: 60,
            placement_groups: 30,
            compute_groups: 15,
            submitted_jobs: 4,
            running_jobs: 4,
            terminating_jobs: 4,
            runs: 2,
            collect_metrics: 10,
            delete_metrics: 300,
        }
    }
}

impl TaskIntervals {
    pub fn for_task(&self, kind: TaskKind) -> Duration {
        let secs = match kind {
            TaskKind::SubmittedVolumes => self.submitted_volumes,
            TaskKind::IdleVolumes => self.idle_volumes,
            TaskKind::PlacementGroups => self.placement_groups,
            TaskKind::ComputeGroups => self.compute_groups,
            TaskKind::SubmittedJobs => self.submitted_jobs,
            TaskKind::RunningJobs => self.running_jobs,
            TaskKind::TerminatingJobs => self.terminating_jobs,
            TaskKind::Runs => self.runs,
            TaskKind::CollectMetrics => self.collect_metrics,
            TaskKind::DeleteMetrics => self.delete_metrics,
        };
        // A zero interval would make `tokio::time::interval` panic.
        Duration::from_secs(secs.max(1))
    }
}

/// How long job metrics are kept, in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsRetention {
    /// Window kept for jobs that are still running.
    pub running_ttl_secs: u64,
    /// Window kept for finished (or vanished) jobs.
    pub finished_ttl_secs: u64,
}

impl Default for MetricsRetention {
    fn default() -> Self {
        Self {
            running_ttl_secs: 60 * 60,
            finished_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}
