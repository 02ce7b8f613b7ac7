//! Interfaces to collaborators reached over the network: the agent running
//! on each instance, and the proxy that counts service requests.
//!
//! Both may hang. Callers always wrap them in the configured runner
//! timeout, and a failed or timed-out call never changes entity state.

use std::future::Future;
use std::pin::Pin;

use fleetgrid_autoscale::PerWindowStats;
use fleetgrid_state::{Job, JobMetricsPoint, JobTerminationReason, Run};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// What the runner on a job's instance reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunnerJobState {
    /// The instance is not ready to run the job yet.
    Provisioning,
    Pulling,
    Running,
    /// The job exited successfully.
    Done,
    Failed {
        reason: JobTerminationReason,
        message: Option<String>,
    },
}

pub trait RunnerClient: Send + Sync {
    fn get_job_state<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, anyhow::Result<RunnerJobState>>;

    /// The latest resource usage sample, if the runner has one.
    fn get_metrics<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, anyhow::Result<Option<JobMetricsPoint>>>;
}

pub trait ServiceStatsSource: Send + Sync {
    /// Request statistics of a service, or `None` if none were recorded.
    fn get_stats<'a>(&'a self, run: &'a Run) -> BoxFuture<'a, anyhow::Result<Option<PerWindowStats>>>;
}
