//! Domain types for the fleetgrid state store.
//!
//! These are the persisted rows the scheduler moves through their
//! lifecycles: runs and their jobs, volumes and attachments, placement
//! groups, compute groups, and job metrics points. All types are
//! serializable to/from JSON for storage in redb tables.
//!
//! Entities that must stay readable after logical deletion carry a
//! `deleted`/`deleted_at` tombstone that is independent of `status`.
//! Tombstoned rows are never claimed for processing.

use serde::{Deserialize, Serialize};

use crate::resources::*;

pub type ProjectName = String;
pub type RunId = String;
pub type JobId = String;
pub type VolumeId = String;
pub type PlacementGroupId = String;
pub type ComputeGroupId = String;

// ── Run ───────────────────────────────────────────────────────────

/// Immutable desired configuration of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunSpec {
    pub image: String,
    pub requirements: Requirements,
    pub replicas: ReplicaBounds,
    /// Number of jobs each replica consists of (multi-node tasks).
    pub jobs_per_replica: u32,
    /// Request-driven scaling. Only services carry it.
    pub scaling: Option<ScalingSpec>,
    pub retry: Option<RetryPolicy>,
    /// Maximum wall-clock run time of a job in seconds.
    pub max_duration: Option<u64>,
}

/// Min/max replica count for a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReplicaBounds {
    pub min: u32,
    pub max: u32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScalingMetric {
    Rps,
}

/// Autoscaling parameters of a service.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingSpec {
    pub metric: ScalingMetric,
    /// Target requests per second per replica.
    pub target: f64,
    /// Seconds since the last scaling before another scale-up.
    pub scale_up_delay: u64,
    /// Seconds since the last scaling before another scale-down.
    pub scale_down_delay: u64,
}

/// Resubmission policy for jobs that failed to get or keep capacity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct RetryPolicy {
    pub enabled: bool,
    /// Total time since the first submission during which retries happen.
    pub limit_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Submitted,
    Provisioning,
    Running,
    Terminating,
    Terminated,
    Done,
    Failed,
}

impl RunStatus {
    pub fn is_finished(&self) -> bool {
        matches!(self, Self::Terminated | Self::Done | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunTerminationReason {
    AllJobsDone,
    JobFailed,
    RetryLimitExceeded,
    StoppedByUser,
    AbortedByUser,
    ServerError,
}

impl RunTerminationReason {
    /// Final status a run reaches once all its jobs are finished.
    pub fn to_status(&self) -> RunStatus {
        match self {
            Self::AllJobsDone => RunStatus::Done,
            Self::JobFailed | Self::RetryLimitExceeded | Self::ServerError => RunStatus::Failed,
            Self::StoppedByUser | Self::AbortedByUser => RunStatus::Terminated,
        }
    }

    /// Termination reason given to the jobs of a run being terminated.
    pub fn to_job_termination_reason(&self) -> JobTerminationReason {
        match self {
            Self::AllJobsDone => JobTerminationReason::DoneByRunner,
            Self::AbortedByUser => JobTerminationReason::AbortedByUser,
            Self::StoppedByUser => JobTerminationReason::TerminatedByUser,
            Self::JobFailed | Self::RetryLimitExceeded | Self::ServerError => {
                JobTerminationReason::TerminatedByServer
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Run {
    pub id: RunId,
    pub project: ProjectName,
    pub name: String,
    pub spec: RunSpec,
    pub status: RunStatus,
    pub termination_reason: Option<RunTerminationReason>,
    pub status_message: Option<String>,
    pub desired_replica_count: u32,
    pub last_scaled_at: Option<u64>,
    pub gateway_id: Option<String>,
    pub submitted_at: u64,
    pub last_processed_at: u64,
    #[serde(default)]
    pub deleted: bool,
}

// ── Job ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Submitted,
    Provisioning,
    Pulling,
    Running,
    Terminating,
    Terminated,
    Aborted,
    Failed,
    Done,
}

impl JobStatus {
    /// Terminal statuses never transition again.
    pub fn is_finished(&self) -> bool {
        matches!(
            self,
            Self::Terminated | Self::Aborted | Self::Failed | Self::Done
        )
    }

    /// Statuses in which the job holds an instance.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Provisioning | Self::Pulling | Self::Running)
    }
}

/// Closed taxonomy of reasons a job stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobTerminationReason {
    FailedToStartDueToNoCapacity,
    InterruptedByNoCapacity,
    InstanceUnreachable,
    TerminatedByUser,
    AbortedByUser,
    TerminatedByServer,
    ScaledDown,
    DoneByRunner,
    ContainerExitedWithError,
    CreatingContainerError,
    ExecutorError,
    VolumeError,
    MaxDurationExceeded,
}

impl JobTerminationReason {
    /// Terminal status a job reaches once termination completes.
    pub fn to_status(&self) -> JobStatus {
        match self {
            Self::TerminatedByUser
            | Self::TerminatedByServer
            | Self::ScaledDown
            | Self::MaxDurationExceeded => JobStatus::Terminated,
            Self::AbortedByUser => JobStatus::Aborted,
            Self::DoneByRunner => JobStatus::Done,
            Self::FailedToStartDueToNoCapacity
            | Self::InterruptedByNoCapacity
            | Self::InstanceUnreachable
            | Self::ContainerExitedWithError
            | Self::CreatingContainerError
            | Self::ExecutorError
            | Self::VolumeError => JobStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::FailedToStartDueToNoCapacity => "failed_to_start_due_to_no_capacity",
            Self::InterruptedByNoCapacity => "interrupted_by_no_capacity",
            Self::InstanceUnreachable => "instance_unreachable",
            Self::TerminatedByUser => "terminated_by_user",
            Self::AbortedByUser => "aborted_by_user",
            Self::TerminatedByServer => "terminated_by_server",
            Self::ScaledDown => "scaled_down",
            Self::DoneByRunner => "done_by_runner",
            Self::ContainerExitedWithError => "container_exited_with_error",
            Self::CreatingContainerError => "creating_container_error",
            Self::ExecutorError => "executor_error",
            Self::VolumeError => "volume_error",
            Self::MaxDurationExceeded => "max_duration_exceeded",
        }
    }
}

impl std::fmt::Display for JobTerminationReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One submission of one job of one replica of a run.
///
/// Retries create a new `Job` row with the same `replica_num`/`job_num`
/// and an incremented `submission_num`; the previous row keeps its
/// terminal status.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    pub id: JobId,
    pub project: ProjectName,
    pub run_id: RunId,
    pub replica_num: u32,
    pub job_num: u32,
    pub submission_num: u32,
    pub status: JobStatus,
    pub termination_reason: Option<JobTerminationReason>,
    pub status_message: Option<String>,
    pub provisioning_data: Option<JobProvisioningData>,
    pub submitted_at: u64,
    pub started_at: Option<u64>,
    pub finished_at: Option<u64>,
    pub last_processed_at: u64,
}

impl Job {
    /// Build the ID of a given job submission.
    pub fn submission_id(run_id: &str, replica_num: u32, job_num: u32, submission_num: u32) -> JobId {
        format!("{run_id}-r{replica_num}-j{job_num}-s{submission_num}")
    }

    /// A fresh `Submitted` job for the given slot of a run.
    pub fn new_submission(
        run: &Run,
        replica_num: u32,
        job_num: u32,
        submission_num: u32,
        now: u64,
    ) -> Self {
        Self {
            id: Self::submission_id(&run.id, replica_num, job_num, submission_num),
            project: run.project.clone(),
            run_id: run.id.clone(),
            replica_num,
            job_num,
            submission_num,
            status: JobStatus::Submitted,
            termination_reason: None,
            status_message: None,
            provisioning_data: None,
            submitted_at: now,
            started_at: None,
            finished_at: None,
            last_processed_at: 0,
        }
    }
}

// ── Volume ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeConfiguration {
    pub backend: BackendType,
    pub region: String,
    pub size_gib: Option<u64>,
    /// Existing provider volume to register instead of creating one.
    pub volume_id: Option<String>,
    /// Idle seconds before the volume is deleted; `None` or `<= 0` disables.
    pub auto_cleanup_duration: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeStatus {
    Submitted,
    Active,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Volume {
    pub id: VolumeId,
    pub project: ProjectName,
    pub name: String,
    pub configuration: VolumeConfiguration,
    pub status: VolumeStatus,
    pub status_message: Option<String>,
    pub provisioning_data: Option<VolumeProvisioningData>,
    pub created_at: u64,
    pub last_processed_at: u64,
    /// Last time a job using this volume was processed.
    pub last_job_processed_at: Option<u64>,
    #[serde(default)]
    pub deleted: bool,
    pub deleted_at: Option<u64>,
}

/// A volume attached to an instance. Owned by the volume.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeAttachment {
    pub volume_id: VolumeId,
    pub instance_id: String,
    pub attached_at: u64,
}

/// A volume together with its eager-loaded attachments.
#[derive(Debug, Clone, PartialEq)]
pub struct VolumeWithAttachments {
    pub volume: Volume,
    pub attachments: Vec<VolumeAttachment>,
}

// ── Placement group ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacementGroup {
    pub id: PlacementGroupId,
    pub project: ProjectName,
    pub name: String,
    pub fleet_id: String,
    /// Set once the owning fleet is deleted; only then is the group removed.
    pub fleet_deleted: bool,
    #[serde(default)]
    pub deleted: bool,
    pub deleted_at: Option<u64>,
    pub provisioning_data: PlacementGroupProvisioningData,
    pub created_at: u64,
    pub first_termination_retry_at: Option<u64>,
    pub last_termination_retry_at: Option<u64>,
    pub last_processed_at: u64,
}

// ── Compute group ─────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputeGroupStatus {
    Running,
    Terminating,
    Terminated,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeGroup {
    pub id: ComputeGroupId,
    pub project: ProjectName,
    pub fleet_id: String,
    pub status: ComputeGroupStatus,
    pub provisioning_data: ComputeGroupProvisioningData,
    pub created_at: u64,
    pub first_termination_retry_at: Option<u64>,
    pub last_termination_retry_at: Option<u64>,
    #[serde(default)]
    pub deleted: bool,
    pub deleted_at: Option<u64>,
    pub last_processed_at: u64,
}

// ── Metrics ───────────────────────────────────────────────────────

/// One sample of a running job's resource usage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobMetricsPoint {
    pub job_id: JobId,
    /// Unix timestamp in microseconds.
    pub timestamp_micro: u64,
    /// Cumulative CPU time in microseconds.
    pub cpu_usage_micro: u64,
    pub memory_usage_bytes: u64,
    pub memory_working_set_bytes: u64,
    #[serde(default)]
    pub gpus_memory_usage_bytes: Vec<u64>,
    #[serde(default)]
    pub gpus_util_percent: Vec<u32>,
}
