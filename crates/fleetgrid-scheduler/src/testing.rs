//! Scripted fakes and fixtures for task tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use fleetgrid_autoscale::PerWindowStats;
use fleetgrid_backend::*;
use fleetgrid_state::*;

use crate::config::SchedulerConfig;
use crate::context::SchedulerContext;
use crate::runner::*;

pub const PROJECT: &str = "main";

/// A backend whose every operation succeeds unless told otherwise.
pub struct FakeCompute {
    backend: BackendType,
    offers: Mutex<Vec<InstanceOffer>>,
    failures: Mutex<HashMap<&'static str, BackendError>>,
    failing_instance_types: Mutex<HashSet<String>>,
    slow: Mutex<HashMap<String, Duration>>,
    calls: Mutex<Vec<String>>,
    volume_support: bool,
    placement_group_support: bool,
    group_support: bool,
}

impl FakeCompute {
    pub fn new(backend: BackendType) -> Self {
        Self {
            backend,
            offers: Mutex::new(Vec::new()),
            failures: Mutex::new(HashMap::new()),
            failing_instance_types: Mutex::new(HashSet::new()),
            slow: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
            volume_support: true,
            placement_group_support: true,
            group_support: true,
        }
    }

    pub fn without_capabilities(mut self) -> Self {
        self.volume_support = false;
        self.placement_group_support = false;
        self.group_support = false;
        self
    }

    pub fn with_offers(self, offers: Vec<InstanceOffer>) -> Self {
        *self.offers.lock().unwrap() = offers
            .into_iter()
            .map(|mut o| {
                o.backend = self.backend;
                o
            })
            .collect();
        self
    }

    /// Make `op` fail with `error` until [`succeed`](Self::succeed) is called.
    pub fn fail(&self, op: &'static str, error: BackendError) {
        self.failures.lock().unwrap().insert(op, error);
    }

    pub fn succeed(&self, op: &'static str) {
        self.failures.lock().unwrap().remove(op);
    }

    pub fn fail_instance_type(&self, name: &str) {
        self.failing_instance_types.lock().unwrap().insert(name.to_string());
    }

    /// Make `create_instance` and `create_volume` for `name` (an instance
    /// type or a volume ID) block for `delay` before answering.
    pub fn slow_down(&self, name: &str, delay: Duration) {
        self.slow.lock().unwrap().insert(name.to_string(), delay);
    }

    fn maybe_block(&self, name: &str) {
        let delay = self.slow.lock().unwrap().get(name).copied();
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
    }

    /// Calls made so far, as `op:argument`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count_calls(&self, op: &str) -> usize {
        let prefix = format!("{op}:");
        self.calls().iter().filter(|c| c.starts_with(&prefix)).count()
    }

    fn record(&self, op: &'static str, arg: &str) -> BackendResult<()> {
        self.calls.lock().unwrap().push(format!("{op}:{arg}"));
        match self.failures.lock().unwrap().get(op) {
            Some(e) => Err(e.clone()),
            None => Ok(()),
        }
    }
}

impl Compute for FakeCompute {
    fn backend_type(&self) -> BackendType {
        self.backend
    }

    fn get_offers(&self, _: &Requirements) -> BackendResult<Vec<InstanceOffer>> {
        self.record("get_offers", "")?;
        Ok(self.offers.lock().unwrap().clone())
    }

    fn create_instance(&self, offer: &InstanceOffer, config: &InstanceConfig) -> BackendResult<JobProvisioningData> {
        self.record("create_instance", &offer.instance.name)?;
        self.maybe_block(&offer.instance.name);
        if self.failing_instance_types.lock().unwrap().contains(&offer.instance.name) {
            return Err(BackendError::NoCapacity(offer.instance.name.clone()));
        }
        Ok(JobProvisioningData {
            backend: self.backend,
            instance_type: offer.instance.clone(),
            instance_id: format!("i-{}", config.job_id),
            region: offer.region.clone(),
            hostname: Some("10.0.0.1".to_string()),
            ssh_port: Some(22),
            username: "ubuntu".to_string(),
            price: offer.price,
        })
    }

    fn terminate_instance(&self, instance_id: &str, _: &str) -> BackendResult<()> {
        self.record("terminate_instance", instance_id)
    }

    fn as_volume_support(&self) -> Option<&dyn ComputeWithVolumeSupport> {
        self.volume_support.then_some(self as &dyn ComputeWithVolumeSupport)
    }

    fn as_placement_group_support(&self) -> Option<&dyn ComputeWithPlacementGroupSupport> {
        self.placement_group_support
            .then_some(self as &dyn ComputeWithPlacementGroupSupport)
    }

    fn as_group_provisioning_support(&self) -> Option<&dyn ComputeWithGroupProvisioningSupport> {
        self.group_support
            .then_some(self as &dyn ComputeWithGroupProvisioningSupport)
    }
}

impl ComputeWithVolumeSupport for FakeCompute {
    fn create_volume(&self, volume: &Volume) -> BackendResult<VolumeProvisioningData> {
        self.record("create_volume", &volume.id)?;
        self.maybe_block(&volume.id);
        Ok(VolumeProvisioningData {
            backend: self.backend,
            volume_id: format!("vol-{}", volume.id),
            size_gib: volume.configuration.size_gib.unwrap_or(100),
            availability_zone: Some("us-east-1a".to_string()),
            price: Some(0.08),
        })
    }

    fn register_volume(&self, volume: &Volume) -> BackendResult<VolumeProvisioningData> {
        self.record("register_volume", &volume.id)?;
        Ok(VolumeProvisioningData {
            backend: self.backend,
            volume_id: volume.configuration.volume_id.clone().unwrap_or_default(),
            size_gib: 50,
            availability_zone: None,
            price: None,
        })
    }

    fn delete_volume(&self, volume: &Volume) -> BackendResult<()> {
        self.record("delete_volume", &volume.id)
    }
}

impl ComputeWithPlacementGroupSupport for FakeCompute {
    fn create_placement_group(&self, group: &PlacementGroup) -> BackendResult<PlacementGroupProvisioningData> {
        self.record("create_placement_group", &group.id)?;
        Ok(group.provisioning_data.clone())
    }

    fn delete_placement_group(&self, group: &PlacementGroup) -> BackendResult<()> {
        self.record("delete_placement_group", &group.id)
    }
}

impl ComputeWithGroupProvisioningSupport for FakeCompute {
    fn terminate_compute_group(&self, group: &ComputeGroup) -> BackendResult<()> {
        self.record("terminate_compute_group", &group.id)
    }
}

/// A runner with scripted per-job answers.
#[derive(Default)]
pub struct FakeRunner {
    states: Mutex<HashMap<String, RunnerJobState>>,
    metrics: Mutex<HashMap<String, JobMetricsPoint>>,
    hang: AtomicBool,
}

impl FakeRunner {
    pub fn set_state(&self, job_id: &str, state: RunnerJobState) {
        self.states.lock().unwrap().insert(job_id.to_string(), state);
    }

    pub fn set_metrics(&self, point: JobMetricsPoint) {
        self.metrics.lock().unwrap().insert(point.job_id.clone(), point);
    }

    /// Never answer from now on.
    pub fn hang(&self) {
        self.hang.store(true, Ordering::SeqCst);
    }

    async fn maybe_hang(&self) {
        if self.hang.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
    }
}

impl RunnerClient for FakeRunner {
    fn get_job_state<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, anyhow::Result<RunnerJobState>> {
        Box::pin(async move {
            self.maybe_hang().await;
            self.states
                .lock()
                .unwrap()
                .get(&job.id)
                .cloned()
                .ok_or_else(|| anyhow::anyhow!("runner of {} unreachable", job.id))
        })
    }

    fn get_metrics<'a>(&'a self, job: &'a Job) -> BoxFuture<'a, anyhow::Result<Option<JobMetricsPoint>>> {
        Box::pin(async move {
            self.maybe_hang().await;
            Ok(self.metrics.lock().unwrap().get(&job.id).cloned())
        })
    }
}

#[derive(Default)]
pub struct FakeStats {
    stats: Mutex<HashMap<String, PerWindowStats>>,
}

impl FakeStats {
    pub fn set(&self, run_id: &str, stats: PerWindowStats) {
        self.stats.lock().unwrap().insert(run_id.to_string(), stats);
    }
}

impl ServiceStatsSource for FakeStats {
    fn get_stats<'a>(&'a self, run: &'a Run) -> BoxFuture<'a, anyhow::Result<Option<PerWindowStats>>> {
        Box::pin(async move { Ok(self.stats.lock().unwrap().get(&run.id).cloned()) })
    }
}

// ── Fixtures ──────────────────────────────────────────────────────

pub fn test_context(compute: Arc<FakeCompute>) -> SchedulerContext {
    let store = StateStore::open_in_memory().unwrap();
    let backends = BackendRegistry::new().with_backend(PROJECT, compute);
    let config = SchedulerConfig {
        runner_timeout_secs: 1,
        backend_call_timeout_secs: 5,
        ..Default::default()
    };
    SchedulerContext::new(store, backends, config)
}

pub fn offer(name: &str, cpus: u32, price: f64) -> InstanceOffer {
    InstanceOffer {
        backend: BackendType::Aws,
        region: "us-east-1".to_string(),
        instance: InstanceType {
            name: name.to_string(),
            resources: InstanceResources {
                cpus,
                memory_mib: u64::from(cpus) * 4096,
                gpus: vec![],
                spot: false,
                disk_size_mib: 100 * 1024,
            },
        },
        price,
    }
}

pub fn test_spec() -> RunSpec {
    RunSpec {
        image: "python:3.12".to_string(),
        requirements: Requirements {
            cpus: 2,
            memory_mib: 4096,
            ..Default::default()
        },
        replicas: ReplicaBounds { min: 1, max: 1 },
        jobs_per_replica: 1,
        scaling: None,
        retry: None,
        max_duration: None,
    }
}

pub fn test_run(id: &str, spec: RunSpec) -> Run {
    Run {
        id: id.to_string(),
        project: PROJECT.to_string(),
        name: format!("{id}-name"),
        desired_replica_count: spec.replicas.min,
        spec,
        status: RunStatus::Submitted,
        termination_reason: None,
        status_message: None,
        last_scaled_at: None,
        gateway_id: None,
        submitted_at: epoch_secs(),
        last_processed_at: 0,
        deleted: false,
    }
}

pub fn test_job(run: &Run, replica_num: u32, status: JobStatus) -> Job {
    let mut job = Job::new_submission(run, replica_num, 0, 0, run.submitted_at);
    job.status = status;
    job
}

/// Provisioning data as the fake backend would return it.
pub fn provisioned(job: &mut Job) {
    job.provisioning_data = Some(JobProvisioningData {
        backend: BackendType::Aws,
        instance_type: offer("m5.large", 2, 0.1).instance,
        instance_id: format!("i-{}", job.id),
        region: "us-east-1".to_string(),
        hostname: None,
        ssh_port: None,
        username: "ubuntu".to_string(),
        price: 0.1,
    });
}

pub fn test_volume(id: &str) -> Volume {
    Volume {
        id: id.to_string(),
        project: PROJECT.to_string(),
        name: format!("{id}-name"),
        configuration: VolumeConfiguration {
            backend: BackendType::Aws,
            region: "us-east-1".to_string(),
            size_gib: Some(100),
            volume_id: None,
            auto_cleanup_duration: None,
        },
        status: VolumeStatus::Submitted,
        status_message: None,
        provisioning_data: None,
        created_at: epoch_secs(),
        last_processed_at: 0,
        last_job_processed_at: None,
        deleted: false,
        deleted_at: None,
    }
}

pub fn test_placement_group(id: &str) -> PlacementGroup {
    PlacementGroup {
        id: id.to_string(),
        project: PROJECT.to_string(),
        name: format!("{id}-name"),
        fleet_id: "fleet-1".to_string(),
        fleet_deleted: true,
        deleted: false,
        deleted_at: None,
        provisioning_data: PlacementGroupProvisioningData {
            backend: BackendType::Aws,
            region: "us-east-1".to_string(),
            backend_group_id: format!("aws-{id}"),
        },
        created_at: 0,
        first_termination_retry_at: None,
        last_termination_retry_at: None,
        last_processed_at: 0,
    }
}

pub fn test_compute_group(id: &str) -> ComputeGroup {
    ComputeGroup {
        id: id.to_string(),
        project: PROJECT.to_string(),
        fleet_id: "fleet-1".to_string(),
        status: ComputeGroupStatus::Terminating,
        provisioning_data: ComputeGroupProvisioningData {
            backend: BackendType::Aws,
            region: "us-east-1".to_string(),
            backend_group_id: format!("aws-{id}"),
            instance_ids: vec!["i-1".to_string(), "i-2".to_string()],
        },
        created_at: 0,
        first_termination_retry_at: None,
        last_termination_retry_at: None,
        deleted: false,
        deleted_at: None,
        last_processed_at: 0,
    }
}
