//! Backend-agnostic resource descriptions.
//!
//! Offers, requirements, and the provisioning data recorded on entities
//! once a backend has created something. These live next to the entity
//! types because runs persist their requirements and jobs/volumes/groups
//! persist the provisioning data returned by a backend.

use serde::{Deserialize, Serialize};

/// Cloud backend kinds known to the control plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendType {
    Aws,
    Azure,
    Gcp,
    Oci,
    Lambda,
    Runpod,
    Vastai,
    Tensordock,
    Datacrunch,
    Cudo,
    Nebius,
    Vultr,
    Kubernetes,
    Local,
}

impl BackendType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Azure => "azure",
            Self::Gcp => "gcp",
            Self::Oci => "oci",
            Self::Lambda => "lambda",
            Self::Runpod => "runpod",
            Self::Vastai => "vastai",
            Self::Tensordock => "tensordock",
            Self::Datacrunch => "datacrunch",
            Self::Cudo => "cudo",
            Self::Nebius => "nebius",
            Self::Vultr => "vultr",
            Self::Kubernetes => "kubernetes",
            Self::Local => "local",
        }
    }
}

impl std::fmt::Display for BackendType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Offers ────────────────────────────────────────────────────────

/// A single GPU attached to an instance type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Gpu {
    pub name: String,
    pub memory_mib: u64,
}

/// Hardware of an instance type.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceResources {
    pub cpus: u32,
    pub memory_mib: u64,
    #[serde(default)]
    pub gpus: Vec<Gpu>,
    #[serde(default)]
    pub spot: bool,
    #[serde(default)]
    pub disk_size_mib: u64,
}

impl InstanceResources {
    /// Sum of memory over all GPUs, in MiB.
    pub fn total_gpu_memory_mib(&self) -> u64 {
        self.gpus.iter().map(|g| g.memory_mib).sum()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceType {
    pub name: String,
    pub resources: InstanceResources,
}

/// A priced, region-scoped instance configuration offered by a backend.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstanceOffer {
    pub backend: BackendType,
    pub region: String,
    pub instance: InstanceType,
    /// Hourly price in USD.
    pub price: f64,
}

// ── Requirements ──────────────────────────────────────────────────

/// GPU part of a job's requirements.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct GpuRequirement {
    /// Acceptable GPU names; empty means any.
    #[serde(default)]
    pub names: Vec<String>,
    /// Number of GPUs. Defaults to 1 when omitted.
    pub count: Option<u32>,
    /// Minimum memory per GPU in MiB.
    pub memory_mib: Option<u64>,
}

impl GpuRequirement {
    pub fn count(&self) -> u32 {
        self.count.unwrap_or(1)
    }
}

/// Resource requirements a job places on an offer.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Requirements {
    pub cpus: u32,
    pub memory_mib: u64,
    pub gpu: Option<GpuRequirement>,
    /// `Some(true)` spot only, `Some(false)` on-demand only, `None` either.
    pub spot: Option<bool>,
    pub disk_size_mib: Option<u64>,
    pub max_price: Option<f64>,
}

// ── Provisioning data ─────────────────────────────────────────────

/// Where and how a job's instance was provisioned.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobProvisioningData {
    pub backend: BackendType,
    pub instance_type: InstanceType,
    pub instance_id: String,
    pub region: String,
    pub hostname: Option<String>,
    pub ssh_port: Option<u16>,
    pub username: String,
    pub price: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VolumeProvisioningData {
    pub backend: BackendType,
    /// Provider-assigned volume ID.
    pub volume_id: String,
    pub size_gib: u64,
    pub availability_zone: Option<String>,
    pub price: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlacementGroupProvisioningData {
    pub backend: BackendType,
    pub region: String,
    /// Provider-assigned group ID.
    pub backend_group_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ComputeGroupProvisioningData {
    pub backend: BackendType,
    pub region: String,
    pub backend_group_id: String,
    #[serde(default)]
    pub instance_ids: Vec<String>,
}
