//! fleetd.toml configuration.

use std::path::Path;

use serde::{Deserialize, Serialize};

use fleetgrid_lifecycle::TerminationRetryPolicy;
use fleetgrid_scheduler::{MetricsRetention, SchedulerConfig};
use fleetgrid_state::{BackendType, Gpu, InstanceOffer, InstanceResources, InstanceType};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub scheduler: SchedulerConfig,
    pub retention: MetricsRetention,
    pub termination: TerminationRetryPolicy,
    pub backends: Vec<BackendConfig>,
}

/// A backend enabled for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    pub project: String,
    #[serde(rename = "type")]
    pub backend: BackendType,
    /// Instance types a local backend offers.
    #[serde(default)]
    pub offers: Vec<OfferConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OfferConfig {
    pub name: String,
    pub cpus: u32,
    pub memory_mib: u64,
    #[serde(default)]
    pub gpus: Vec<Gpu>,
    #[serde(default)]
    pub spot: bool,
    #[serde(default)]
    pub disk_size_mib: u64,
    #[serde(default)]
    pub price: f64,
    #[serde(default = "default_region")]
    pub region: String,
}

fn default_region() -> String {
    "local".to_string()
}

impl OfferConfig {
    pub fn to_offer(&self, backend: BackendType) -> InstanceOffer {
        InstanceOffer {
            backend,
            region: self.region.clone(),
            instance: InstanceType {
                name: self.name.clone(),
                resources: InstanceResources {
                    cpus: self.cpus,
                    memory_mib: self.memory_mib,
                    gpus: self.gpus.clone(),
                    spot: self.spot,
                    disk_size_mib: self.disk_size_mib,
                },
            },
            price: self.price,
        }
    }
}

impl DaemonConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: DaemonConfig = toml::from_str(&content)?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }
}
