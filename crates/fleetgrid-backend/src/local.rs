//! Local backend — the host the daemon runs on, offered as a fixed set of
//! instance types.
//!
//! Used for development and single-machine deployments. Instances,
//! volumes, and groups are bookkeeping only; nothing is provisioned.

use std::collections::HashSet;
use std::sync::Mutex;

use tracing::debug;

use fleetgrid_state::*;

use crate::compute::*;
use crate::error::{BackendError, BackendResult};

pub struct LocalCompute {
    offers: Vec<InstanceOffer>,
    instances: Mutex<HashSet<String>>,
    volumes: Mutex<HashSet<String>>,
}

impl LocalCompute {
    /// A local backend offering the given instance types.
    ///
    /// Offers are re-tagged with [`BackendType::Local`].
    pub fn new(offers: Vec<InstanceOffer>) -> Self {
        let offers = offers
            .into_iter()
            .map(|mut o| {
                o.backend = BackendType::Local;
                o
            })
            .collect();
        Self {
            offers,
            instances: Mutex::new(HashSet::new()),
            volumes: Mutex::new(HashSet::new()),
        }
    }

    /// IDs of instances created and not yet terminated.
    pub fn live_instances(&self) -> Vec<String> {
        let mut ids: Vec<String> = lock(&self.instances).iter().cloned().collect();
        ids.sort();
        ids
    }
}

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

impl Compute for LocalCompute {
    fn backend_type(&self) -> BackendType {
        BackendType::Local
    }

    fn get_offers(&self, _requirements: &Requirements) -> BackendResult<Vec<InstanceOffer>> {
        Ok(self.offers.clone())
    }

    fn create_instance(
        &self,
        offer: &InstanceOffer,
        config: &InstanceConfig,
    ) -> BackendResult<JobProvisioningData> {
        let instance_id = format!("local-{}", config.job_id);
        lock(&self.instances).insert(instance_id.clone());
        debug!(%instance_id, instance_type = %offer.instance.name, "local instance created");
        Ok(JobProvisioningData {
            backend: BackendType::Local,
            instance_type: offer.instance.clone(),
            instance_id,
            region: offer.region.clone(),
            hostname: Some("127.0.0.1".to_string()),
            ssh_port: None,
            username: "root".to_string(),
            price: offer.price,
        })
    }

    fn terminate_instance(&self, instance_id: &str, _region: &str) -> BackendResult<()> {
        let existed = lock(&self.instances).remove(instance_id);
        debug!(%instance_id, existed, "local instance terminated");
        Ok(())
    }

    fn as_volume_support(&self) -> Option<&dyn ComputeWithVolumeSupport> {
        Some(self)
    }

    fn as_placement_group_support(&self) -> Option<&dyn ComputeWithPlacementGroupSupport> {
        Some(self)
    }

    fn as_group_provisioning_support(&self) -> Option<&dyn ComputeWithGroupProvisioningSupport> {
        Some(self)
    }
}

impl ComputeWithVolumeSupport for LocalCompute {
    fn create_volume(&self, volume: &Volume) -> BackendResult<VolumeProvisioningData> {
        let volume_id = format!("local-vol-{}", volume.id);
        lock(&self.volumes).insert(volume_id.clone());
        Ok(VolumeProvisioningData {
            backend: BackendType::Local,
            volume_id,
            size_gib: volume.configuration.size_gib.unwrap_or(100),
            availability_zone: None,
            price: None,
        })
    }

    fn register_volume(&self, volume: &Volume) -> BackendResult<VolumeProvisioningData> {
        let volume_id = volume.configuration.volume_id.clone().ok_or_else(|| {
            BackendError::NotFound(format!("volume {} has no external volume id", volume.id))
        })?;
        lock(&self.volumes).insert(volume_id.clone());
        Ok(VolumeProvisioningData {
            backend: BackendType::Local,
            volume_id,
            size_gib: volume.configuration.size_gib.unwrap_or(0),
            availability_zone: None,
            price: None,
        })
    }

    fn delete_volume(&self, volume: &Volume) -> BackendResult<()> {
        if let Some(data) = &volume.provisioning_data {
            lock(&self.volumes).remove(&data.volume_id);
        }
        Ok(())
    }
}

impl ComputeWithPlacementGroupSupport for LocalCompute {
    fn create_placement_group(
        &self,
        group: &PlacementGroup,
    ) -> BackendResult<PlacementGroupProvisioningData> {
        Ok(PlacementGroupProvisioningData {
            backend: BackendType::Local,
            region: group.provisioning_data.region.clone(),
            backend_group_id: format!("local-pg-{}", group.id),
        })
    }

    fn delete_placement_group(&self, _group: &PlacementGroup) -> BackendResult<()> {
        Ok(())
    }
}

impl ComputeWithGroupProvisioningSupport for LocalCompute {
    fn terminate_compute_group(&self, group: &ComputeGroup) -> BackendResult<()> {
        let mut instances = lock(&self.instances);
        for id in &group.provisioning_data.instance_ids {
            instances.remove(id);
        }
        Ok(())
    }
}
