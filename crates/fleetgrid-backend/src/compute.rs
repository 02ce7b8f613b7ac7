//! The `Compute` interface every backend implements.
//!
//! Methods are synchronous: most provider SDKs block, so callers always
//! dispatch them through [`crate::BlockingPool`]. Optional capabilities
//! (volumes, placement groups, grouped provisioning) are separate traits a
//! backend exposes through the `as_*` accessors; `None` means the backend
//! does not support that resource.

use fleetgrid_state::{
    BackendType, ComputeGroup, InstanceOffer, JobProvisioningData, PlacementGroup,
    PlacementGroupProvisioningData, Requirements, Volume, VolumeProvisioningData,
};

use crate::error::BackendResult;

/// What a backend needs to know to launch an instance for a job.
#[derive(Debug, Clone, PartialEq)]
pub struct InstanceConfig {
    pub project: String,
    pub instance_name: String,
    pub job_id: String,
    pub image: String,
}

pub trait Compute: Send + Sync {
    fn backend_type(&self) -> BackendType;

    /// Offers matching (at least loosely) the requirements. May call the
    /// provider's pricing and capacity APIs.
    fn get_offers(&self, requirements: &Requirements) -> BackendResult<Vec<InstanceOffer>>;

    fn create_instance(
        &self,
        offer: &InstanceOffer,
        config: &InstanceConfig,
    ) -> BackendResult<JobProvisioningData>;

    /// Terminate an instance. Terminating an instance that is already gone
    /// must succeed.
    fn terminate_instance(&self, instance_id: &str, region: &str) -> BackendResult<()>;

    fn as_volume_support(&self) -> Option<&dyn ComputeWithVolumeSupport> {
        None
    }

    fn as_placement_group_support(&self) -> Option<&dyn ComputeWithPlacementGroupSupport> {
        None
    }

    fn as_group_provisioning_support(&self) -> Option<&dyn ComputeWithGroupProvisioningSupport> {
        None
    }
}

pub trait ComputeWithVolumeSupport: Send + Sync {
    fn create_volume(&self, volume: &Volume) -> BackendResult<VolumeProvisioningData>;

    /// Adopt an existing provider volume named by `configuration.volume_id`.
    fn register_volume(&self, volume: &Volume) -> BackendResult<VolumeProvisioningData>;

    fn delete_volume(&self, volume: &Volume) -> BackendResult<()>;
}

pub trait ComputeWithPlacementGroupSupport: Send + Sync {
    fn create_placement_group(
        &self,
        group: &PlacementGroup,
    ) -> BackendResult<PlacementGroupProvisioningData>;

    /// Fails with [`crate::BackendError::InUse`] while instances still
    /// reference the group.
    fn delete_placement_group(&self, group: &PlacementGroup) -> BackendResult<()>;
}

pub trait ComputeWithGroupProvisioningSupport: Send + Sync {
    fn terminate_compute_group(&self, group: &ComputeGroup) -> BackendResult<()>;
}
