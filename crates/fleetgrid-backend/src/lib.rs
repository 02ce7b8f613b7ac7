//! fleetgrid-backend — uniform access to heterogeneous cloud backends.
//!
//! # Components
//!
//! - **`compute`** — `Compute` trait and optional capability traits
//! - **`error`** — `BackendError` (recoverable, provider-reported) and `CallError`
//! - **`registry`** — per-project backends in preference order
//! - **`blocking`** — bounded, timed offload of blocking SDK calls
//! - **`local`** — the local-host backend

pub mod blocking;
pub mod compute;
pub mod error;
pub mod local;
pub mod registry;

pub use blocking::{BlockingPool, PendingCall};
pub use compute::{
    Compute, ComputeWithGroupProvisioningSupport, ComputeWithPlacementGroupSupport,
    ComputeWithVolumeSupport, InstanceConfig,
};
pub use error::{BackendError, BackendResult, CallError};
pub use local::LocalCompute;
pub use registry::BackendRegistry;
