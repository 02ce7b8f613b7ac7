//! Concrete periodic tasks. Each module exposes one `process_*` entry
//! point (two for metrics) that handles a single claimed batch.

pub mod compute_groups;
pub mod idle_volumes;
pub mod metrics;
pub mod placement_groups;
pub mod running_jobs;
pub mod runs;
pub mod submitted_jobs;
pub mod terminating_jobs;
pub mod volumes;
