//! redb table definitions for the fleetgrid state store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized domain types).
//! Top-level entities are keyed by their ID. Owned children use composite keys
//! `{parent_id}:{child}` so they can be found by prefix scan.

use redb::TableDefinition;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::types::*;

/// Runs keyed by `{run_id}`.
pub const RUNS: TableDefinition<&str, &[u8]> = TableDefinition::new("runs");

/// Job submissions keyed by `{job_id}`.
pub const JOBS: TableDefinition<&str, &[u8]> = TableDefinition::new("jobs");

/// Volumes keyed by `{volume_id}`.
pub const VOLUMES: TableDefinition<&str, &[u8]> = TableDefinition::new("volumes");

/// Volume attachments keyed by `{volume_id}:{instance_id}`.
pub const VOLUME_ATTACHMENTS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("volume_attachments");

/// Placement groups keyed by `{placement_group_id}`.
pub const PLACEMENT_GROUPS: TableDefinition<&str, &[u8]> =
    TableDefinition::new("placement_groups");

/// Compute groups keyed by `{compute_group_id}`.
pub const COMPUTE_GROUPS: TableDefinition<&str, &[u8]> = TableDefinition::new("compute_groups");

/// Job metrics points keyed by `{job_id}:{timestamp_micro:020}`.
pub const JOB_METRICS: TableDefinition<&str, &[u8]> = TableDefinition::new("job_metrics");

/// A value stored in one of the tables above.
pub trait Keyed: Serialize + DeserializeOwned {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]>;

    /// Build the key for this value's table.
    fn table_key(&self) -> String;
}

/// A top-level entity visited by periodic tasks.
///
/// Records are keyed by `id()` and claimed oldest-processed-first.
pub trait Record: Keyed {
    fn id(&self) -> &str;
    fn last_processed_at(&self) -> u64;
    fn set_last_processed_at(&mut self, at: u64);
}

macro_rules! impl_record {
    ($ty:ty, $table:ident) => {
        impl Keyed for $ty {
            const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = $table;

            fn table_key(&self) -> String {
                self.id.clone()
            }
        }

        impl Record for $ty {
            fn id(&self) -> &str {
                &self.id
            }

            fn last_processed_at(&self) -> u64 {
                self.last_processed_at
            }

            fn set_last_processed_at(&mut self, at: u64) {
                self.last_processed_at = at;
            }
        }
    };
}

impl_record!(Run, RUNS);
impl_record!(Job, JOBS);
impl_record!(Volume, VOLUMES);
impl_record!(PlacementGroup, PLACEMENT_GROUPS);
impl_record!(ComputeGroup, COMPUTE_GROUPS);

impl Keyed for VolumeAttachment {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = VOLUME_ATTACHMENTS;

    fn table_key(&self) -> String {
        format!("{}:{}", self.volume_id, self.instance_id)
    }
}

impl Keyed for JobMetricsPoint {
    const TABLE: TableDefinition<'static, &'static str, &'static [u8]> = JOB_METRICS;

    fn table_key(&self) -> String {
        // Zero-padded so lexicographic key order is chronological.
        format!("{}:{:020}", self.job_id, self.timestamp_micro)
    }
}
