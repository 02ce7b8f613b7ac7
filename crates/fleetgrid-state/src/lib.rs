//! fleetgrid-state — embedded state store for the fleetgrid control plane.
//!
//! Backed by [redb](https://docs.rs/redb), provides persistent and in-memory
//! state for runs, jobs, volumes, placement groups, compute groups, and job
//! metrics, plus the oldest-first row claim query periodic tasks start from.
//!
//! # Architecture
//!
//! All domain types are JSON-serialized into redb's `&[u8]` value columns.
//! Top-level entities are keyed by ID; owned children use composite keys
//! (`{volume_id}:{instance_id}`, `{job_id}:{timestamp}`) for prefix scans.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod clock;
pub mod error;
pub mod resources;
pub mod store;
pub mod tables;
pub mod types;

pub use clock::{epoch_micros, epoch_secs};
pub use error::{StateError, StateResult};
pub use resources::*;
pub use store::StateStore;
pub use tables::{Keyed, Record};
pub use types::*;
