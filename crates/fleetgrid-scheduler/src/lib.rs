//! fleetgrid-scheduler — the control plane's background processing.
//!
//! Every concern is a periodic task over a shared [`SchedulerContext`]. A
//! tick claims a small batch of rows, reloads them, and pushes each entity
//! one step through its lifecycle, calling out to backends on a bounded
//! blocking pool.
//!
//! # Architecture
//!
//! ```text
//! TaskRunner
//!   └── one loop per TaskKind (interval, bounded in-flight ticks)
//!       └── SchedulerTask ──► tasks::*
//!             ├── ClaimGuard (in-process claims per entity kind)
//!             ├── StateStore (claim / reload / update / touch)
//!             ├── BackendRegistry + BlockingPool (provider calls)
//!             └── RunnerClient / ServiceStatsSource (optional)
//! ```
//!
//! A failure on one entity is logged and never stops the batch; the row's
//! `last_processed_at` is still bumped so it rotates behind its peers.

pub mod claim;
pub mod config;
pub mod context;
pub mod error;
pub mod runner;
pub mod task;
pub mod tasks;

#[cfg(test)]
mod testing;

pub use claim::{Claim, ClaimGuard};
pub use config::{MetricsRetention, SchedulerConfig, TaskIntervals};
pub use context::{ClaimGuards, Reconcilers, SchedulerContext};
pub use error::{SchedulerError, SchedulerResult};
pub use runner::{BoxFuture, RunnerClient, RunnerJobState, ServiceStatsSource};
pub use task::{PeriodicTask, SchedulerTask, TaskKind, TaskRunner};
