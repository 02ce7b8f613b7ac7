//! fleetgrid-lifecycle — entity lifecycles as data.
//!
//! Transitions are `const` tables checked by `apply_transition`; nothing
//! here touches the store or a backend, so every rule is unit-testable
//! without I/O.
//!
//! # Components
//!
//! - **`job`** — job transition table, termination start/finish
//! - **`run`** — run status derived from the latest job submissions
//! - **`volume`** — volume transitions and the idle-volume predicate
//! - **`retry`** — bounded-deadline termination retry, submission retry

pub mod error;
pub mod job;
pub mod retry;
pub mod run;
pub mod volume;

pub use error::{LifecycleError, LifecycleResult};
pub use retry::{is_retryable, retry_decision, RetryDecision, TerminationRetry, TerminationRetryPolicy};
pub use run::{derive_run_status, latest_submissions, run_termination_reason, DerivedRunStatus};
pub use volume::{parse_auto_cleanup_duration, should_delete_volume};
