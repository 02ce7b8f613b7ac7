//! Retry policies.
//!
//! Two independent mechanisms:
//!
//! - **Termination retry**: deleting a provider resource (placement group,
//!   compute group) is retried on every failure until a deadline measured
//!   from the first failure, then the resource is forcibly marked deleted.
//! - **Submission retry**: a job that failed for lack of capacity is
//!   resubmitted while the run's `RetryPolicy` window, measured from the
//!   slot's first submission, is still open.

use serde::{Deserialize, Serialize};

use fleetgrid_state::{ComputeGroup, JobTerminationReason, PlacementGroup, RetryPolicy};

/// Timing of termination retries. Values are seconds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminationRetryPolicy {
    /// Minimum time between two attempts, where the caller throttles.
    pub retry_interval: u64,
    /// Time after the first failure at which retrying stops.
    pub max_duration: u64,
}

impl Default for TerminationRetryPolicy {
    fn default() -> Self {
        Self {
            retry_interval: 30,
            max_duration: 15 * 60,
        }
    }
}

/// An entity whose termination is retried against a deadline.
pub trait TerminationRetry {
    fn first_termination_retry_at(&self) -> Option<u64>;
    fn last_termination_retry_at(&self) -> Option<u64>;
    fn set_termination_retry_at(&mut self, first: Option<u64>, last: Option<u64>);

    /// Record a failed attempt. The first failure starts the deadline.
    fn record_termination_failure(&mut self, now: u64) {
        let first = self.first_termination_retry_at().unwrap_or(now);
        self.set_termination_retry_at(Some(first), Some(now));
    }

    /// Whether retrying has gone on for longer than the policy allows.
    fn termination_deadline_exceeded(&self, policy: &TerminationRetryPolicy, now: u64) -> bool {
        self.first_termination_retry_at()
            .is_some_and(|first| now.saturating_sub(first) > policy.max_duration)
    }

    /// Whether enough time has passed since the last failed attempt.
    fn termination_attempt_due(&self, policy: &TerminationRetryPolicy, now: u64) -> bool {
        self.last_termination_retry_at()
            .is_none_or(|last| now.saturating_sub(last) >= policy.retry_interval)
    }
}

macro_rules! impl_termination_retry {
    ($($ty:ty),* $(,)?) => {
        $(
            impl TerminationRetry for $ty {
                fn first_termination_retry_at(&self) -> Option<u64> {
                    self.first_termination_retry_at
                }

                fn last_termination_retry_at(&self) -> Option<u64> {
                    self.last_termination_retry_at
                }

                fn set_termination_retry_at(&mut self, first: Option<u64>, last: Option<u64>) {
                    self.first_termination_retry_at = first;
                    self.last_termination_retry_at = last;
                }
            }
        )*
    };
}

impl_termination_retry!(PlacementGroup, ComputeGroup);

/// What to do with a failed job submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Submit a replacement job.
    Retry,
    /// The reason is retryable but the window has closed.
    LimitExceeded,
    /// Retry is disabled or the reason is not retryable.
    NotRetryable,
}

/// Reasons that say nothing about the workload itself.
pub fn is_retryable(reason: JobTerminationReason) -> bool {
    matches!(
        reason,
        JobTerminationReason::FailedToStartDueToNoCapacity
            | JobTerminationReason::InterruptedByNoCapacity
    )
}

/// Decide whether a failed slot gets another submission.
///
/// `first_submitted_at` is the submission time of the slot's first job.
pub fn retry_decision(
    policy: Option<&RetryPolicy>,
    reason: Option<JobTerminationReason>,
    first_submitted_at: u64,
    now: u64,
) -> RetryDecision {
    let Some(policy) = policy.filter(|p| p.enabled) else {
        return RetryDecision::NotRetryable;
    };
    if !reason.is_some_and(is_retryable) {
        return RetryDecision::NotRetryable;
    }
    if now.saturating_sub(first_submitted_at) < policy.limit_seconds {
        RetryDecision::Retry
    } else {
        RetryDecision::LimitExceeded
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_state::*;

    fn test_group() -> PlacementGroup {
        PlacementGroup {
            id: "pg-1".to_string(),
            project: "main".to_string(),
            name: "fleet-pg".to_string(),
            fleet_id: "fleet-1".to_string(),
            fleet_deleted: true,
            deleted: false,
            deleted_at: None,
            provisioning_data: PlacementGroupProvisioningData {
                backend: BackendType::Aws,
                region: "us-east-1".to_string(),
                backend_group_id: "aws-pg-1".to_string(),
            },
            created_at: 0,
            first_termination_retry_at: None,
            last_termination_retry_at: None,
            last_processed_at: 0,
        }
    }

    #[test]
    fn first_failure_starts_the_deadline() {
        let policy = TerminationRetryPolicy::default();
        let mut pg = test_group();
        assert!(!pg.termination_deadline_exceeded(&policy, 10_000));

        pg.record_termination_failure(1000);
        pg.record_termination_failure(1030);
        assert_eq!(pg.first_termination_retry_at, Some(1000));
        assert_eq!(pg.last_termination_retry_at, Some(1030));

        assert!(!pg.termination_deadline_exceeded(&policy, 1000 + 900));
        assert!(pg.termination_deadline_exceeded(&policy, 1000 + 901));
    }

    #[test]
    fn attempts_are_throttled_by_interval() {
        let policy = TerminationRetryPolicy::default();
        let mut pg = test_group();
        assert!(pg.termination_attempt_due(&policy, 0));

        pg.record_termination_failure(1000);
        assert!(!pg.termination_attempt_due(&policy, 1029));
        assert!(pg.termination_attempt_due(&policy, 1030));
    }

    #[test]
    fn policy_reads_partial_toml() {
        let policy: TerminationRetryPolicy = toml::from_str("max_duration = 60").unwrap();
        assert_eq!(policy.max_duration, 60);
        assert_eq!(policy.retry_interval, 30);
    }

    #[test]
    fn submission_retry_window() {
        let policy = RetryPolicy {
            enabled: true,
            limit_seconds: 3600,
        };
        let no_capacity = Some(JobTerminationReason::FailedToStartDueToNoCapacity);

        assert_eq!(retry_decision(Some(&policy), no_capacity, 0, 3599), RetryDecision::Retry);
        assert_eq!(
            retry_decision(Some(&policy), no_capacity, 0, 3600),
            RetryDecision::LimitExceeded
        );
        assert_eq!(
            retry_decision(
                Some(&policy),
                Some(JobTerminationReason::ContainerExitedWithError),
                0,
                10
            ),
            RetryDecision::NotRetryable
        );
    }

    #[test]
    fn disabled_or_missing_policy_never_retries() {
        let interrupted = Some(JobTerminationReason::InterruptedByNoCapacity);
        assert_eq!(retry_decision(None, interrupted, 0, 1), RetryDecision::NotRetryable);

        let disabled = RetryPolicy {
            enabled: false,
            limit_seconds: 3600,
        };
        assert_eq!(
            retry_decision(Some(&disabled), interrupted, 0, 1),
            RetryDecision::NotRetryable
        );
    }
}
