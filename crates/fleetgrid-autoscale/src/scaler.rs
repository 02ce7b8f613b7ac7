//! Service scalers.
//!
//! `get_service_scaler` picks the scaler for a run spec: request-driven
//! when the spec has a scaling section, manual (clamp only) otherwise.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::debug;

use fleetgrid_state::{ReplicaBounds, RunSpec, ScalingMetric};

/// Window the RPS autoscaler reads, in seconds.
pub const RPS_WINDOW_SECS: u64 = 60;

/// Aggregated requests over one window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Stat {
    pub requests: u64,
    /// Mean request time in seconds.
    pub request_time: f64,
}

/// Request statistics keyed by window length in seconds.
pub type PerWindowStats = BTreeMap<u64, Stat>;

pub trait ServiceScaler: Send + Sync {
    /// Replica count the service should have now. Always within the
    /// scaler's bounds.
    fn get_desired_count(
        &self,
        current: u32,
        stats: Option<&PerWindowStats>,
        last_scaled_at: Option<u64>,
        now: u64,
    ) -> u32;
}

/// Keeps the count the user asked for, within bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManualScaler {
    pub min: u32,
    pub max: u32,
}

impl ServiceScaler for ManualScaler {
    fn get_desired_count(&self, current: u32, _: Option<&PerWindowStats>, _: Option<u64>, _: u64) -> u32 {
        clamp(current, self.min, self.max)
    }
}

/// Scales on requests per second per replica.
#[derive(Debug, Clone, PartialEq)]
pub struct RpsAutoscaler {
    pub min: u32,
    pub max: u32,
    /// Target requests per second per replica.
    pub target: f64,
    pub scale_up_delay: u64,
    pub scale_down_delay: u64,
}

impl RpsAutoscaler {
    fn target_replicas(&self, stat: &Stat) -> u32 {
        let rps = stat.requests as f64 / RPS_WINDOW_SECS as f64;
        let wanted = if self.target > 0.0 {
            (rps / self.target).ceil()
        } else {
            f64::from(self.max)
        };
        // `as` saturates, so absurd rates land on u32::MAX before clamping.
        clamp(wanted as u32, self.min, self.max)
    }
}

impl ServiceScaler for RpsAutoscaler {
    fn get_desired_count(
        &self,
        current: u32,
        stats: Option<&PerWindowStats>,
        last_scaled_at: Option<u64>,
        now: u64,
    ) -> u32 {
        let bounded = clamp(current, self.min, self.max);
        let Some(stat) = stats.and_then(|s| s.get(&RPS_WINDOW_SECS)) else {
            return bounded;
        };

        let target = self.target_replicas(stat);
        let since_scaled = |delay: u64| last_scaled_at.is_none_or(|t| now.saturating_sub(t) >= delay);

        let desired = if target > bounded {
            if bounded == 0 || since_scaled(self.scale_up_delay) {
                target
            } else {
                bounded
            }
        } else if target < bounded {
            if since_scaled(self.scale_down_delay) {
                target
            } else {
                bounded
            }
        } else {
            target
        };

        if desired != current {
            debug!(
                from = current,
                to = desired,
                requests = stat.requests,
                target = self.target,
                "rps autoscaler decision"
            );
        }
        desired
    }
}

/// The scaler for a run spec.
pub fn get_service_scaler(spec: &RunSpec) -> Box<dyn ServiceScaler> {
    let ReplicaBounds { min, max } = spec.replicas;
    match &spec.scaling {
        Some(scaling) => match scaling.metric {
            ScalingMetric::Rps => Box::new(RpsAutoscaler {
                min,
                max,
                target: scaling.target,
                scale_up_delay: scaling.scale_up_delay,
                scale_down_delay: scaling.scale_down_delay,
            }),
        },
        None => Box::new(ManualScaler { min, max }),
    }
}

fn clamp(value: u32, min: u32, max: u32) -> u32 {
    value.max(min).min(max.max(min))
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleetgrid_state::*;

    const NOW: u64 = 1_000_000;

    fn scaler() -> RpsAutoscaler {
        RpsAutoscaler {
            min: 0,
            max: 5,
            target: 10.0,
            scale_up_delay: 300,
            scale_down_delay: 600,
        }
    }

    fn stats(rps: u64) -> PerWindowStats {
        let mut stats = PerWindowStats::new();
        stats.insert(
            RPS_WINDOW_SECS,
            Stat {
                requests: rps * RPS_WINDOW_SECS,
                request_time: 0.05,
            },
        );
        stats
    }

    #[test]
    fn scales_up_after_delay() {
        let desired = scaler().get_desired_count(1, Some(&stats(20)), Some(NOW - 3600), NOW);
        assert_eq!(desired, 2);
    }

    #[test]
    fn scales_from_zero_immediately() {
        let desired = scaler().get_desired_count(0, Some(&stats(5)), None, NOW);
        assert_eq!(desired, 1);

        // Even right after a scale-down.
        let desired = scaler().get_desired_count(0, Some(&stats(5)), Some(NOW - 1), NOW);
        assert_eq!(desired, 1);
    }

    #[test]
    fn scale_up_waits_for_delay() {
        let s = scaler();
        assert_eq!(s.get_desired_count(1, Some(&stats(20)), Some(NOW - 299), NOW), 1);
        assert_eq!(s.get_desired_count(1, Some(&stats(20)), Some(NOW - 300), NOW), 2);
    }

    #[test]
    fn scale_down_waits_for_delay() {
        let s = scaler();
        assert_eq!(s.get_desired_count(3, Some(&stats(0)), Some(NOW - 599), NOW), 3);
        assert_eq!(s.get_desired_count(3, Some(&stats(0)), Some(NOW - 600), NOW), 0);
        assert_eq!(s.get_desired_count(3, Some(&stats(0)), None, NOW), 0);
    }

    #[test]
    fn no_stats_keeps_current() {
        let s = scaler();
        assert_eq!(s.get_desired_count(2, None, None, NOW), 2);

        let mut other_window = PerWindowStats::new();
        other_window.insert(300, Stat::default());
        assert_eq!(s.get_desired_count(2, Some(&other_window), None, NOW), 2);
    }

    #[test]
    fn result_stays_within_bounds() {
        let s = RpsAutoscaler { min: 1, ..scaler() };
        for current in 0..10 {
            for rps in [0, 1, 10, 49, 50, 51, 1000, u64::MAX / 120] {
                for last in [None, Some(NOW), Some(0)] {
                    let desired = s.get_desired_count(current, Some(&stats(rps)), last, NOW);
                    assert!((1..=5).contains(&desired), "current={current} rps={rps} -> {desired}");
                }
            }
        }
    }

    #[test]
    fn out_of_bounds_count_is_corrected_without_delay() {
        let s = scaler();
        // Max was lowered under a running service.
        assert_eq!(s.get_desired_count(8, Some(&stats(100)), Some(NOW), NOW), 5);
        assert_eq!(s.get_desired_count(8, None, Some(NOW), NOW), 5);
    }

    #[test]
    fn manual_scaler_clamps() {
        let s = ManualScaler { min: 1, max: 3 };
        assert_eq!(s.get_desired_count(0, None, None, NOW), 1);
        assert_eq!(s.get_desired_count(2, Some(&stats(1000)), None, NOW), 2);
        assert_eq!(s.get_desired_count(9, None, None, NOW), 3);
    }

    #[test]
    fn picks_scaler_from_spec() {
        let mut spec = RunSpec {
            image: "nginx".to_string(),
            requirements: Requirements::default(),
            replicas: ReplicaBounds { min: 0, max: 5 },
            jobs_per_replica: 1,
            scaling: Some(ScalingSpec {
                metric: ScalingMetric::Rps,
                target: 10.0,
                scale_up_delay: 300,
                scale_down_delay: 600,
            }),
            retry: None,
            max_duration: None,
        };
        let rps = get_service_scaler(&spec);
        assert_eq!(rps.get_desired_count(0, Some(&stats(5)), None, NOW), 1);

        spec.scaling = None;
        spec.replicas = ReplicaBounds { min: 2, max: 2 };
        let manual = get_service_scaler(&spec);
        assert_eq!(manual.get_desired_count(0, Some(&stats(500)), None, NOW), 2);
    }
}
