//! fleetgrid-autoscale — desired replica counts for services.
//!
//! Pure decision logic: the caller supplies the current count, per-window
//! request statistics, and the last scaling time, and writes the result
//! back to the run.
//!
//! # Scaling Algorithm
//!
//! ```text
//! rps    = stats[60s].requests / 60
//! target = clamp(ceil(rps / scaling.target), min, max)
//!
//! target > current: scale up if current == 0, or scale_up_delay has passed
//! target < current: scale down if scale_down_delay has passed
//! ```
//!
//! A count outside `[min, max]` is corrected immediately, without waiting
//! for either delay.

pub mod scaler;

pub use scaler::{
    get_service_scaler, ManualScaler, PerWindowStats, RpsAutoscaler, ServiceScaler, Stat,
    RPS_WINDOW_SECS,
};
