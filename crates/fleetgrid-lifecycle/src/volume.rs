//! Volume lifecycle: `Submitted → Active | Failed`, plus the idle predicate
//! that decides when an active volume is reaped.
//!
//! Reaping sets the `deleted` tombstone; it is not a status.

use fleetgrid_state::{Volume, VolumeAttachment, VolumeStatus};
use tracing::debug;

use crate::error::{LifecycleError, LifecycleResult};

const VOLUME_TRANSITIONS: &[(VolumeStatus, &[VolumeStatus])] = &[(
    VolumeStatus::Submitted,
    &[VolumeStatus::Active, VolumeStatus::Failed],
)];

pub fn can_transition(from: VolumeStatus, to: VolumeStatus) -> bool {
    VOLUME_TRANSITIONS
        .iter()
        .find(|(source, _)| *source == from)
        .is_some_and(|(_, targets)| targets.contains(&to))
}

pub fn apply_transition(volume: &mut Volume, to: VolumeStatus) -> LifecycleResult<()> {
    if !can_transition(volume.status, to) {
        return Err(LifecycleError::InvalidVolumeTransition {
            volume: volume.id.clone(),
            from: volume.status,
            to,
        });
    }
    debug!(volume = %volume.id, from = ?volume.status, to = ?to, "volume transition");
    volume.status = to;
    Ok(())
}

/// Whether an idle volume should be deleted.
///
/// A volume is idle while nothing is attached to it. Idle time counts from
/// the last time a job using it was processed, or from creation if no job
/// ever used it.
pub fn should_delete_volume(volume: &Volume, attachments: &[VolumeAttachment], now: u64) -> bool {
    let Some(duration) = volume.configuration.auto_cleanup_duration else {
        return false;
    };
    if duration <= 0 || !attachments.is_empty() {
        return false;
    }

    let idle_since = volume.last_job_processed_at.unwrap_or(volume.created_at);
    let idle = now.saturating_sub(idle_since);
    idle > duration as u64
}

/// Parse an auto-cleanup duration.
///
/// Accepts `off` or `-1` (disabled, `None`), a bare number of seconds, or a
/// number with an `s`, `m`, `h` or `d` suffix.
pub fn parse_auto_cleanup_duration(s: &str) -> LifecycleResult<Option<i64>> {
    let s = s.trim();
    if s.eq_ignore_ascii_case("off") || s == "-1" {
        return Ok(None);
    }

    let invalid = || LifecycleError::InvalidDuration(s.to_string());
    let (digits, unit) = match s.char_indices().last() {
        Some((i, c)) if c.is_ascii_alphabetic() => (&s[..i], c.to_ascii_lowercase()),
        _ => (s, 's'),
    };
    let multiplier = match unit {
        's' => 1,
        'm' => 60,
        'h' => 60 * 60,
        'd' => 24 * 60 * 60,
        _ => return Err(invalid()),
    };
    let value: i64 = digits.parse().map_err(|_| invalid())?;
    if value < 0 {
        return Err(invalid());
    }
    value.checked_mul(multiplier).map(Some).ok_or_else(invalid)
}
