//! Common time/period helpers for bms_core.

use std::time::Duration;

/// Number of milliseconds in one second.
pub const MILLIS_PER_SEC: u64 = 1_000;

/// Convert a period in (fractional) seconds to a `Duration`.
/// - Non-finite or non-positive input yields 1 ms so a cadence never spins.
/// - Rounded to whole milliseconds.
#[inline]
pub fn secs_to_period(secs: f32) -> Duration {
    if !(secs.is_finite() && secs > 0.0) {
        return Duration::from_millis(1);
    }
    let ms = (f64::from(secs) * MILLIS_PER_SEC as f64).round();
    Duration::from_millis((ms as u64).max(1))
}

/// Whole milliseconds in `d`, saturating at `u64::MAX`.
#[inline]
pub fn duration_ms(d: Duration) -> u64 {
    d.as_millis().min(u128::from(u64::MAX)) as u64
}

