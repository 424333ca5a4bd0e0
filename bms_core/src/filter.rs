//! Per-channel smoothing and staleness tracking.
//!
//! Each `ChannelState` has exactly one writer (the poll cadence that owns the
//! channel) and any number of readers. The filtered value lives in an
//! `AtomicU32` holding `f32` bits so readers never observe a torn update;
//! `NaN` marks a channel that has not produced a value yet.

use crate::calibration::Calibration;
use crate::config::ChannelCfg;
use bms_traits::ChannelId;
use std::sync::atomic::{AtomicU32, Ordering};

const NO_DATA: u32 = f32::NAN.to_bits();

/// Smoothing weight for the decayed running average.
///
/// An explicit `decay` (per-mille) wins and is clamped to `(0, 1]`;
/// otherwise the weight is `1 / samples`, so a larger sample count converges
/// more slowly and rejects more noise.
pub fn smoothing_weight(samples: u32, decay: Option<u32>) -> f32 {
    match decay {
        Some(d) => (d as f32 / 1000.0).clamp(f32::MIN_POSITIVE, 1.0),
        None => 1.0 / samples.max(1) as f32,
    }
}

/// One step of the decayed moving average.
#[inline]
pub fn smooth(avg: f32, physical: f32, weight: f32) -> f32 {
    avg + (physical - avg) * weight
}

/// What a reader sees for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Reading {
    /// Never produced a value.
    NoData,
    Fresh(f32),
    /// Last good value, retained after too many consecutive failures.
    Stale(f32),
}

impl Reading {
    /// Value usable for decisions; `None` unless fresh.
    pub fn fresh(&self) -> Option<f32> {
        match self {
            Reading::Fresh(v) => Some(*v),
            _ => None,
        }
    }

    /// Last known value regardless of freshness.
    pub fn last(&self) -> Option<f32> {
        match self {
            Reading::Fresh(v) | Reading::Stale(v) => Some(*v),
            Reading::NoData => None,
        }
    }

    pub fn is_fresh(&self) -> bool {
        matches!(self, Reading::Fresh(_))
    }
}

#[derive(Debug)]
pub struct ChannelState {
    id: ChannelId,
    calibration: Calibration,
    weight: f32,
    stale_after: u32,
    value: AtomicU32,
    failures: AtomicU32,
}

impl ChannelState {
    pub fn new(id: ChannelId, cfg: &ChannelCfg, stale_after: u32) -> Self {
        Self {
            id,
            calibration: cfg.calibration,
            weight: smoothing_weight(cfg.samples, cfg.decay),
            stale_after: stale_after.max(1),
            value: AtomicU32::new(NO_DATA),
            failures: AtomicU32::new(0),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn weight(&self) -> f32 {
        self.weight
    }

    /// Feed one (possibly averaged) raw value. Returns the new filtered value.
    ///
    /// The first value seeds the average directly. Must only be called by the
    /// channel's owning cadence.
    pub fn apply_raw(&self, raw: f32) -> f32 {
        let physical = self.calibration.to_physical(raw);
        let prev = f32::from_bits(self.value.load(Ordering::Acquire));
        let next = if prev.is_nan() {
            physical
        } else {
            smooth(prev, physical, self.weight)
        };
        self.value.store(next.to_bits(), Ordering::Release);
        self.failures.store(0, Ordering::Release);
        next
    }

    /// Count a failed cycle. Returns true when this failure made the channel stale.
    pub fn record_failure(&self) -> bool {
        let n = self.failures.load(Ordering::Acquire).saturating_add(1);
        self.failures.store(n, Ordering::Release);
        n == self.stale_after
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.failures.load(Ordering::Acquire)
    }

    pub fn is_stale(&self) -> bool {
        self.consecutive_failures() >= self.stale_after
    }

    pub fn reading(&self) -> Reading {
        let v = f32::from_bits(self.value.load(Ordering::Acquire));
        if v.is_nan() {
            Reading::NoData
        } else if self.is_stale() {
            Reading::Stale(v)
        } else {
            Reading::Fresh(v)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn channel(samples: u32, decay: Option<u32>, stale_after: u32) -> ChannelState {
        let cfg = ChannelCfg {
            calibration: Calibration::new(0.001, 0.0),
            samples,
            decay,
        };
        ChannelState::new(ChannelId::CellVoltage(1), &cfg, stale_after)
    }

    #[test]
    fn weight_derivation() {
        assert_eq!(smoothing_weight(1, None), 1.0);
        assert_eq!(smoothing_weight(4, None), 0.25);
        assert_eq!(smoothing_weight(0, None), 1.0);
        assert_eq!(smoothing_weight(4, Some(500)), 0.5);
        assert_eq!(smoothing_weight(4, Some(5000)), 1.0);
        assert!(smoothing_weight(4, Some(0)) > 0.0);
    }

    #[test]
    fn first_value_seeds_then_smooths() {
        let ch = channel(2, None, 3);
        assert_eq!(ch.reading(), Reading::NoData);
        ch.apply_raw(3300.0);
        assert!((ch.reading().fresh().unwrap() - 3.3).abs() < 1e-6);
        ch.apply_raw(3500.0);
        assert!((ch.reading().fresh().unwrap() - 3.4).abs() < 1e-5);
    }

    #[test]
    fn goes_stale_after_threshold_and_recovers() {
        let ch = channel(1, None, 2);
        ch.apply_raw(3300.0);
        assert!(!ch.record_failure());
        assert!(ch.reading().is_fresh());
        assert!(ch.record_failure());
        assert!(matches!(ch.reading(), Reading::Stale(v) if (v - 3.3).abs() < 1e-6));
        // further failures do not re-announce
        assert!(!ch.record_failure());
        ch.apply_raw(3310.0);
        assert!(ch.reading().is_fresh());
        assert_eq!(ch.consecutive_failures(), 0);
    }
}
