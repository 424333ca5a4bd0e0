//! Raw-count to physical-unit conversion.

/// Linear calibration: `physical = raw * scale + offset`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub scale: f32,
    pub offset: f32,
}

impl Calibration {
    pub const fn new(scale: f32, offset: f32) -> Self {
        Self { scale, offset }
    }

    /// Convert a raw sample (possibly an average of several counts).
    #[inline]
    pub fn to_physical(&self, raw: f32) -> f32 {
        raw * self.scale + self.offset
    }

    /// Inverse of `to_physical`, handy for simulators and tests.
    /// Returns `None` when `scale` is zero or non-finite.
    pub fn to_raw(&self, physical: f32) -> Option<i32> {
        if !(self.scale.is_finite() && self.scale != 0.0) {
            return None;
        }
        let raw = ((physical - self.offset) / self.scale).round();
        if raw.is_finite() && raw >= i32::MIN as f32 && raw <= i32::MAX as f32 {
            Some(raw as i32)
        } else {
            None
        }
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: 0.0,
        }
    }
}
