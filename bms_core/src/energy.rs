//! Charge and energy bookkeeping for the pack.
//!
//! Positive current charges the pack. State of charge starts full and is
//! derived from the accumulated charge relative to capacity.

use std::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub struct EnergyCounter {
    capacity_as: f64,
    r_ohm: f64,
    charge_as: f64,
    work_ws: f64,
    last_at: Option<Instant>,
}

impl EnergyCounter {
    pub fn new(ah: f32, r_ohm: f32) -> Self {
        Self {
            capacity_as: f64::from(ah.max(0.0)) * 3600.0,
            r_ohm: f64::from(r_ohm.max(0.0)),
            charge_as: 0.0,
            work_ws: 0.0,
            last_at: None,
        }
    }

    /// Record a pack sample taken at `now`, integrating since the previous one.
    ///
    /// `None` (no fresh voltage/current) only moves the time base, so a gap in
    /// data is never integrated.
    pub fn observe(&mut self, now: Instant, sample: Option<(f32, f32)>) {
        let prev = self.last_at.replace(now);
        if let (Some(prev), Some((u, i))) = (prev, sample) {
            self.integrate(u, i, now.saturating_duration_since(prev).as_secs_f64());
        }
    }

    /// Integrate one interval of `dt_s` seconds at voltage `u` and current `i`.
    ///
    /// Work is derated by the resistive loss `I²·r`.
    pub fn integrate(&mut self, u: f32, i: f32, dt_s: f64) {
        if !(dt_s.is_finite() && dt_s > 0.0 && u.is_finite() && i.is_finite()) {
            return;
        }
        let (u, i) = (f64::from(u), f64::from(i));
        self.charge_as += i * dt_s;
        self.work_ws += (u * i - i * i * self.r_ohm) * dt_s;
    }

    /// Accumulate externally reported work and charge.
    pub fn add_work(&mut self, ws: f64, as_: f64) {
        if ws.is_finite() {
            self.work_ws += ws;
        }
        if as_.is_finite() {
            self.charge_as += as_;
        }
    }

    pub fn charge_as(&self) -> f64 {
        self.charge_as
    }

    pub fn work_ws(&self) -> f64 {
        self.work_ws
    }

    /// Fraction in `[0, 1]`.
    pub fn state_of_charge(&self) -> f32 {
        if self.capacity_as <= 0.0 {
            return 0.0;
        }
        (1.0 + self.charge_as / self.capacity_as).clamp(0.0, 1.0) as f32
    }
}
