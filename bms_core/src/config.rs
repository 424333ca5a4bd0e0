//! Configuration types for the controller.
//!
//! These are the runtime configuration structs used by the controller and
//! its components. They are separate from the TOML-deserialized config in
//! `bms_config`; per-cell overrides are already resolved into one `CellCfg`
//! per cell, so nothing is looked up dynamically at runtime.

use crate::calibration::Calibration;
use crate::error::BmsError;
use std::path::PathBuf;
use std::time::Duration;

/// Optional `{min, max}` pair.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Band {
    pub min: Option<f32>,
    pub max: Option<f32>,
}

/// Hard band plus optional advisory (`ext`) and degradation (`lim`) bands.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Limit {
    pub min: Option<f32>,
    pub max: Option<f32>,
    pub ext: Band,
    pub lim: Band,
}

impl Limit {
    /// True when any bound is configured, i.e. the quantity is monitored.
    pub fn is_monitored(&self) -> bool {
        self.min.is_some()
            || self.max.is_some()
            || self.ext.min.is_some()
            || self.ext.max.is_some()
            || self.lim.min.is_some()
            || self.lim.max.is_some()
    }
}

/// Acquisition parameters for one channel.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelCfg {
    pub calibration: Calibration,
    /// Smoothing sample count.
    pub samples: u32,
    /// Smoothing weight override in per-mille.
    pub decay: Option<u32>,
}

impl Default for ChannelCfg {
    fn default() -> Self {
        Self {
            calibration: Calibration::default(),
            samples: 1,
            decay: None,
        }
    }
}

/// A monitored quantity: how to acquire it and what envelope to enforce.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct QuantityCfg {
    pub channel: ChannelCfg,
    pub limit: Limit,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CellCfg {
    /// 1-based cell index.
    pub index: u16,
    pub u: QuantityCfg,
    pub temp: QuantityCfg,
    /// Cell may be selected for balancing.
    pub balance: bool,
}

/// Pack-voltage versus cell-sum cross-check.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossCheckCfg {
    pub corr: f32,
    pub tolerance_v: f32,
    pub cycles: u32,
}

impl Default for CrossCheckCfg {
    fn default() -> Self {
        Self {
            corr: 1.0,
            tolerance_v: 0.5,
            cycles: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PackCfg {
    /// Capacity in ampere-hours.
    pub ah: f32,
    /// Internal resistance in ohms.
    pub r: f32,
    pub u: QuantityCfg,
    pub i: QuantityCfg,
    pub cross: CrossCheckCfg,
    /// One entry per cell, index `k` holds cell `k + 1`.
    pub cells: Vec<CellCfg>,
}

impl PackCfg {
    /// Uniform pack of `n` cells with default channel parameters.
    pub fn uniform(n: u16, u: QuantityCfg, i: QuantityCfg, cell_u: QuantityCfg) -> Self {
        Self {
            ah: 100.0,
            r: 0.0,
            u,
            i,
            cross: CrossCheckCfg::default(),
            cells: (1..=n)
                .map(|index| CellCfg {
                    index,
                    u: cell_u,
                    temp: QuantityCfg::default(),
                    balance: true,
                })
                .collect(),
        }
    }

    pub fn n(&self) -> u16 {
        self.cells.len() as u16
    }

    /// Nominal maximum current (`i.max`).
    pub fn max_current(&self) -> f32 {
        self.i.limit.max.unwrap_or(0.0)
    }
}

/// Per-cadence sampling parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PollCfg {
    /// Readings per cycle.
    pub n: u32,
    /// Delay between readings.
    pub t: Duration,
    /// Settle delay after a cycle.
    pub d: Duration,
    /// Consecutive failed cycles before a channel is stale.
    pub stale_after: u32,
}

impl Default for PollCfg {
    fn default() -> Self {
        Self {
            n: 1,
            t: Duration::ZERO,
            d: Duration::ZERO,
            stale_after: 3,
        }
    }
}

/// Cadence periods.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Periods {
    pub voltage: Duration,
    pub cell_voltage: Duration,
    pub cell_temperature: Duration,
}

impl Default for Periods {
    fn default() -> Self {
        Self {
            voltage: Duration::from_secs(1),
            cell_voltage: Duration::from_secs(2),
            cell_temperature: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BalanceCfg {
    /// Minimum cell voltage to allow balancing.
    pub min: f32,
    /// Required delta above the lowest cell.
    pub d: f32,
    /// Maximum concurrently balancing cells (0 = unlimited).
    pub n: u16,
    /// Minimum position within the low-to-high band (0 disables).
    pub r: f32,
}

impl Default for BalanceCfg {
    fn default() -> Self {
        Self {
            min: 0.0,
            d: 0.01,
            n: 0,
            r: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RelayCfg {
    /// Hold-off after faults clear.
    pub hold: Duration,
    /// Hold-off before the first engagement after start.
    pub first_hold: Duration,
    /// Minimum closed time before an operator (non-safety) open.
    pub min_on: Duration,
    /// Minimum open time before closing again.
    pub min_off: Duration,
    /// Controller tick period.
    pub tick: Duration,
}

impl Default for RelayCfg {
    fn default() -> Self {
        Self {
            hold: Duration::from_secs(10),
            first_hold: Duration::from_secs(2),
            min_on: Duration::ZERO,
            min_off: Duration::ZERO,
            tick: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct KeepAliveCfg {
    /// Renewal period in ms; 0 disables the keep-alive.
    pub k_ms: u64,
    /// Durable store for the deadline.
    pub path: Option<PathBuf>,
}

/// Everything the controller needs, validated once.
#[derive(Debug, Clone, PartialEq)]
pub struct ControllerCfg {
    pub pack: PackCfg,
    pub poll: PollCfg,
    pub periods: Periods,
    pub balance: BalanceCfg,
    pub relay: RelayCfg,
    pub keepalive: KeepAliveCfg,
}

impl ControllerCfg {
    pub fn new(pack: PackCfg) -> Self {
        Self {
            pack,
            poll: PollCfg::default(),
            periods: Periods::default(),
            balance: BalanceCfg::default(),
            relay: RelayCfg::default(),
            keepalive: KeepAliveCfg::default(),
        }
    }

    /// Fail-fast checks on invariants the components rely on.
    pub fn validate(&self) -> Result<(), BmsError> {
        let invalid = |m: &str| Err(BmsError::ConfigInvalid(m.to_string()));
        if self.pack.cells.is_empty() {
            return invalid("pack must have at least one cell");
        }
        for (k, c) in self.pack.cells.iter().enumerate() {
            if usize::from(c.index) != k + 1 {
                return invalid("cells must be indexed 1..=n in order");
            }
        }
        if !(self.pack.max_current().is_finite() && self.pack.max_current() > 0.0) {
            return invalid("i.max must be > 0");
        }
        if self.poll.n == 0 || self.poll.stale_after == 0 {
            return invalid("poll.n and poll.stale must be >= 1");
        }
        if self.relay.tick.is_zero() {
            return invalid("relay.tick_ms must be >= 1");
        }
        if self.periods.voltage.is_zero()
            || self.periods.cell_voltage.is_zero()
            || self.periods.cell_temperature.is_zero()
        {
            return invalid("poll periods must be > 0");
        }
        if !(0.0..=1.0).contains(&self.balance.r) {
            return invalid("balance.r must be in [0, 1]");
        }
        Ok(())
    }
}
