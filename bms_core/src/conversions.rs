//! `From` implementations bridging `bms_config` types to `bms_core` types.
//!
//! Per-cell overrides are resolved here once, so the runtime never looks up
//! class defaults again.

use crate::calibration::Calibration;
use crate::config::{
    Band, BalanceCfg, CellCfg, ChannelCfg, ControllerCfg, CrossCheckCfg, KeepAliveCfg, Limit,
    PackCfg, Periods, PollCfg, QuantityCfg, RelayCfg,
};
use crate::util::secs_to_period;
use std::path::PathBuf;
use std::time::Duration;

// ── Quantities ───────────────────────────────────────────────────────────────

impl From<&bms_config::Band> for Band {
    fn from(b: &bms_config::Band) -> Self {
        Self {
            min: b.min,
            max: b.max,
        }
    }
}

impl From<&bms_config::QuantityCfg> for QuantityCfg {
    fn from(q: &bms_config::QuantityCfg) -> Self {
        Self {
            channel: ChannelCfg {
                calibration: Calibration::new(q.scale.unwrap_or(1.0), q.offset.unwrap_or(0.0)),
                samples: q.samples.unwrap_or(1),
                decay: q.decay,
            },
            limit: Limit {
                min: q.min,
                max: q.max,
                ext: q.ext.as_ref().map(Band::from).unwrap_or_default(),
                lim: q.lim.as_ref().map(Band::from).unwrap_or_default(),
            },
        }
    }
}

// ── Pack and cells ───────────────────────────────────────────────────────────

/// Resolve cell `index`: override fields win over the cell-class defaults,
/// and the override's top-level `scale`/`offset` calibrate the voltage channel.
fn resolve_cell(cfg: &bms_config::Config, index: u16) -> CellCfg {
    let ov = cfg.cell_override(index);
    let u = ov
        .and_then(|o| o.u.as_ref())
        .map_or(cfg.cell.u, |u| u.or(&cfg.cell.u));
    let temp = ov
        .and_then(|o| o.temp.as_ref())
        .map_or(cfg.cell.temp, |t| t.or(&cfg.cell.temp));
    let mut u = QuantityCfg::from(&u);
    if let Some(o) = ov {
        if let Some(scale) = o.scale {
            u.channel.calibration.scale = scale;
        }
        if let Some(offset) = o.offset {
            u.channel.calibration.offset = offset;
        }
    }
    CellCfg {
        index,
        u,
        temp: QuantityCfg::from(&temp),
        balance: ov.and_then(|o| o.balance).unwrap_or(true),
    }
}

impl From<&bms_config::Config> for PackCfg {
    fn from(c: &bms_config::Config) -> Self {
        Self {
            ah: c.pack.ah,
            r: c.pack.r,
            u: QuantityCfg::from(&c.u.q),
            i: QuantityCfg::from(&c.i),
            cross: CrossCheckCfg {
                corr: c.u.corr,
                tolerance_v: c.u.corr_tol,
                cycles: c.u.corr_cycles,
            },
            cells: (1..=c.pack.n).map(|k| resolve_cell(c, k)).collect(),
        }
    }
}

// ── Scheduling ───────────────────────────────────────────────────────────────

impl From<&bms_config::Poll> for PollCfg {
    fn from(p: &bms_config::Poll) -> Self {
        Self {
            n: p.n,
            t: Duration::from_millis(p.t),
            d: Duration::from_millis(p.d),
            stale_after: p.stale,
        }
    }
}

impl From<&bms_config::Periods> for Periods {
    fn from(p: &bms_config::Periods) -> Self {
        Self {
            voltage: secs_to_period(p.voltage),
            cell_voltage: secs_to_period(p.cellvoltage),
            cell_temperature: secs_to_period(p.celltemperature),
        }
    }
}

// ── Balance / relay ──────────────────────────────────────────────────────────

impl From<&bms_config::BalanceCfg> for BalanceCfg {
    fn from(b: &bms_config::BalanceCfg) -> Self {
        Self {
            min: b.min,
            d: b.d,
            n: b.n,
            r: b.r,
        }
    }
}

impl From<&bms_config::RelayCfg> for RelayCfg {
    fn from(r: &bms_config::RelayCfg) -> Self {
        Self {
            hold: Duration::from_millis(r.t),
            first_hold: Duration::from_millis(r.t1),
            min_on: Duration::from_millis(r.t_on),
            min_off: Duration::from_millis(r.t_off),
            tick: Duration::from_millis(r.tick_ms),
        }
    }
}

// ── Whole controller ─────────────────────────────────────────────────────────

impl From<&bms_config::Config> for ControllerCfg {
    fn from(c: &bms_config::Config) -> Self {
        Self {
            pack: PackCfg::from(c),
            poll: PollCfg::from(&c.poll),
            periods: Periods::from(&c.t),
            balance: BalanceCfg::from(&c.balance),
            relay: RelayCfg::from(&c.relay),
            keepalive: KeepAliveCfg {
                k_ms: c.poll.k,
                path: c.keepalive.path.as_ref().map(PathBuf::from),
            },
        }
    }
}
