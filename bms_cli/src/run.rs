//! Config loading, hardware assembly and command execution.

use crate::sink::JsonlSink;
use bms_core::config::{ControllerCfg, Limit};
use bms_core::error::{BmsError, Result as CoreResult};
use bms_core::keepalive::{KeepAlive, read_deadline};
use bms_core::runner::{self, RunOptions, RunSummary};
use bms_core::{Controller, EventSink, FanoutSink, TracingSink};
use bms_hardware::{SimulatedBalancer, SimulatedRelay, SimulatedSensor};
use bms_traits::clock::{Clock, MonotonicClock};
use bms_traits::{BalanceOutput, ChannelId, RelayOutput};
use eyre::WrapErr;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;

/// Env override for the simulated pack voltage (volts), for exercising faults.
pub const SIM_PACK_V_ENV: &str = "BMS_SIM_PACK_V";

pub type BoxedRelay = Box<dyn RelayOutput + Send>;
pub type BoxedBalancer = Box<dyn BalanceOutput + Send>;

/// Read, calibrate and validate the TOML config.
pub fn load_config(path: &Path, calibration: Option<&Path>) -> eyre::Result<bms_config::Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let mut cfg = bms_config::load_toml(&text)
        .map_err(|e| eyre::eyre!("parse config {}: {e}", path.display()))?;
    if let Some(csv) = calibration {
        let rows = bms_config::load_cell_calibration_csv(csv)
            .wrap_err_with(|| format!("load calibration CSV {}", csv.display()))?;
        cfg.apply_cell_calibration(&rows);
    }
    cfg.validate()
        .map_err(|e| BmsError::ConfigInvalid(e.to_string()))?;
    Ok(cfg)
}

/// Contactor and bleed outputs: GPIO where pins are configured, simulated otherwise.
#[cfg(all(feature = "hardware", target_os = "linux"))]
fn make_outputs(cfg: &bms_config::Config) -> eyre::Result<(BoxedRelay, BoxedBalancer)> {
    let relay: BoxedRelay = match cfg.relay.pin {
        Some(pin) => Box::new(
            bms_hardware::gpio::GpioRelay::new(pin, cfg.relay.active_high)
                .wrap_err("open relay pin")?,
        ),
        None => Box::new(SimulatedRelay::new()),
    };
    let balancer: BoxedBalancer = if cfg.balance.pins.is_empty() {
        Box::new(SimulatedBalancer::new())
    } else {
        Box::new(
            bms_hardware::gpio::GpioBalancer::new(&cfg.balance.pins)
                .wrap_err("open balance pins")?,
        )
    };
    Ok((relay, balancer))
}

#[cfg(not(all(feature = "hardware", target_os = "linux")))]
fn make_outputs(cfg: &bms_config::Config) -> eyre::Result<(BoxedRelay, BoxedBalancer)> {
    if cfg.relay.pin.is_some() || !cfg.balance.pins.is_empty() {
        tracing::warn!("GPIO pins configured but built without `hardware`; outputs are simulated");
    }
    Ok((Box::new(SimulatedRelay::new()), Box::new(SimulatedBalancer::new())))
}

/// A value comfortably inside `limit`, preferring `idle` when it already is.
pub fn nominal(limit: &Limit, idle: f32) -> f32 {
    let lo = limit.lim.min.or(limit.min);
    let hi = limit.lim.max.or(limit.max);
    let margin = |v: f32| (v.abs() * 0.05).max(0.1);
    match (lo, hi) {
        (Some(l), Some(h)) if !(l..=h).contains(&idle) => (l + h) / 2.0,
        (Some(l), None) if idle <= l => l + margin(l),
        (None, Some(h)) if idle >= h => h - margin(h),
        _ => idle,
    }
}

/// Simulated sensor seeded with nominal values for every channel.
pub fn seeded_sensor(cfg: &ControllerCfg) -> SimulatedSensor {
    let sensor = SimulatedSensor::new();
    let put = |ch: ChannelId, q: &bms_core::QuantityCfg, v: f32| {
        if let Some(raw) = q.channel.calibration.to_raw(v) {
            sensor.set_raw(ch, raw);
        }
    };
    let mut sum = 0.0;
    for c in &cfg.pack.cells {
        let u = nominal(&c.u.limit, 3.3);
        sum += u;
        put(ChannelId::CellVoltage(c.index), &c.u, u);
        put(ChannelId::CellTemperature(c.index), &c.temp, nominal(&c.temp.limit, 25.0));
    }
    let pack_u = std::env::var(SIM_PACK_V_ENV)
        .ok()
        .and_then(|s| s.parse::<f32>().ok())
        .unwrap_or_else(|| nominal(&cfg.pack.u.limit, sum * cfg.pack.cross.corr));
    put(ChannelId::PackVoltage, &cfg.pack.u, pack_u);
    put(ChannelId::PackCurrent, &cfg.pack.i, nominal(&cfg.pack.i.limit, 0.0));
    sensor
}

/// Event sinks: always tracing, plus JSON lines to `[logging] events` or,
/// in JSON mode, stdout.
fn make_sink(cfg: &bms_config::Config, json: bool) -> eyre::Result<FanoutSink> {
    let mut sink = FanoutSink::new().with(TracingSink);
    if let Some(path) = cfg.logging.events.as_deref() {
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .wrap_err_with(|| format!("open event log {path}"))?;
        sink = sink.with(JsonlSink::new(file));
    } else if json {
        sink = sink.with(JsonlSink::stdout());
    }
    Ok(sink)
}

fn build(
    cfg: &bms_config::Config,
    sink: impl EventSink + 'static,
) -> CoreResult<Controller<BoxedRelay, BoxedBalancer>> {
    let (relay, balancer) = make_outputs(cfg)?;
    Controller::builder()
        .with_config(ControllerCfg::from(cfg))
        .with_relay(relay)
        .with_balancer(balancer)
        .with_sink(sink)
        .try_build()
}

pub fn run(
    cfg: &bms_config::Config,
    json: bool,
    ticks: Option<u64>,
    self_renew: bool,
    lockout: bool,
    shutdown: Arc<AtomicBool>,
) -> CoreResult<RunSummary> {
    let mut ctl = build(cfg, make_sink(cfg, json)?)?;
    if self_renew && !ctl.keepalive().is_enabled() {
        tracing::warn!("--renew ignored: keep-alive disabled (poll.k = 0)");
    }
    ctl.set_lockout(lockout);
    let sensor = seeded_sensor(ctl.config());
    let clock = MonotonicClock::new();
    runner::run(
        &mut ctl,
        sensor,
        &clock,
        &shutdown,
        RunOptions {
            max_ticks: ticks,
            self_renew,
        },
    )
}

/// Poll every cadence once and evaluate once. The relay is forced open and
/// stays open: the check shuts down before any hold-off could elapse.
pub fn self_check(cfg: &bms_config::Config) -> CoreResult<bms_core::TickOutcome> {
    let mut ctl = build(cfg, TracingSink)?;
    let mut sensor = seeded_sensor(ctl.config());
    let cycles = ctl.poll_once(&mut sensor)?;
    tracing::debug!(?cycles, "self-check poll");
    let outcome = ctl.tick()?;
    ctl.shutdown()?;
    Ok(outcome)
}

fn keepalive(cfg: &bms_config::Config, now_ms: u64) -> CoreResult<KeepAlive> {
    let runtime = ControllerCfg::from(cfg);
    if runtime.keepalive.k_ms == 0 {
        return Err(BmsError::ConfigInvalid("keep-alive disabled (poll.k = 0)".into()).into());
    }
    if runtime.keepalive.path.is_none() {
        return Err(BmsError::ConfigInvalid("keepalive.path is not set".into()).into());
    }
    Ok(KeepAlive::load(&runtime.keepalive, now_ms))
}

/// Write a new deadline, `now + min(ms, k)`. Returns it.
pub fn renew(cfg: &bms_config::Config, ms: Option<u64>) -> CoreResult<u64> {
    let now = MonotonicClock::new().unix_ms();
    let mut ka = keepalive(cfg, now)?;
    let window = ms.unwrap_or(ka.period_ms());
    let deadline = ka.renew_until(now, now.saturating_add(window))?;
    tracing::info!(deadline_ms = deadline, "keep-alive renewed");
    Ok(deadline)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeepAliveStatus {
    pub k_ms: u64,
    pub deadline_ms: Option<u64>,
    pub remaining_ms: u64,
    pub expired: bool,
}

pub fn status(cfg: &bms_config::Config) -> CoreResult<KeepAliveStatus> {
    let now = MonotonicClock::new().unix_ms();
    let ka = keepalive(cfg, now)?;
    // report what is on disk, unclamped
    let deadline_ms = match ka.path() {
        Some(p) => read_deadline(p)?,
        None => None,
    };
    Ok(KeepAliveStatus {
        k_ms: ka.period_ms(),
        deadline_ms,
        remaining_ms: deadline_ms.map_or(0, |d| d.saturating_sub(now)),
        expired: deadline_ms.is_none_or(|d| now >= d),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use bms_core::config::Band;

    #[test]
    fn nominal_prefers_idle_inside_band() {
        let l = Limit {
            min: Some(2.8),
            max: Some(3.65),
            ..Limit::default()
        };
        assert_eq!(nominal(&l, 3.3), 3.3);
        assert!((nominal(&l, 0.0) - 3.225).abs() < 1e-6);
    }

    #[test]
    fn nominal_stays_clear_of_single_bounds() {
        let hi = Limit {
            max: Some(100.0),
            ..Limit::default()
        };
        assert_eq!(nominal(&hi, 0.0), 0.0);
        assert_eq!(nominal(&hi, 120.0), 95.0);
        let lim = Limit {
            min: Some(0.0),
            lim: Band {
                min: Some(10.0),
                max: Some(40.0),
            },
            ..Limit::default()
        };
        assert_eq!(nominal(&lim, 25.0), 25.0);
        assert_eq!(nominal(&lim, -5.0), 25.0);
    }
}
