//! Tick loop driving a started `Controller` until shutdown.

use crate::controller::Controller;
use crate::error::Result;
use crate::relay::RelayState;
use crate::util::duration_ms;
use bms_traits::clock::Clock;
use bms_traits::{BalanceOutput, RelayOutput, SensorLink};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Stop after this many ticks; `None` runs until the shutdown flag is set.
    pub max_ticks: Option<u64>,
    /// Renew the keep-alive every tick, standing in for the upstream process.
    pub self_renew: bool,
}

/// What happened during a run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub ticks: u64,
    pub transitions: u64,
    pub ticks_engaged: u64,
    /// Highest number of simultaneously active faults seen.
    pub peak_faults: usize,
}

/// Time left until the next tick, or zero when the tick overran.
#[inline]
fn remaining(tick: Duration, spent: Duration) -> Duration {
    tick.saturating_sub(spent)
}

/// Start polling, tick every `relay.tick` until `shutdown` is set (or
/// `max_ticks` is reached), then shut the controller down.
///
/// The controller is always shut down, also when a tick fails.
pub fn run<R, B, S, C>(
    controller: &mut Controller<R, B>,
    sensor: S,
    clock: &C,
    shutdown: &AtomicBool,
    opts: RunOptions,
) -> Result<RunSummary>
where
    R: RelayOutput,
    B: BalanceOutput,
    S: SensorLink + Clone + Send + 'static,
    C: Clock + ?Sized,
{
    let result = run_inner(controller, sensor, clock, shutdown, opts);
    let closed = controller.shutdown();
    let summary = result?;
    closed?;
    Ok(summary)
}

fn run_inner<R, B, S, C>(
    controller: &mut Controller<R, B>,
    sensor: S,
    clock: &C,
    shutdown: &AtomicBool,
    opts: RunOptions,
) -> Result<RunSummary>
where
    R: RelayOutput,
    B: BalanceOutput,
    S: SensorLink + Clone + Send + 'static,
    C: Clock + ?Sized,
{
    controller.start(sensor)?;
    let tick = controller.config().relay.tick;
    tracing::info!(tick_ms = duration_ms(tick), max_ticks = ?opts.max_ticks, "run start");

    let mut summary = RunSummary::default();
    while !shutdown.load(Ordering::Relaxed) {
        if opts.max_ticks.is_some_and(|m| summary.ticks >= m) {
            break;
        }
        let started = clock.now();
        if opts.self_renew && controller.keepalive().is_enabled() {
            controller.renew_keepalive()?;
        }
        let outcome = controller.tick()?;
        summary.ticks += 1;
        summary.transitions += outcome.transitions.len() as u64;
        summary.peak_faults = summary.peak_faults.max(outcome.faults.len());
        if controller.relay().state() == RelayState::Engaged {
            summary.ticks_engaged += 1;
        }
        clock.sleep(remaining(tick, clock.now().saturating_duration_since(started)));
    }
    tracing::info!(ticks = summary.ticks, transitions = summary.transitions, "run stop");
    Ok(summary)
}
