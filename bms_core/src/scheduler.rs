//! Poll scheduler: one thread per cadence.
//!
//! Each cadence thread owns its own clone of the sensor link and is the only
//! writer of the channels it samples. Within a cycle every channel takes
//! `poll.n` readings `poll.t` apart, the successful ones are averaged and fed
//! to the filter, and the cycle counter is bumped only after every channel of
//! the cycle has been published. A `poll.d` settle delay follows each cycle.
//!
//! Safety: threads are stopped and joined when the `PollScheduler` is dropped.

use crate::config::{Periods, PollCfg};
use crate::error::BmsError;
use crate::filter::ChannelState;
use crate::hw_error::map_sensor_error;
use crate::pack::Pack;
use crate::types::Cadence;
use bms_traits::clock::Clock;
use bms_traits::SensorLink;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::Duration;

/// Longest single sleep between shutdown checks.
const SHUTDOWN_SLICE: Duration = Duration::from_millis(20);

/// Take `poll.n` readings of one channel and average the successful ones.
///
/// Fails only when every reading fails; the last error is returned.
pub fn read_averaged<S: SensorLink + ?Sized, C: Clock + ?Sized>(
    sensor: &mut S,
    channel: &ChannelState,
    poll: &PollCfg,
    clock: &C,
) -> Result<f32, BmsError> {
    let n = poll.n.max(1);
    let mut sum = 0.0_f64;
    let mut ok = 0_u32;
    let mut last_err = None;
    for k in 0..n {
        if k > 0 && !poll.t.is_zero() {
            clock.sleep(poll.t);
        }
        match sensor.read(channel.id()) {
            Ok(raw) => {
                sum += f64::from(raw);
                ok += 1;
            }
            Err(e) => last_err = Some(map_sensor_error(&*e)),
        }
    }
    if ok == 0 {
        return Err(last_err
            .unwrap_or_else(|| BmsError::SensorUnavailable(channel.id().to_string())));
    }
    Ok((sum / f64::from(ok)) as f32)
}

/// Outcome of one cadence cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleSummary {
    pub cadence: Cadence,
    /// Cycle counter after this cycle.
    pub cycle: u64,
    pub published: usize,
    pub failed: usize,
}

/// Runs the cycles of a single cadence. The scheduler drives one of these per
/// thread; tests can drive it directly with a manual clock.
pub struct CadenceWorker<S, C> {
    cadence: Cadence,
    sensor: S,
    pack: Arc<Pack>,
    poll: PollCfg,
    clock: C,
}

impl<S: SensorLink, C: Clock> CadenceWorker<S, C> {
    pub fn new(cadence: Cadence, sensor: S, pack: Arc<Pack>, poll: PollCfg, clock: C) -> Self {
        Self {
            cadence,
            sensor,
            pack,
            poll,
            clock,
        }
    }

    pub fn cadence(&self) -> Cadence {
        self.cadence
    }

    /// Sample, publish, then settle.
    pub fn run_cycle(&mut self) -> CycleSummary {
        let pack = Arc::clone(&self.pack);
        let mut published = 0;
        let mut failed = 0;
        for channel in pack.cadence_channels(self.cadence) {
            match read_averaged(&mut self.sensor, channel, &self.poll, &self.clock) {
                Ok(raw) => {
                    let v = channel.apply_raw(raw);
                    tracing::trace!(channel = %channel.id(), raw, value = v, "sample");
                    published += 1;
                }
                Err(e) => {
                    failed += 1;
                    if channel.record_failure() {
                        tracing::error!(channel = %channel.id(), error = %e, "channel stale");
                    } else {
                        tracing::warn!(channel = %channel.id(), error = %e, "sensor read failed");
                    }
                }
            }
        }

        if self.cadence == Cadence::Pack {
            self.integrate_energy(&pack);
        }

        let cycle = pack.finish_cycle(self.cadence);
        tracing::debug!(cadence = %self.cadence, cycle, published, failed, "cycle done");
        if !self.poll.d.is_zero() {
            self.clock.sleep(self.poll.d);
        }
        CycleSummary {
            cadence: self.cadence,
            cycle,
            published,
            failed,
        }
    }

    fn integrate_energy(&self, pack: &Pack) {
        let sample = pack.u.reading().fresh().zip(pack.i.reading().fresh());
        pack.energy().observe(self.clock.now(), sample);
    }
}

pub struct PollScheduler {
    shutdown: Arc<AtomicBool>,
    handles: Vec<(Cadence, JoinHandle<()>)>,
}

impl PollScheduler {
    /// Spawn one thread per cadence that has channels to poll.
    pub fn spawn<S, C>(sensor: S, pack: Arc<Pack>, poll: PollCfg, periods: Periods, clock: C) -> Self
    where
        S: SensorLink + Clone + Send + 'static,
        C: Clock + Clone + Send + Sync + 'static,
    {
        let shutdown = Arc::new(AtomicBool::new(false));
        let mut handles = Vec::new();
        for cadence in Cadence::ALL {
            if pack.cadence_channels(cadence).is_empty() {
                tracing::debug!(%cadence, "no channels; cadence not started");
                continue;
            }
            let period = match cadence {
                Cadence::Pack => periods.voltage,
                Cadence::CellVoltage => periods.cell_voltage,
                Cadence::CellTemperature => periods.cell_temperature,
            };
            let mut worker = CadenceWorker::new(
                cadence,
                sensor.clone(),
                Arc::clone(&pack),
                poll,
                clock.clone(),
            );
            let flag = Arc::clone(&shutdown);
            let clock = clock.clone();
            let handle = std::thread::spawn(move || {
                let mut next = clock.now();
                while !flag.load(Ordering::Relaxed) {
                    worker.run_cycle();
                    next += period;
                    let now = clock.now();
                    if next > now {
                        sleep_unless_shutdown(&clock, next - now, &flag);
                    } else {
                        // overran the period; do not try to catch up
                        next = now;
                    }
                }
                tracing::trace!(%cadence, "cadence thread exiting cleanly");
            });
            handles.push((cadence, handle));
        }
        Self { shutdown, handles }
    }

    pub fn cadences(&self) -> Vec<Cadence> {
        self.handles.iter().map(|(c, _)| *c).collect()
    }

    pub fn is_running(&self) -> bool {
        !self.handles.is_empty() && self.handles.iter().all(|(_, h)| !h.is_finished())
    }

    /// Signal every cadence and join them. Idempotent.
    pub fn stop(&mut self) {
        self.shutdown.store(true, Ordering::Relaxed);
        for (cadence, handle) in self.handles.drain(..) {
            if let Err(e) = handle.join() {
                tracing::warn!(%cadence, ?e, "cadence thread panicked during shutdown");
            }
        }
    }
}

impl Drop for PollScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}

fn sleep_unless_shutdown<C: Clock>(clock: &C, total: Duration, flag: &AtomicBool) {
    let mut left = total;
    while !left.is_zero() && !flag.load(Ordering::Relaxed) {
        let slice = left.min(SHUTDOWN_SLICE);
        clock.sleep(slice);
        left = left.saturating_sub(slice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bms_traits::{ChannelId, ManualClock};
    use crate::config::{ChannelCfg, PackCfg, QuantityCfg};

    struct Flaky {
        calls: u32,
    }

    impl SensorLink for Flaky {
        fn read(
            &mut self,
            _channel: ChannelId,
        ) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
            self.calls += 1;
            if self.calls % 2 == 0 {
                Err(Box::new(std::io::Error::other("crc")))
            } else {
                Ok(100 * self.calls as i32)
            }
        }
    }

    #[test]
    fn averages_only_successful_reads() {
        let ch = ChannelState::new(ChannelId::PackVoltage, &ChannelCfg::default(), 3);
        let poll = PollCfg {
            n: 4,
            t: Duration::from_millis(5),
            ..PollCfg::default()
        };
        let clock = ManualClock::new();
        let start = clock.now();
        let mut s = Flaky { calls: 0 };
        // reads 1 and 3 succeed: (100 + 300) / 2
        assert_eq!(read_averaged(&mut s, &ch, &poll, &clock).unwrap(), 200.0);
        // three gaps between four readings
        assert_eq!(clock.now() - start, Duration::from_millis(15));
    }

    #[test]
    fn worker_publishes_then_counts_cycle() {
        let cfg = PackCfg::uniform(2, QuantityCfg::default(), QuantityCfg::default(), QuantityCfg::default());
        let pack = Arc::new(Pack::new(&cfg, 3));
        let mut w = CadenceWorker::new(
            Cadence::CellVoltage,
            Flaky { calls: 0 },
            Arc::clone(&pack),
            PollCfg::default(),
            ManualClock::new(),
        );
        let s = w.run_cycle();
        assert_eq!((s.cycle, s.published, s.failed), (1, 1, 1));
        assert!(pack.cells[0].u.reading().is_fresh());
        assert_eq!(pack.cells[1].u.consecutive_failures(), 1);
        assert_eq!(pack.cycle(Cadence::CellVoltage), 1);
    }
}
