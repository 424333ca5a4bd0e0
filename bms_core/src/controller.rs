//! The controller ties the pieces together on a fixed tick.
//!
//! Each tick: pick up keep-alive renewals, snapshot the pack, evaluate the
//! safety envelopes, reselect balancing cells when new cell data arrived,
//! step the relay machine and publish every change as an `Event`.

use crate::balance::{self, Candidate};
use crate::config::ControllerCfg;
use crate::error::{BmsError, Report, Result};
use crate::event::{Event, EventKind, EventSink};
use crate::keepalive::KeepAlive;
use crate::limits::{AdvisorySet, FaultSet, SafetyEngine};
use crate::pack::{Pack, Snapshot};
use crate::relay::{Cause, RelayStateMachine, Transition};
use crate::scheduler::{CadenceWorker, CycleSummary, PollScheduler};
use crate::status::{ControllerStatus, TickOutcome};
use crate::types::{Cadence, Entity};
use bms_traits::clock::Clock;
use bms_traits::{BalanceOutput, RelayOutput, SensorLink};
use std::sync::Arc;

/// Relative change of the current limit (of `i.max`) worth an event.
const LIMIT_EVENT_STEP: f32 = 0.01;

pub struct Controller<R: RelayOutput, B: BalanceOutput> {
    pub(crate) cfg: ControllerCfg,
    pub(crate) pack: Arc<Pack>,
    pub(crate) engine: SafetyEngine,
    pub(crate) relay: RelayStateMachine<R>,
    pub(crate) balancer: B,
    pub(crate) keepalive: KeepAlive,
    pub(crate) sink: Box<dyn EventSink>,
    pub(crate) clock: Arc<dyn Clock + Send + Sync>,
    pub(crate) scheduler: Option<PollScheduler>,
    pub(crate) faults: FaultSet,
    pub(crate) advisories: AdvisorySet,
    pub(crate) current_limit: f32,
    pub(crate) published_limit: Option<f32>,
    pub(crate) balancing: Vec<u16>,
    pub(crate) balance_pending: bool,
    pub(crate) last_cell_cycle: u64,
    pub(crate) lockout: bool,
    pub(crate) keepalive_expired: bool,
    pub(crate) armed: bool,
    pub(crate) stopped: bool,
}

impl<R: RelayOutput, B: BalanceOutput> core::fmt::Debug for Controller<R, B> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Controller")
            .field("cells", &self.pack.n())
            .field("relay", &self.relay)
            .field("faults", &self.faults.len())
            .field("current_limit", &self.current_limit)
            .field("balancing", &self.balancing)
            .field("lockout", &self.lockout)
            .field("armed", &self.armed)
            .finish()
    }
}

impl<R: RelayOutput, B: BalanceOutput> Controller<R, B> {
    pub fn config(&self) -> &ControllerCfg {
        &self.cfg
    }

    /// Shared pack state; the poll cadences write it, everything else reads.
    pub fn pack(&self) -> &Arc<Pack> {
        &self.pack
    }

    pub fn relay(&self) -> &RelayStateMachine<R> {
        &self.relay
    }

    pub fn balancer(&self) -> &B {
        &self.balancer
    }

    pub fn keepalive(&self) -> &KeepAlive {
        &self.keepalive
    }

    /// Force the relay open before anything else happens.
    ///
    /// An elapsed or missing keep-alive deadline is reported as the cause.
    pub fn arm(&mut self) -> Result<()> {
        if self.armed {
            return Ok(());
        }
        let now = self.clock.now();
        let now_ms = self.clock.unix_ms();
        self.keepalive_expired = self.keepalive.is_expired(now_ms);
        let cause = if self.keepalive_expired {
            self.emit(Entity::KeepAlive, EventKind::KeepAliveExpired, None, now_ms);
            Cause::KeepAliveExpired
        } else {
            Cause::Startup
        };
        let mut transitions = Vec::new();
        self.relay
            .force_open(now, cause, &mut transitions)
            .map_err(Report::new)?;
        self.publish_transitions(&transitions, now_ms);
        self.emit(Entity::Relay, EventKind::RelayForcedOpen(cause), None, now_ms);
        self.armed = true;
        tracing::info!(cells = self.pack.n(), %cause, "controller armed; relay open");
        Ok(())
    }

    /// Arm and start one polling thread per cadence.
    pub fn start<S>(&mut self, sensor: S) -> Result<()>
    where
        S: SensorLink + Clone + Send + 'static,
    {
        if self.scheduler.is_some() {
            return Err(Report::new(BmsError::State("already started".into())));
        }
        self.arm()?;
        let scheduler = PollScheduler::spawn(
            sensor,
            Arc::clone(&self.pack),
            self.cfg.poll,
            self.cfg.periods,
            Arc::clone(&self.clock),
        );
        tracing::info!(cadences = ?scheduler.cadences(), "poll scheduler started");
        self.scheduler = Some(scheduler);
        Ok(())
    }

    /// Run one cycle of every cadence synchronously on the caller's thread.
    ///
    /// Not allowed while the scheduler threads own the channels.
    pub fn poll_once<S: SensorLink>(&mut self, sensor: &mut S) -> Result<Vec<CycleSummary>> {
        if self.scheduler.is_some() {
            return Err(Report::new(BmsError::State(
                "poll_once while the scheduler is running".into(),
            )));
        }
        let mut out = Vec::new();
        for cadence in Cadence::ALL {
            if self.pack.cadence_channels(cadence).is_empty() {
                continue;
            }
            let mut worker = CadenceWorker::new(
                cadence,
                &mut *sensor,
                Arc::clone(&self.pack),
                self.cfg.poll,
                Arc::clone(&self.clock),
            );
            out.push(worker.run_cycle());
        }
        Ok(out)
    }

    /// One controller tick. Arms the controller on first use.
    pub fn tick(&mut self) -> Result<TickOutcome> {
        if self.stopped {
            return Err(Report::new(BmsError::State("controller shut down".into())));
        }
        self.arm()?;
        let now = self.clock.now();
        let now_ms = self.clock.unix_ms();

        self.update_keepalive(now_ms);

        let snap = self.pack.snapshot();
        let report = self.engine.evaluate(&snap);

        for f in report.faults.raised_since(&self.faults) {
            self.emit(f.entity, EventKind::FaultRaised(f.kind), f.value, now_ms);
        }
        for f in self.faults.raised_since(&report.faults).collect::<Vec<_>>() {
            self.emit(f.entity, EventKind::FaultCleared(f.kind), f.value, now_ms);
        }
        for a in report.advisories.raised_since(&self.advisories) {
            let kind = EventKind::Advisory {
                quantity: a.quantity,
                kind: a.kind,
            };
            self.emit(a.entity, kind, Some(a.value), now_ms);
        }
        for a in self.advisories.raised_since(&report.advisories).collect::<Vec<_>>() {
            let kind = EventKind::AdvisoryCleared {
                quantity: a.quantity,
                kind: a.kind,
            };
            self.emit(a.entity, kind, Some(a.value), now_ms);
        }
        self.publish_limit(report.current_limit, now_ms);

        let faults_changed = !report.faults.same_faults(&self.faults);
        self.faults = report.faults;
        self.advisories = report.advisories;
        self.current_limit = report.current_limit;

        let cell_cycle = snap.cycle(Cadence::CellVoltage);
        if cell_cycle != self.last_cell_cycle || faults_changed || self.balance_pending {
            self.last_cell_cycle = cell_cycle;
            self.update_balance(&snap, now_ms);
        }

        let blocking = self.blocking_cause();
        let transitions = self.relay.step(now, blocking);
        self.publish_transitions(&transitions, now_ms);

        Ok(TickOutcome {
            faults: self.faults.iter().collect(),
            advisories: self.advisories.iter().collect(),
            current_limit: self.current_limit,
            transitions,
            balancing: self.balancing.clone(),
            keepalive_expired: self.keepalive_expired,
        })
    }

    /// Highest-priority reason the relay must stay open.
    ///
    /// Keep-alive expiry, then hard faults, then the operator lockout.
    fn blocking_cause(&self) -> Option<Cause> {
        if self.keepalive_expired {
            return Some(Cause::KeepAliveExpired);
        }
        if let Some(f) = self.faults.first() {
            return Some(Cause::Fault(f.entity, f.kind));
        }
        self.lockout.then_some(Cause::Lockout)
    }

    fn update_keepalive(&mut self, now_ms: u64) {
        if let Err(e) = self.keepalive.refresh_from_store(now_ms) {
            tracing::warn!(error = %e, "keep-alive store unreadable");
        }
        let expired = self.keepalive.is_expired(now_ms);
        if expired && !self.keepalive_expired {
            self.emit(Entity::KeepAlive, EventKind::KeepAliveExpired, None, now_ms);
        } else if !expired && self.keepalive_expired {
            let deadline = self.keepalive.deadline_ms().map(|d| d as f32);
            self.emit(Entity::KeepAlive, EventKind::KeepAliveRenewed, deadline, now_ms);
        }
        self.keepalive_expired = expired;
    }

    fn update_balance(&mut self, snap: &Snapshot, now_ms: u64) {
        let candidates: Vec<Candidate> = snap
            .cells
            .iter()
            .zip(&self.cfg.pack.cells)
            .map(|(reading, cfg)| Candidate {
                index: reading.index,
                voltage: reading.u.fresh(),
                excluded: !cfg.balance || self.faults.affects(Entity::Cell(reading.index)),
            })
            .collect();
        let selected = balance::select(&candidates, &self.cfg.balance);

        if selected != self.balancing || self.balance_pending {
            if let Err(e) = self.balancer.set_balancing(&selected) {
                let err = crate::hw_error::map_output_error(&*e);
                tracing::warn!(error = %err, "balance output failed; retrying next tick");
                self.balance_pending = true;
                return;
            }
            self.balance_pending = false;
            if selected != self.balancing {
                tracing::debug!(cells = ?selected, "balance set changed");
                self.emit(
                    Entity::Balancer,
                    EventKind::BalanceChanged(selected.clone()),
                    None,
                    now_ms,
                );
            }
            self.balancing = selected;
        }
        for &index in &self.balancing {
            if let Some(cell) = self.pack.cell(index) {
                cell.mark_balanced(now_ms);
            }
        }
    }

    fn publish_limit(&mut self, limit: f32, now_ms: u64) {
        let step = self.cfg.pack.max_current() * LIMIT_EVENT_STEP;
        let changed = match self.published_limit {
            None => true,
            Some(prev) => (prev - limit).abs() >= step || ((prev == 0.0) != (limit == 0.0)),
        };
        if changed {
            self.published_limit = Some(limit);
            self.emit(Entity::Pack, EventKind::CurrentLimit, Some(limit), now_ms);
        }
    }

    fn publish_transitions(&self, transitions: &[Transition], now_ms: u64) {
        for t in transitions {
            let kind = EventKind::RelayTransition {
                from: t.from,
                to: t.to,
                cause: t.cause,
            };
            self.emit(Entity::Relay, kind, None, now_ms);
        }
    }

    fn emit(&self, entity: Entity, kind: EventKind, value: Option<f32>, timestamp_ms: u64) {
        self.sink.publish(&Event {
            entity,
            kind,
            value,
            timestamp_ms,
        });
    }

    /// Extend the keep-alive to `now + k`. Returns the new deadline (UNIX ms).
    pub fn renew_keepalive(&mut self) -> Result<u64> {
        let now_ms = self.clock.unix_ms();
        self.keepalive.renew(now_ms).map_err(Report::new)
    }

    /// Accept an external deadline (UNIX ms), clamped to `now + k`.
    pub fn renew_keepalive_until(&mut self, deadline_ms: u64) -> Result<u64> {
        let now_ms = self.clock.unix_ms();
        self.keepalive
            .renew_until(now_ms, deadline_ms)
            .map_err(Report::new)
    }

    /// Operator lockout: keeps the relay open until released.
    pub fn set_lockout(&mut self, on: bool) {
        if self.lockout != on {
            tracing::info!(lockout = on, "operator lockout changed");
        }
        self.lockout = on;
    }

    /// Account externally reported work (watt-seconds) and charge (amp-seconds).
    pub fn add_work(&self, ws: f64, as_: f64) {
        self.pack.energy().add_work(ws, as_);
    }

    pub fn status(&self) -> ControllerStatus {
        let now_ms = self.clock.unix_ms();
        let energy = self.pack.energy();
        ControllerStatus {
            relay: self.relay.status(self.clock.now()),
            faults: self.faults.iter().collect(),
            current_limit: self.current_limit,
            balancing: self.balancing.clone(),
            lockout: self.lockout,
            keepalive_deadline_ms: self.keepalive.deadline_ms(),
            keepalive_remaining_ms: self.keepalive.remaining_ms(now_ms),
            state_of_charge: energy.state_of_charge(),
            work_ws: energy.work_ws(),
        }
    }

    /// Open the relay, stop bleeding, then stop the poll threads.
    ///
    /// The threads are stopped even when the relay command fails; the error
    /// is returned afterwards. Idempotent.
    pub fn shutdown(&mut self) -> Result<()> {
        if self.stopped {
            return Ok(());
        }
        self.stopped = true;
        let now = self.clock.now();
        let now_ms = self.clock.unix_ms();
        let mut transitions = Vec::new();
        let opened = self.relay.force_open(now, Cause::Shutdown, &mut transitions);
        self.publish_transitions(&transitions, now_ms);
        if opened.is_ok() {
            self.emit(
                Entity::Relay,
                EventKind::RelayForcedOpen(Cause::Shutdown),
                None,
                now_ms,
            );
        }
        if let Err(e) = self.balancer.set_balancing(&[]) {
            tracing::warn!(error = %e, "failed to stop balancing on shutdown");
        }
        if let Some(mut scheduler) = self.scheduler.take() {
            scheduler.stop();
        }
        tracing::info!("controller shut down");
        opened.map_err(Report::new)
    }
}

impl<R: RelayOutput, B: BalanceOutput> Drop for Controller<R, B> {
    fn drop(&mut self) {
        if self.armed
            && let Err(e) = self.shutdown()
        {
            tracing::error!(error = %e, "shutdown during drop failed");
        }
    }
}
