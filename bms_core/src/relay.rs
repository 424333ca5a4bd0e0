//! Contactor state machine.
//!
//! `Engaged -> Disengaging -> Disengaged -> ReengageHold -> Engaged`.
//! The machine is the only writer of the relay output. Opening for a safety
//! cause is never delayed; closing always waits out the hold-off.

use crate::config::RelayCfg;
use crate::error::BmsError;
use crate::hw_error::map_output_error;
use crate::types::{Entity, FaultKind};
use bms_traits::{RelayOutput, RelayPosition};
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayState {
    Engaged,
    Disengaging,
    Disengaged,
    ReengageHold,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            RelayState::Engaged => "Engaged",
            RelayState::Disengaging => "Disengaging",
            RelayState::Disengaged => "Disengaged",
            RelayState::ReengageHold => "ReengageHold",
        })
    }
}

/// Why the relay last changed (or is being held).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cause {
    Startup,
    Fault(Entity, FaultKind),
    KeepAliveExpired,
    Lockout,
    Shutdown,
    FaultsCleared,
    HoldElapsed,
}

impl Cause {
    /// Safety causes open the relay without waiting for the minimum on-time.
    pub fn is_safety(&self) -> bool {
        matches!(self, Cause::Fault(..) | Cause::KeepAliveExpired | Cause::Shutdown)
    }
}

impl fmt::Display for Cause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cause::Startup => f.write_str("Startup"),
            Cause::Fault(entity, kind) => write!(f, "{kind} ({entity})"),
            Cause::KeepAliveExpired => f.write_str("KeepAliveExpired"),
            Cause::Lockout => f.write_str("Lockout"),
            Cause::Shutdown => f.write_str("Shutdown"),
            Cause::FaultsCleared => f.write_str("FaultsCleared"),
            Cause::HoldElapsed => f.write_str("HoldElapsed"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RelayState,
    pub to: RelayState,
    pub cause: Cause,
}

/// Queryable relay summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RelayStatus {
    pub state: RelayState,
    /// Last position successfully commanded; `None` before the first command.
    pub position: Option<RelayPosition>,
    pub cause: Cause,
    /// Time left in `ReengageHold`.
    pub hold_remaining: Option<Duration>,
    pub ever_engaged: bool,
}

pub struct RelayStateMachine<R: RelayOutput> {
    output: R,
    cfg: RelayCfg,
    state: RelayState,
    position: Option<RelayPosition>,
    cause: Cause,
    hold_until: Option<Instant>,
    ever_engaged: bool,
    last_open: Option<Instant>,
    last_close: Option<Instant>,
}

impl<R: RelayOutput> fmt::Debug for RelayStateMachine<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayStateMachine")
            .field("state", &self.state)
            .field("position", &self.position)
            .field("cause", &self.cause)
            .field("ever_engaged", &self.ever_engaged)
            .finish()
    }
}

impl<R: RelayOutput> RelayStateMachine<R> {
    /// Starts `Disengaged` with no command issued; call `force_open` before stepping.
    pub fn new(output: R, cfg: RelayCfg) -> Self {
        Self {
            output,
            cfg,
            state: RelayState::Disengaged,
            position: None,
            cause: Cause::Startup,
            hold_until: None,
            ever_engaged: false,
            last_open: None,
            last_close: None,
        }
    }

    pub fn state(&self) -> RelayState {
        self.state
    }

    pub fn position(&self) -> Option<RelayPosition> {
        self.position
    }

    pub fn cause(&self) -> Cause {
        self.cause
    }

    pub fn output(&self) -> &R {
        &self.output
    }

    pub fn status(&self, now: Instant) -> RelayStatus {
        RelayStatus {
            state: self.state,
            position: self.position,
            cause: self.cause,
            hold_remaining: self.hold_until.map(|h| h.saturating_duration_since(now)),
            ever_engaged: self.ever_engaged,
        }
    }

    /// Command the relay open unconditionally.
    ///
    /// Transitions that happened are appended to `out` even when the output
    /// fails; in that case the machine stays `Disengaging` and the error is
    /// returned.
    pub fn force_open(
        &mut self,
        now: Instant,
        cause: Cause,
        out: &mut Vec<Transition>,
    ) -> Result<(), BmsError> {
        self.hold_until = None;
        self.cause = cause;
        match self.state {
            RelayState::Engaged => self.push(RelayState::Disengaging, cause, out),
            RelayState::ReengageHold => self.push(RelayState::Disengaged, cause, out),
            RelayState::Disengaging | RelayState::Disengaged => {}
        }
        self.output.set(RelayPosition::Open).map_err(|e| {
            let err = map_output_error(&*e);
            tracing::error!(error = %err, %cause, "relay open command failed");
            err
        })?;
        self.position = Some(RelayPosition::Open);
        self.last_open = Some(now);
        if self.state == RelayState::Disengaging {
            self.push(RelayState::Disengaged, cause, out);
        }
        Ok(())
    }

    /// Advance one controller tick.
    ///
    /// `blocking` is the highest-priority reason the relay must not be
    /// closed right now, if any.
    pub fn step(&mut self, now: Instant, blocking: Option<Cause>) -> Vec<Transition> {
        let mut out = Vec::new();
        match (self.state, blocking) {
            (RelayState::Engaged, Some(cause)) => {
                if !cause.is_safety() && !self.elapsed(self.last_close, self.cfg.min_on, now) {
                    return out;
                }
                // error already logged; Disengaging retries next tick
                let _ = self.force_open(now, cause, &mut out);
            }
            (RelayState::Engaged, None) => {}
            (RelayState::Disengaging, _) => {
                let cause = self.cause;
                let _ = self.force_open(now, cause, &mut out);
            }
            (RelayState::Disengaged, Some(cause)) => {
                self.cause = cause;
            }
            (RelayState::Disengaged, None) => {
                let hold = if self.ever_engaged {
                    self.cfg.hold
                } else {
                    self.cfg.first_hold
                };
                let mut until = now + hold;
                if let Some(opened) = self.last_open {
                    until = until.max(opened + self.cfg.min_off);
                }
                self.hold_until = Some(until);
                self.push(RelayState::ReengageHold, Cause::FaultsCleared, &mut out);
                self.cause = Cause::FaultsCleared;
            }
            (RelayState::ReengageHold, Some(cause)) => {
                self.hold_until = None;
                self.cause = cause;
                self.push(RelayState::Disengaged, cause, &mut out);
            }
            (RelayState::ReengageHold, None) => {
                if self.hold_until.is_some_and(|h| now >= h) {
                    match self.output.set(RelayPosition::Closed) {
                        Ok(()) => {
                            self.position = Some(RelayPosition::Closed);
                            self.last_close = Some(now);
                            self.hold_until = None;
                            self.ever_engaged = true;
                            self.cause = Cause::HoldElapsed;
                            self.push(RelayState::Engaged, Cause::HoldElapsed, &mut out);
                        }
                        Err(e) => {
                            let err = map_output_error(&*e);
                            tracing::warn!(error = %err, "relay close command failed; retrying");
                        }
                    }
                }
            }
        }
        out
    }

    fn elapsed(&self, since: Option<Instant>, min: Duration, now: Instant) -> bool {
        since.is_none_or(|t| now.saturating_duration_since(t) >= min)
    }

    fn push(&mut self, to: RelayState, cause: Cause, out: &mut Vec<Transition>) {
        let from = self.state;
        self.state = to;
        tracing::info!(%from, %to, %cause, "relay transition");
        out.push(Transition { from, to, cause });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Recorder(Arc<Mutex<Vec<RelayPosition>>>);

    impl RelayOutput for Recorder {
        fn set(
            &mut self,
            position: RelayPosition,
        ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
            self.0.lock().unwrap().push(position);
            Ok(())
        }
    }

    fn cfg() -> RelayCfg {
        RelayCfg {
            hold: Duration::from_millis(1000),
            first_hold: Duration::from_millis(200),
            min_on: Duration::from_millis(500),
            min_off: Duration::ZERO,
            tick: Duration::from_millis(100),
        }
    }

    #[test]
    fn first_engagement_uses_short_hold() {
        let rec = Recorder::default();
        let mut m = RelayStateMachine::new(rec.clone(), cfg());
        let t0 = Instant::now();
        let mut tr = Vec::new();
        m.force_open(t0, Cause::Startup, &mut tr).unwrap();
        assert!(tr.is_empty());

        let tr = m.step(t0, None);
        assert_eq!(tr[0].to, RelayState::ReengageHold);
        assert!(m.step(t0 + Duration::from_millis(199), None).is_empty());
        let tr = m.step(t0 + Duration::from_millis(200), None);
        assert_eq!(tr[0].to, RelayState::Engaged);
        assert_eq!(*rec.0.lock().unwrap(), vec![RelayPosition::Open, RelayPosition::Closed]);
    }

    #[test]
    fn lockout_respects_min_on_but_faults_do_not() {
        let mut m = RelayStateMachine::new(Recorder::default(), cfg());
        let t0 = Instant::now();
        m.force_open(t0, Cause::Startup, &mut Vec::new()).unwrap();
        m.step(t0, None);
        let closed_at = t0 + Duration::from_millis(200);
        m.step(closed_at, None);
        assert_eq!(m.state(), RelayState::Engaged);

        assert!(m.step(closed_at + Duration::from_millis(100), Some(Cause::Lockout)).is_empty());
        let fault = Cause::Fault(Entity::Pack, FaultKind::Overvoltage);
        let tr = m.step(closed_at + Duration::from_millis(100), Some(fault));
        assert_eq!(tr.len(), 2);
        assert_eq!(m.status(closed_at).cause, fault);
        assert_eq!(m.position(), Some(RelayPosition::Open));
    }
}
