//! Builder for `Controller`.
//!
//! Relay output, balance output and configuration are required; the event
//! sink defaults to `TracingSink` and the clock to `MonotonicClock`.
//! `try_build()` validates everything and loads the persisted keep-alive
//! deadline.

use std::sync::Arc;

use bms_traits::clock::{Clock, MonotonicClock};
use bms_traits::{BalanceOutput, RelayOutput};

use crate::config::ControllerCfg;
use crate::controller::Controller;
use crate::error::{BmsError, BuildError, Result};
use crate::event::{EventSink, TracingSink};
use crate::keepalive::KeepAlive;
use crate::limits::{AdvisorySet, FaultSet, SafetyEngine};
use crate::pack::Pack;
use crate::relay::RelayStateMachine;

pub struct ControllerBuilder<R, B> {
    cfg: Option<ControllerCfg>,
    relay: Option<R>,
    balancer: Option<B>,
    sink: Option<Box<dyn EventSink>>,
    clock: Option<Arc<dyn Clock + Send + Sync>>,
}

impl<R, B> Default for ControllerBuilder<R, B> {
    fn default() -> Self {
        Self {
            cfg: None,
            relay: None,
            balancer: None,
            sink: None,
            clock: None,
        }
    }
}

impl<R: RelayOutput, B: BalanceOutput> Controller<R, B> {
    /// Start building a Controller.
    pub fn builder() -> ControllerBuilder<R, B> {
        ControllerBuilder::default()
    }
}

impl<R: RelayOutput, B: BalanceOutput> ControllerBuilder<R, B> {
    pub fn with_config(mut self, cfg: ControllerCfg) -> Self {
        self.cfg = Some(cfg);
        self
    }

    pub fn with_relay(mut self, relay: R) -> Self {
        self.relay = Some(relay);
        self
    }

    pub fn with_balancer(mut self, balancer: B) -> Self {
        self.balancer = Some(balancer);
        self
    }

    pub fn with_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.sink = Some(Box::new(sink));
        self
    }

    /// Use a custom clock (tests use `ManualClock`).
    pub fn with_clock(mut self, clock: impl Clock + Send + Sync + 'static) -> Self {
        self.clock = Some(Arc::new(clock));
        self
    }

    pub fn try_build(self) -> Result<Controller<R, B>> {
        let cfg = self
            .cfg
            .ok_or_else(|| eyre::Report::new(BuildError::MissingConfig))?;
        let relay = self
            .relay
            .ok_or_else(|| eyre::Report::new(BuildError::MissingRelay))?;
        let balancer = self
            .balancer
            .ok_or_else(|| eyre::Report::new(BuildError::MissingBalancer))?;
        cfg.validate().map_err(|e| match e {
            BmsError::ConfigInvalid(msg) => eyre::Report::new(BuildError::InvalidConfig(msg)),
            other => eyre::Report::new(other),
        })?;

        let clock: Arc<dyn Clock + Send + Sync> = match self.clock {
            Some(c) => c,
            None => Arc::new(MonotonicClock::new()),
        };
        let sink = self.sink.unwrap_or_else(|| Box::new(TracingSink));

        let keepalive = KeepAlive::load(&cfg.keepalive, clock.unix_ms());
        let pack = Arc::new(Pack::new(&cfg.pack, cfg.poll.stale_after));
        let engine = SafetyEngine::new(cfg.pack.clone());
        let relay = RelayStateMachine::new(relay, cfg.relay);

        tracing::debug!(
            cells = pack.n(),
            keepalive_ms = keepalive.period_ms(),
            "controller built"
        );

        Ok(Controller {
            cfg,
            pack,
            engine,
            relay,
            balancer,
            keepalive,
            sink,
            clock,
            scheduler: None,
            faults: FaultSet::new(),
            advisories: AdvisorySet::default(),
            current_limit: 0.0,
            published_limit: None,
            balancing: Vec::new(),
            balance_pending: false,
            last_cell_cycle: 0,
            lockout: false,
            keepalive_expired: false,
            armed: false,
            stopped: false,
        })
    }
}
