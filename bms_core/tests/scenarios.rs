//! End-to-end controller scenarios driven by a manual clock.
//!
//! Sampling happens synchronously through `poll_once`, so every test is
//! deterministic: set raw counts, poll, advance time, tick.

use std::time::Duration;

use bms_core::mocks::MemorySink;
use bms_core::{
    BalanceCfg, Cause, Controller, ControllerCfg, Entity, EventKind, FaultKind, Limit, PackCfg,
    QuantityCfg, RelayState,
};
use bms_traits::{ChannelId, ManualClock, RelayPosition};
use bms_hardware::{SimulatedBalancer, SimulatedRelay, SimulatedSensor};

const MILLI: f32 = 0.001;

fn quantity(min: Option<f32>, max: Option<f32>) -> QuantityCfg {
    let mut q = QuantityCfg {
        limit: Limit {
            min,
            max,
            ..Limit::default()
        },
        ..QuantityCfg::default()
    };
    q.channel.calibration.scale = MILLI;
    q
}

struct Rig {
    ctl: Controller<SimulatedRelay, SimulatedBalancer>,
    sensor: SimulatedSensor,
    relay: SimulatedRelay,
    balancer: SimulatedBalancer,
    clock: ManualClock,
    sink: MemorySink,
}

impl Rig {
    fn new(cfg: ControllerCfg) -> Self {
        let relay = SimulatedRelay::new();
        let balancer = SimulatedBalancer::new();
        let clock = ManualClock::new();
        let sink = MemorySink::new();
        let ctl = Controller::builder()
            .with_config(cfg)
            .with_relay(relay.clone())
            .with_balancer(balancer.clone())
            .with_sink(sink.clone())
            .with_clock(clock.clone())
            .try_build()
            .expect("valid config");
        Self {
            ctl,
            sensor: SimulatedSensor::new(),
            relay,
            balancer,
            clock,
            sink,
        }
    }

    fn poll(&mut self) {
        let mut sensor = self.sensor.clone();
        self.ctl.poll_once(&mut sensor).expect("poll");
    }

    /// Tick until the relay engages, advancing one relay tick at a time.
    fn engage(&mut self, within: Duration) {
        let tick = self.ctl.config().relay.tick;
        let mut waited = Duration::ZERO;
        loop {
            self.ctl.tick().expect("tick");
            if self.ctl.relay().state() == RelayState::Engaged {
                return;
            }
            assert!(waited <= within, "relay did not engage within {within:?}");
            self.clock.advance(tick);
            waited += tick;
        }
    }
}

/// 16-cell pack, pack voltage limited to 58 V, cells unmonitored.
fn pack16() -> ControllerCfg {
    let pack = PackCfg::uniform(
        16,
        quantity(None, Some(58.0)),
        quantity(None, Some(100.0)),
        quantity(None, None),
    );
    ControllerCfg::new(pack)
}

fn seed_pack16(sensor: &SimulatedSensor, pack_raw: i32) {
    sensor.set_raw(ChannelId::PackVoltage, pack_raw);
    sensor.set_raw(ChannelId::PackCurrent, 0);
    for k in 1..=16 {
        sensor.set_raw(ChannelId::CellVoltage(k), 3620);
    }
}

#[test]
fn overvoltage_opens_relay_immediately_and_recloses_after_hold() {
    let mut rig = Rig::new(pack16());
    seed_pack16(&rig.sensor, 57_900);
    rig.poll();

    let out = rig.ctl.tick().unwrap();
    assert!(out.faults.is_empty());
    assert!((out.current_limit - 100.0).abs() < 1e-3);
    // startup forced the relay open before anything else
    assert_eq!(rig.relay.commands().first(), Some(&RelayPosition::Open));

    rig.engage(Duration::from_secs(3));
    assert_eq!(rig.relay.position(), Some(RelayPosition::Closed));

    rig.sensor.set_raw(ChannelId::PackVoltage, 58_500);
    rig.poll();
    let out = rig.ctl.tick().unwrap();
    let cause = Cause::Fault(Entity::Pack, FaultKind::Overvoltage);
    assert_eq!(out.transitions.len(), 2);
    assert!(out.transitions.iter().all(|t| t.cause == cause));
    assert_eq!(rig.ctl.relay().state(), RelayState::Disengaged);
    assert_eq!(rig.relay.position(), Some(RelayPosition::Open));
    assert_eq!(out.current_limit, 0.0);
    assert!(rig
        .sink
        .contains(|k| *k == EventKind::FaultRaised(FaultKind::Overvoltage)));

    // back inside the envelope: the full hold applies now
    rig.sensor.set_raw(ChannelId::PackVoltage, 57_000);
    rig.poll();
    let out = rig.ctl.tick().unwrap();
    assert!(out.faults.is_empty());
    assert_eq!(rig.ctl.relay().state(), RelayState::ReengageHold);
    assert!(rig
        .sink
        .contains(|k| *k == EventKind::FaultCleared(FaultKind::Overvoltage)));

    rig.clock.advance(Duration::from_millis(9_900));
    rig.ctl.tick().unwrap();
    assert_eq!(rig.ctl.relay().state(), RelayState::ReengageHold);
    rig.clock.advance(Duration::from_millis(100));
    rig.ctl.tick().unwrap();
    assert_eq!(rig.ctl.relay().state(), RelayState::Engaged);
}

#[test]
fn fault_during_hold_restarts_the_hold() {
    let mut rig = Rig::new(pack16());
    seed_pack16(&rig.sensor, 57_900);
    rig.poll();
    rig.ctl.tick().unwrap();
    assert_eq!(rig.ctl.relay().state(), RelayState::ReengageHold);

    rig.clock.advance(Duration::from_millis(1_500));
    rig.sensor.set_raw(ChannelId::PackVoltage, 59_000);
    rig.poll();
    rig.ctl.tick().unwrap();
    assert_eq!(rig.ctl.relay().state(), RelayState::Disengaged);

    rig.sensor.set_raw(ChannelId::PackVoltage, 57_900);
    rig.poll();
    rig.ctl.tick().unwrap();
    // the first hold starts over from here
    rig.clock.advance(Duration::from_millis(1_900));
    rig.ctl.tick().unwrap();
    assert_eq!(rig.ctl.relay().state(), RelayState::ReengageHold);
    rig.clock.advance(Duration::from_millis(100));
    rig.ctl.tick().unwrap();
    assert_eq!(rig.ctl.relay().state(), RelayState::Engaged);
    assert_eq!(rig.relay.commands().last(), Some(&RelayPosition::Closed));
}

#[test]
fn lost_current_channel_goes_stale_and_blocks_engagement() {
    let mut cfg = pack16();
    cfg.poll.stale_after = 2;
    let mut rig = Rig::new(cfg);
    seed_pack16(&rig.sensor, 57_900);
    rig.poll();
    rig.engage(Duration::from_secs(3));

    rig.sensor.set_failing(ChannelId::PackCurrent, true);
    rig.poll();
    let out = rig.ctl.tick().unwrap();
    assert!(out.faults.is_empty(), "one failed cycle is tolerated");
    rig.poll();
    let out = rig.ctl.tick().unwrap();
    assert_eq!(out.faults.len(), 1);
    assert_eq!(out.faults[0].kind, FaultKind::ChannelStale);
    assert_eq!(out.faults[0].entity, Entity::Pack);
    assert_eq!(rig.ctl.relay().state(), RelayState::Disengaged);
    assert_eq!(out.current_limit, 0.0);
}

/// Four cells at `[3.40, 3.30, 3.45, 3.20]` V.
fn balance_rig(cell_u: QuantityCfg) -> Rig {
    let pack = PackCfg::uniform(4, QuantityCfg::default(), quantity(None, Some(100.0)), cell_u);
    let mut cfg = ControllerCfg::new(pack);
    cfg.balance = BalanceCfg {
        min: 3.3,
        d: 0.05,
        n: 1,
        r: 0.0,
    };
    let rig = Rig::new(cfg);
    rig.sensor.set_raw(ChannelId::PackCurrent, 0);
    for (k, raw) in [3400, 3300, 3450, 3200].into_iter().enumerate() {
        rig.sensor.set_raw(ChannelId::CellVoltage(k as u16 + 1), raw);
    }
    rig
}

#[test]
fn highest_qualifying_cell_bleeds() {
    let mut rig = balance_rig(quantity(None, None));
    rig.poll();
    let out = rig.ctl.tick().unwrap();
    assert_eq!(out.balancing, vec![3]);
    assert_eq!(rig.balancer.active(), vec![3]);
    assert!(rig.ctl.pack().cell(3).unwrap().last_balance_ms().is_some());
    assert_eq!(rig.sink.named("balance_changed").len(), 1);

    // no new cell data and no fault change: selection is not redone
    rig.ctl.tick().unwrap();
    assert_eq!(rig.sink.named("balance_changed").len(), 1);
}

#[test]
fn faulted_cell_is_never_bled() {
    let mut rig = balance_rig(quantity(None, Some(3.44)));
    rig.poll();
    let out = rig.ctl.tick().unwrap();
    assert!(out
        .faults
        .iter()
        .any(|f| f.entity == Entity::Cell(3) && f.kind == FaultKind::Overvoltage));
    assert_eq!(out.balancing, vec![1]);
    assert_eq!(rig.balancer.active(), vec![1]);
}

#[test]
fn shutdown_opens_relay_and_stops_bleeding() {
    let mut rig = balance_rig(quantity(None, None));
    rig.poll();
    rig.engage(Duration::from_secs(3));
    assert_eq!(rig.balancer.active(), vec![3]);

    rig.ctl.shutdown().unwrap();
    assert_eq!(rig.relay.position(), Some(RelayPosition::Open));
    assert!(rig.balancer.active().is_empty());
    assert!(rig
        .sink
        .contains(|k| *k == EventKind::RelayForcedOpen(Cause::Shutdown)));
    // idempotent, and the controller refuses further ticks
    rig.ctl.shutdown().unwrap();
    assert!(rig.ctl.tick().is_err());
}

#[test]
fn lockout_keeps_relay_open_until_released() {
    let mut rig = Rig::new(pack16());
    seed_pack16(&rig.sensor, 57_900);
    rig.poll();
    rig.engage(Duration::from_secs(3));

    rig.ctl.set_lockout(true);
    let out = rig.ctl.tick().unwrap();
    assert!(out.transitions.iter().any(|t| t.cause == Cause::Lockout));
    assert!(rig.ctl.status().lockout);
    assert_eq!(rig.relay.position(), Some(RelayPosition::Open));

    rig.clock.advance(Duration::from_secs(30));
    rig.ctl.tick().unwrap();
    assert_eq!(rig.ctl.relay().state(), RelayState::Disengaged);

    rig.ctl.set_lockout(false);
    rig.engage(Duration::from_secs(11));
}

#[test]
fn current_limit_tapers_inside_degradation_band() {
    let mut cfg = pack16();
    cfg.pack.u.limit.lim.max = Some(57.0);
    let mut rig = Rig::new(cfg);
    seed_pack16(&rig.sensor, 57_500);
    rig.poll();
    let out = rig.ctl.tick().unwrap();
    assert!(out.faults.is_empty());
    assert!((out.current_limit - 50.0).abs() < 0.1, "{}", out.current_limit);
    let limits = rig.sink.named("current_limit");
    assert_eq!(limits.len(), 1);
    assert!((limits[0].value.unwrap() - 50.0).abs() < 0.1);
}
