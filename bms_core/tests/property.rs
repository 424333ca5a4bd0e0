use std::time::{Duration, Instant};

use bms_core::balance::{Candidate, select};
use bms_core::config::{BalanceCfg, Band, ChannelCfg, Limit, RelayCfg};
use bms_core::filter::ChannelState;
use bms_core::{Cause, Entity, FaultKind, RelayState, RelayStateMachine, derate_factor};
use bms_hardware::SimulatedRelay;
use bms_traits::{ChannelId, RelayPosition};
use proptest::prelude::*;

fn high_side(max: f32, lim: f32) -> Limit {
    Limit {
        max: Some(max),
        lim: Band {
            min: None,
            max: Some(lim),
        },
        ..Limit::default()
    }
}

proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]

    // A constant input pulls the average onto itself regardless of the seed.
    #[test]
    fn filter_converges_to_constant_input(
        samples in 1u32..50,
        seed in -100.0f32..100.0,
        target in -100.0f32..100.0,
    ) {
        let cfg = ChannelCfg { samples, ..ChannelCfg::default() };
        let ch = ChannelState::new(ChannelId::PackVoltage, &cfg, 3);
        ch.apply_raw(seed);
        let mut prev_err = (seed - target).abs();
        for _ in 0..samples * 20 {
            let v = ch.apply_raw(target);
            let err = (v - target).abs();
            prop_assert!(err <= prev_err + 1e-4, "error grew: {prev_err} -> {err}");
            prev_err = err;
        }
        prop_assert!(prev_err < 1e-2, "did not converge: {prev_err}");
        prop_assert!(ch.reading().is_fresh());
    }

    // The smoothed value never leaves the range of what was fed in.
    #[test]
    fn filter_stays_within_input_range(
        samples in 1u32..20,
        xs in prop::collection::vec(0.0f32..5.0, 1..100),
    ) {
        let cfg = ChannelCfg { samples, ..ChannelCfg::default() };
        let ch = ChannelState::new(ChannelId::CellVoltage(1), &cfg, 3);
        let lo = xs.iter().copied().fold(f32::INFINITY, f32::min);
        let hi = xs.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        for x in &xs {
            let v = ch.apply_raw(*x);
            prop_assert!(v >= lo - 1e-4 && v <= hi + 1e-4, "{v} outside [{lo}, {hi}]");
        }
    }

    #[test]
    fn derate_is_monotonic_and_bounded(
        lim in 40.0f32..56.0,
        width in 0.5f32..4.0,
        a in 30.0f32..70.0,
        b in 30.0f32..70.0,
    ) {
        let l = high_side(lim + width, lim);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        let (f_lo, f_hi) = (derate_factor(lo, &l), derate_factor(hi, &l));
        prop_assert!((0.0..=1.0).contains(&f_lo));
        prop_assert!((0.0..=1.0).contains(&f_hi));
        prop_assert!(f_hi <= f_lo + 1e-6, "f({hi}) = {f_hi} > f({lo}) = {f_lo}");
        if hi >= lim + width {
            prop_assert_eq!(f_hi, 0.0);
        }
        if lo <= lim {
            prop_assert_eq!(f_lo, 1.0);
        }
    }

    // No step larger than the taper slope allows.
    #[test]
    fn derate_is_continuous(
        lim in 40.0f32..56.0,
        width in 0.5f32..4.0,
        v in 30.0f32..70.0,
        eps in 0.0f32..0.01,
    ) {
        let l = high_side(lim + width, lim);
        let jump = (derate_factor(v + eps, &l) - derate_factor(v, &l)).abs();
        prop_assert!(jump <= eps / width + 1e-4, "jump {jump} for eps {eps}");
    }

    // The contactor never closes before a fault-free stretch of the hold time,
    // and is open after every tick that saw a fault.
    #[test]
    fn relay_honours_hold_off(faults in prop::collection::vec(prop::bool::weighted(0.2), 20..200)) {
        let tick = Duration::from_millis(100);
        let cfg = RelayCfg {
            hold: Duration::from_millis(1000),
            first_hold: Duration::from_millis(300),
            min_on: Duration::ZERO,
            min_off: Duration::ZERO,
            tick,
        };
        let relay = SimulatedRelay::new();
        let mut m = RelayStateMachine::new(relay.clone(), cfg);
        let t0 = Instant::now();
        m.force_open(t0, Cause::Startup, &mut Vec::new()).unwrap();

        let cause = Cause::Fault(Entity::Pack, FaultKind::Overvoltage);
        let mut last_fault: Option<Instant> = None;
        let mut engaged_before = false;
        for (k, faulted) in faults.iter().enumerate() {
            let now = t0 + tick * k as u32;
            if *faulted {
                last_fault = Some(now);
            }
            let transitions = m.step(now, faulted.then_some(cause));
            if *faulted {
                prop_assert_eq!(relay.position(), Some(RelayPosition::Open));
                prop_assert_ne!(m.state(), RelayState::Engaged);
            }
            for t in transitions.iter().filter(|t| t.to == RelayState::Engaged) {
                prop_assert_eq!(t.from, RelayState::ReengageHold);
                let required = if engaged_before { cfg.hold } else { cfg.first_hold };
                match last_fault {
                    // hold starts on the first fault-free tick after the fault
                    Some(f) => prop_assert!(now - f >= required + tick),
                    None => prop_assert!(now - t0 >= required),
                }
                engaged_before = true;
            }
        }
    }

    // Selection bound, exclusions, thresholds and ranking over random packs.
    #[test]
    fn balance_selection_respects_bounds(
        cells in prop::collection::vec(
            (3.0f32..3.6, prop::bool::weighted(0.2), prop::bool::weighted(0.1)),
            1..24,
        ),
        n in 0u16..6,
        d in 0.0f32..0.2,
        r in 0.0f32..1.0,
        min in 3.0f32..3.5,
    ) {
        let candidates: Vec<Candidate> = cells
            .iter()
            .enumerate()
            .map(|(k, &(v, excluded, stale))| Candidate {
                index: k as u16 + 1,
                voltage: (!stale).then_some(v),
                excluded,
            })
            .collect();
        let cfg = BalanceCfg { min, d, n, r };
        let selected = select(&candidates, &cfg);

        if n > 0 {
            prop_assert!(selected.len() <= usize::from(n), "{selected:?} exceeds n = {n}");
        }

        let fresh: Vec<f32> = candidates.iter().filter_map(|c| c.voltage).collect();
        let v_low = fresh.iter().copied().fold(f32::INFINITY, f32::min);
        let v_high = fresh.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let span = v_high - v_low;
        let eligible = |c: &Candidate| match c.voltage {
            Some(v) if !c.excluded => {
                v >= min
                    && v >= v_low + d
                    && (r <= 0.0 || (span > 0.0 && (v - v_low) / span >= r))
            }
            _ => false,
        };

        for &index in &selected {
            let c = &candidates[usize::from(index) - 1];
            prop_assert!(!c.excluded, "excluded cell {index} selected");
            let v = c.voltage.unwrap_or(f32::NAN);
            prop_assert!(v >= min && v >= v_low + d, "cell {index} at {v} below threshold");
        }

        let lowest_selected = selected
            .iter()
            .filter_map(|&i| candidates[usize::from(i) - 1].voltage)
            .fold(f32::INFINITY, f32::min);
        let left_out: Vec<&Candidate> = candidates
            .iter()
            .filter(|c| eligible(*c) && !selected.contains(&c.index))
            .collect();
        if n == 0 {
            prop_assert!(left_out.is_empty(), "eligible cells left out with n = 0");
        }
        for c in left_out {
            let v = c.voltage.unwrap_or(f32::NAN);
            prop_assert!(v <= lowest_selected, "cell {} at {v} outranks a selected cell", c.index);
        }
    }
}
