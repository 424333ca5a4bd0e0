//! Shared pack state: channels written by the poll cadences, read by the
//! controller.

use crate::config::PackCfg;
use crate::energy::EnergyCounter;
use crate::filter::{ChannelState, Reading};
use crate::types::Cadence;
use bms_traits::ChannelId;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard};

#[derive(Debug)]
pub struct Cell {
    pub index: u16,
    pub u: ChannelState,
    pub temp: ChannelState,
    temp_monitored: bool,
    /// Wall-clock ms of the last time this cell was selected to bleed; 0 = never.
    last_balance_ms: AtomicU64,
}

impl Cell {
    pub fn temp_monitored(&self) -> bool {
        self.temp_monitored
    }

    pub fn last_balance_ms(&self) -> Option<u64> {
        match self.last_balance_ms.load(Ordering::Relaxed) {
            0 => None,
            ms => Some(ms),
        }
    }

    pub(crate) fn mark_balanced(&self, now_ms: u64) {
        self.last_balance_ms.store(now_ms.max(1), Ordering::Relaxed);
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CellReading {
    pub index: u16,
    pub u: Reading,
    pub temp: Reading,
}

/// Point-in-time copy of every published value.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub pack_u: Reading,
    pub pack_i: Reading,
    pub cells: Vec<CellReading>,
    /// Completed cycles per cadence, indexed like `Cadence::ALL`.
    pub cycles: [u64; 3],
}

impl Snapshot {
    pub fn cycle(&self, cadence: Cadence) -> u64 {
        self.cycles[cadence.slot()]
    }
}

#[derive(Debug)]
pub struct Pack {
    pub u: ChannelState,
    pub i: ChannelState,
    pub cells: Vec<Cell>,
    cycles: [AtomicU64; 3],
    energy: Mutex<EnergyCounter>,
}

impl Pack {
    pub fn new(cfg: &PackCfg, stale_after: u32) -> Self {
        let cells = cfg
            .cells
            .iter()
            .map(|c| Cell {
                index: c.index,
                u: ChannelState::new(ChannelId::CellVoltage(c.index), &c.u.channel, stale_after),
                temp: ChannelState::new(
                    ChannelId::CellTemperature(c.index),
                    &c.temp.channel,
                    stale_after,
                ),
                temp_monitored: c.temp.limit.is_monitored(),
                last_balance_ms: AtomicU64::new(0),
            })
            .collect();
        Self {
            u: ChannelState::new(ChannelId::PackVoltage, &cfg.u.channel, stale_after),
            i: ChannelState::new(ChannelId::PackCurrent, &cfg.i.channel, stale_after),
            cells,
            cycles: [AtomicU64::new(0), AtomicU64::new(0), AtomicU64::new(0)],
            energy: Mutex::new(EnergyCounter::new(cfg.ah, cfg.r)),
        }
    }

    pub fn n(&self) -> u16 {
        self.cells.len() as u16
    }

    pub fn cell(&self, index: u16) -> Option<&Cell> {
        self.cells.get(usize::from(index).checked_sub(1)?)
    }

    /// Look up the channel a sensor id maps to.
    pub fn channel(&self, id: ChannelId) -> Option<&ChannelState> {
        match id {
            ChannelId::PackVoltage => Some(&self.u),
            ChannelId::PackCurrent => Some(&self.i),
            ChannelId::CellVoltage(n) => self.cell(n).map(|c| &c.u),
            ChannelId::CellTemperature(n) => self.cell(n).map(|c| &c.temp),
        }
    }

    /// Channels sampled by `cadence`, in polling order.
    pub fn cadence_channels(&self, cadence: Cadence) -> Vec<&ChannelState> {
        match cadence {
            Cadence::Pack => vec![&self.u, &self.i],
            Cadence::CellVoltage => self.cells.iter().map(|c| &c.u).collect(),
            Cadence::CellTemperature => self
                .cells
                .iter()
                .filter(|c| c.temp_monitored)
                .map(|c| &c.temp)
                .collect(),
        }
    }

    /// Publish completion of a cadence cycle. Called after every channel of
    /// the cycle has been written.
    pub(crate) fn finish_cycle(&self, cadence: Cadence) -> u64 {
        self.cycles[cadence.slot()].fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn cycle(&self, cadence: Cadence) -> u64 {
        self.cycles[cadence.slot()].load(Ordering::Acquire)
    }

    pub fn snapshot(&self) -> Snapshot {
        // Load counters first so a snapshot never claims a cycle whose values it missed.
        let cycles = [
            self.cycle(Cadence::Pack),
            self.cycle(Cadence::CellVoltage),
            self.cycle(Cadence::CellTemperature),
        ];
        Snapshot {
            pack_u: self.u.reading(),
            pack_i: self.i.reading(),
            cells: self
                .cells
                .iter()
                .map(|c| CellReading {
                    index: c.index,
                    u: c.u.reading(),
                    temp: c.temp.reading(),
                })
                .collect(),
            cycles,
        }
    }

    pub fn energy(&self) -> MutexGuard<'_, EnergyCounter> {
        self.energy
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QuantityCfg;

    #[test]
    fn cells_are_one_based_and_channels_resolve() {
        let cfg = PackCfg::uniform(4, QuantityCfg::default(), QuantityCfg::default(), QuantityCfg::default());
        let pack = Pack::new(&cfg, 3);
        assert_eq!(pack.n(), 4);
        assert!(pack.cell(0).is_none());
        assert_eq!(pack.cell(4).map(|c| c.index), Some(4));
        assert!(pack.channel(ChannelId::CellVoltage(5)).is_none());
        assert_eq!(
            pack.channel(ChannelId::CellVoltage(2)).map(ChannelState::id),
            Some(ChannelId::CellVoltage(2))
        );
        // no temperature limits configured -> nothing to poll
        assert!(pack.cadence_channels(Cadence::CellTemperature).is_empty());
        assert_eq!(pack.cadence_channels(Cadence::Pack).len(), 2);
    }

    #[test]
    fn snapshot_reflects_published_values() {
        let cfg = PackCfg::uniform(2, QuantityCfg::default(), QuantityCfg::default(), QuantityCfg::default());
        let pack = Pack::new(&cfg, 3);
        pack.u.apply_raw(6.6);
        pack.cells[0].u.apply_raw(3.3);
        pack.finish_cycle(Cadence::CellVoltage);
        let snap = pack.snapshot();
        assert_eq!(snap.pack_u, Reading::Fresh(6.6));
        assert_eq!(snap.pack_i, Reading::NoData);
        assert_eq!(snap.cells[0].u, Reading::Fresh(3.3));
        assert_eq!(snap.cells[1].u, Reading::NoData);
        assert_eq!(snap.cycle(Cadence::CellVoltage), 1);
        assert_eq!(snap.cycle(Cadence::Pack), 0);
    }
}
