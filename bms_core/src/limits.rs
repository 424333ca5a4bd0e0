//! Safety limit engine: hard faults, advisory bands, current derating and the
//! pack-versus-cells cross-check.

use crate::config::{Limit, PackCfg};
use crate::filter::Reading;
use crate::pack::Snapshot;
use crate::types::{AdvisoryKind, Entity, FaultKind, Quantity};
use std::collections::BTreeMap;

/// Fraction of the nominal current allowed for `value` under `limit`.
///
/// Zero at or beyond a hard bound, one at or inside the `lim` band, linear in
/// between. A side without a `lim` bound contributes 1 anywhere inside the
/// hard band.
pub fn derate_factor(value: f32, limit: &Limit) -> f32 {
    if !value.is_finite() {
        return 0.0;
    }
    let high = match limit.max {
        Some(max) if value >= max => 0.0,
        Some(max) => match limit.lim.max {
            Some(lim) if value > lim && max > lim => (max - value) / (max - lim),
            _ => 1.0,
        },
        None => 1.0,
    };
    let low = match limit.min {
        Some(min) if value <= min => 0.0,
        Some(min) => match limit.lim.min {
            Some(lim) if value < lim && lim > min => (value - min) / (lim - min),
            _ => 1.0,
        },
        None => 1.0,
    };
    high.min(low).clamp(0.0, 1.0)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Fault {
    pub entity: Entity,
    pub kind: FaultKind,
    /// Offending value; `None` for stale channels without data.
    pub value: Option<f32>,
}

/// Active faults keyed by `(entity, kind)`, iterated pack first then by cell.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FaultSet {
    inner: BTreeMap<(Entity, FaultKind), Option<f32>>,
}

impl FaultSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, entity: Entity, kind: FaultKind, value: Option<f32>) {
        self.inner.insert((entity, kind), value);
    }

    pub fn contains(&self, entity: Entity, kind: FaultKind) -> bool {
        self.inner.contains_key(&(entity, kind))
    }

    /// True when `entity` has any active fault.
    pub fn affects(&self, entity: Entity) -> bool {
        self.inner.keys().any(|(e, _)| *e == entity)
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Fault> + '_ {
        self.inner.iter().map(|(&(entity, kind), &value)| Fault {
            entity,
            kind,
            value,
        })
    }

    /// Same `(entity, kind)` pairs, ignoring values.
    pub fn same_faults(&self, other: &FaultSet) -> bool {
        self.inner.keys().eq(other.inner.keys())
    }

    /// Highest-priority fault, used as the relay cause.
    pub fn first(&self) -> Option<Fault> {
        self.iter().next()
    }

    /// Faults present here but not in `previous`.
    pub fn raised_since<'a>(&'a self, previous: &'a FaultSet) -> impl Iterator<Item = Fault> + 'a {
        self.iter()
            .filter(move |f| !previous.contains(f.entity, f.kind))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Advisory {
    pub entity: Entity,
    pub quantity: Quantity,
    pub kind: AdvisoryKind,
    pub value: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AdvisorySet {
    inner: BTreeMap<(Entity, Quantity, AdvisoryKind), f32>,
}

impl AdvisorySet {
    pub fn insert(&mut self, a: Advisory) {
        self.inner.insert((a.entity, a.quantity, a.kind), a.value);
    }

    pub fn contains(&self, entity: Entity, quantity: Quantity, kind: AdvisoryKind) -> bool {
        self.inner.contains_key(&(entity, quantity, kind))
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = Advisory> + '_ {
        self.inner
            .iter()
            .map(|(&(entity, quantity, kind), &value)| Advisory {
                entity,
                quantity,
                kind,
                value,
            })
    }

    pub fn raised_since<'a>(
        &'a self,
        previous: &'a AdvisorySet,
    ) -> impl Iterator<Item = Advisory> + 'a {
        self.iter()
            .filter(move |a| !previous.contains(a.entity, a.quantity, a.kind))
    }
}

/// Result of one evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct SafetyReport {
    pub faults: FaultSet,
    pub advisories: AdvisorySet,
    /// Allowed current in amperes; 0 while any fault is active.
    pub current_limit: f32,
    /// `|pack_u - corr * sum(cells)|` when it could be computed.
    pub divergence: Option<f32>,
}

/// Evaluates snapshots against the configured envelopes.
///
/// Stateless apart from the cross-check's consecutive-divergence counter.
#[derive(Debug)]
pub struct SafetyEngine {
    cfg: PackCfg,
    diverging_for: u32,
}

impl SafetyEngine {
    pub fn new(cfg: PackCfg) -> Self {
        Self {
            cfg,
            diverging_for: 0,
        }
    }

    pub fn config(&self) -> &PackCfg {
        &self.cfg
    }

    pub fn evaluate(&mut self, snap: &Snapshot) -> SafetyReport {
        let mut faults = FaultSet::new();
        let mut advisories = AdvisorySet::default();
        let mut factor = 1.0_f32;

        let mut check = |entity: Entity, quantity: Quantity, limit: &Limit, reading: Reading| {
            if !limit.is_monitored() {
                return;
            }
            let v = match reading {
                Reading::Fresh(v) => v,
                Reading::Stale(v) => {
                    faults.insert(entity, FaultKind::ChannelStale, Some(v));
                    factor = 0.0;
                    return;
                }
                Reading::NoData => {
                    faults.insert(entity, FaultKind::ChannelStale, None);
                    factor = 0.0;
                    return;
                }
            };
            if limit.max.is_some_and(|max| v > max) {
                faults.insert(entity, FaultKind::for_excursion(quantity, true), Some(v));
            }
            if limit.min.is_some_and(|min| v < min) {
                faults.insert(entity, FaultKind::for_excursion(quantity, false), Some(v));
            }
            if limit.ext.max.is_some_and(|m| v > m) {
                advisories.insert(Advisory {
                    entity,
                    quantity,
                    kind: AdvisoryKind::High,
                    value: v,
                });
            }
            if limit.ext.min.is_some_and(|m| v < m) {
                advisories.insert(Advisory {
                    entity,
                    quantity,
                    kind: AdvisoryKind::Low,
                    value: v,
                });
            }
            factor = factor.min(derate_factor(v, limit));
        };

        check(Entity::Pack, Quantity::Voltage, &self.cfg.u.limit, snap.pack_u);
        check(Entity::Pack, Quantity::Current, &self.cfg.i.limit, snap.pack_i);
        for (cell_cfg, cell) in self.cfg.cells.iter().zip(&snap.cells) {
            let entity = Entity::Cell(cell.index);
            check(entity, Quantity::Voltage, &cell_cfg.u.limit, cell.u);
            check(entity, Quantity::Temperature, &cell_cfg.temp.limit, cell.temp);
        }

        let divergence = self.cross_check(snap);
        if let Some(delta) = divergence
            && self.diverging_for >= self.cfg.cross.cycles
        {
            advisories.insert(Advisory {
                entity: Entity::Pack,
                quantity: Quantity::Voltage,
                kind: AdvisoryKind::Divergence,
                value: delta,
            });
        }

        let current_limit = if faults.is_empty() {
            self.cfg.max_current() * factor
        } else {
            0.0
        };

        SafetyReport {
            faults,
            advisories,
            current_limit,
            divergence,
        }
    }

    /// Updates the divergence counter; skipped unless every voltage is fresh.
    fn cross_check(&mut self, snap: &Snapshot) -> Option<f32> {
        let pack_u = snap.pack_u.fresh()?;
        let mut sum = 0.0_f32;
        for c in &snap.cells {
            sum += c.u.fresh()?;
        }
        let delta = (pack_u - sum * self.cfg.cross.corr).abs();
        if delta > self.cfg.cross.tolerance_v {
            self.diverging_for = self.diverging_for.saturating_add(1);
            if self.diverging_for == self.cfg.cross.cycles {
                tracing::warn!(pack_u, cell_sum = sum, delta, "pack voltage diverges from cell sum");
            }
        } else {
            self.diverging_for = 0;
        }
        Some(delta)
    }
}
