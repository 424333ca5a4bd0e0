#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas and per-cell calibration parsing for the battery controller.
//!
//! - `Config` and sub-structs are deserialized from TOML and validated once
//!   at startup. Unset fields inherit pack- or cell-class defaults.
//! - The cell calibration CSV loader enforces headers and rejects duplicate
//!   or out-of-range cell indices.
use serde::Deserialize;
use std::collections::BTreeSet;

/// Upper bound on the nominal cell count accepted by validation.
pub const MAX_CELLS: u16 = 256;

/// Per-cell calibration CSV schema.
///
/// Expected headers:
/// cell,scale,offset
///
/// Example:
/// cell,scale,offset
/// 1,0.001,0.0
/// 2,0.00102,-0.004
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
pub struct CellCalibrationRow {
    pub cell: u16,
    pub scale: f32,
    pub offset: f32,
}

/// A `{min, max}` pair; either side may be absent.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq)]
pub struct Band {
    pub min: Option<f32>,
    pub max: Option<f32>,
}

/// Limits and acquisition parameters for one measured quantity.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq)]
#[serde(default)]
pub struct QuantityCfg {
    /// Hard lower bound; below it the entity faults.
    pub min: Option<f32>,
    /// Hard upper bound; above it the entity faults. For `[i]` this is also
    /// the nominal maximum current.
    pub max: Option<f32>,
    /// Advisory band, reported but never faults.
    pub ext: Option<Band>,
    /// Degradation band used to taper the allowed current.
    pub lim: Option<Band>,
    /// Raw-to-physical multiplier.
    pub scale: Option<f32>,
    /// Raw-to-physical additive offset.
    pub offset: Option<f32>,
    /// Smoothing sample count (larger = slower, quieter).
    pub samples: Option<u32>,
    /// Explicit smoothing weight in per-mille; overrides `samples`.
    pub decay: Option<u32>,
}

impl QuantityCfg {
    /// Fill unset fields from `defaults`.
    pub fn or(&self, defaults: &Self) -> Self {
        Self {
            min: self.min.or(defaults.min),
            max: self.max.or(defaults.max),
            ext: self.ext.or(defaults.ext),
            lim: self.lim.or(defaults.lim),
            scale: self.scale.or(defaults.scale),
            offset: self.offset.or(defaults.offset),
            samples: self.samples.or(defaults.samples),
            decay: self.decay.or(defaults.decay),
        }
    }
}

/// Pack voltage: quantity limits plus the cell-sum cross-check.
#[derive(Debug, Deserialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct PackVoltageCfg {
    #[serde(flatten)]
    pub q: QuantityCfg,
    /// Correction factor applied to the sum of cell voltages.
    pub corr: f32,
    /// Allowed |pack - corr*sum(cells)| before a divergence is counted (volts).
    pub corr_tol: f32,
    /// Consecutive diverging evaluations before it is reported.
    pub corr_cycles: u32,
}

impl Default for PackVoltageCfg {
    fn default() -> Self {
        Self {
            q: QuantityCfg::default(),
            corr: 1.0,
            corr_tol: 0.5,
            corr_cycles: 3,
        }
    }
}

/// Poll periods in seconds.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Periods {
    pub voltage: f32,
    pub cellvoltage: f32,
    pub celltemperature: f32,
}

impl Default for Periods {
    fn default() -> Self {
        Self {
            voltage: 1.0,
            cellvoltage: 2.0,
            celltemperature: 10.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Poll {
    /// Readings per cadence cycle.
    pub n: u32,
    /// Delay between readings (ms).
    pub t: u64,
    /// Settle delay after a cycle (ms).
    pub d: u64,
    /// Keep-alive timeout (ms); 0 disables the keep-alive.
    pub k: u64,
    /// Consecutive failed cycles before a channel is stale.
    pub stale: u32,
}

impl Default for Poll {
    fn default() -> Self {
        Self {
            n: 1,
            t: 0,
            d: 0,
            k: 0,
            stale: 3,
        }
    }
}

/// Cell-class defaults.
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CellClass {
    pub u: QuantityCfg,
    pub temp: QuantityCfg,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct BalanceCfg {
    /// Minimum cell voltage to allow balancing.
    pub min: f32,
    /// Required delta above the lowest cell (volts).
    pub d: f32,
    /// Max concurrently balancing cells; 0 means unlimited.
    pub n: u16,
    /// Fraction of the low-to-high band below which balancing does not start.
    pub r: f32,
    /// GPIO output per cell (`pins[k]` bleeds cell `k + 1`); empty means simulated.
    pub pins: Vec<u8>,
}

impl Default for BalanceCfg {
    fn default() -> Self {
        Self {
            min: 0.0,
            d: 0.01,
            n: 0,
            r: 0.0,
            pins: Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct RelayCfg {
    /// GPIO output pin for the contactor driver.
    pub pin: Option<u8>,
    /// Drive level for "closed"; false inverts the output.
    pub active_high: bool,
    /// Re-engage hold-off after a fault cleared (ms).
    pub t: u64,
    /// Hold-off before the first engagement after start (ms).
    pub t1: u64,
    /// Minimum closed time before a non-safety open (ms).
    pub t_on: u64,
    /// Minimum open time before closing again (ms).
    pub t_off: u64,
    /// Controller tick period (ms).
    pub tick_ms: u64,
}

impl Default for RelayCfg {
    fn default() -> Self {
        Self {
            pin: None,
            active_high: true,
            t: 10_000,
            t1: 2_000,
            t_on: 0,
            t_off: 0,
            tick_ms: 100,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PackCfg {
    /// Nominal cell count.
    pub n: u16,
    /// Capacity in ampere-hours.
    pub ah: f32,
    /// Internal resistance (ohms), used to derate delivered work.
    pub r: f32,
}

impl Default for PackCfg {
    fn default() -> Self {
        Self {
            n: 1,
            ah: 100.0,
            r: 0.0,
        }
    }
}

/// Sparse per-cell overrides, addressed by 1-based cell index.
#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct CellOverride {
    pub index: u16,
    pub u: Option<QuantityCfg>,
    pub temp: Option<QuantityCfg>,
    pub scale: Option<f32>,
    pub offset: Option<f32>,
    /// Set to false to never balance this cell.
    pub balance: Option<bool>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct KeepAliveCfg {
    /// File holding the persisted keep-alive deadline.
    pub path: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
    /// Event stream output (JSON lines); stdout when absent.
    pub events: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub t: Periods,
    #[serde(default)]
    pub poll: Poll,
    #[serde(default)]
    pub pack: PackCfg,
    #[serde(default)]
    pub u: PackVoltageCfg,
    #[serde(default)]
    pub i: QuantityCfg,
    #[serde(default)]
    pub cell: CellClass,
    #[serde(default)]
    pub balance: BalanceCfg,
    #[serde(default)]
    pub relay: RelayCfg,
    #[serde(default)]
    pub cells: Vec<CellOverride>,
    #[serde(default)]
    pub keepalive: KeepAliveCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

impl Config {
    /// Resolved override for cell `index`, if one is configured.
    pub fn cell_override(&self, index: u16) -> Option<&CellOverride> {
        self.cells.iter().find(|c| c.index == index)
    }

    /// Apply per-cell calibration rows on top of the `[[cells]]` overrides.
    pub fn apply_cell_calibration(&mut self, rows: &[CellCalibrationRow]) {
        for row in rows {
            match self.cells.iter_mut().find(|c| c.index == row.cell) {
                Some(c) => {
                    c.scale = Some(row.scale);
                    c.offset = Some(row.offset);
                }
                None => self.cells.push(CellOverride {
                    index: row.cell,
                    scale: Some(row.scale),
                    offset: Some(row.offset),
                    ..CellOverride::default()
                }),
            }
        }
    }

    pub fn validate(&self) -> eyre::Result<()> {
        // Periods
        for (name, v) in [
            ("t.voltage", self.t.voltage),
            ("t.cellvoltage", self.t.cellvoltage),
            ("t.celltemperature", self.t.celltemperature),
        ] {
            if !(v.is_finite() && v > 0.0) {
                eyre::bail!("{name} must be > 0");
            }
        }

        // Poll
        if self.poll.n == 0 {
            eyre::bail!("poll.n must be >= 1");
        }
        if self.poll.stale == 0 {
            eyre::bail!("poll.stale must be >= 1");
        }
        if self.poll.k > 24 * 60 * 60 * 1000 {
            eyre::bail!("poll.k is unreasonably large (>24h)");
        }

        // Pack
        if self.pack.n == 0 || self.pack.n > MAX_CELLS {
            eyre::bail!("pack.n must be in [1, {MAX_CELLS}]");
        }
        if !(self.pack.ah.is_finite() && self.pack.ah > 0.0) {
            eyre::bail!("pack.ah must be > 0");
        }
        if !(self.pack.r.is_finite() && self.pack.r >= 0.0) {
            eyre::bail!("pack.r must be >= 0");
        }

        // Quantities
        validate_quantity("u", &self.u.q)?;
        validate_quantity("i", &self.i)?;
        validate_quantity("cell.u", &self.cell.u)?;
        validate_quantity("cell.temp", &self.cell.temp)?;
        match self.i.max {
            Some(m) if m > 0.0 => {}
            _ => eyre::bail!("i.max must be set and > 0 (nominal maximum current)"),
        }
        if !(self.u.corr.is_finite() && self.u.corr > 0.0) {
            eyre::bail!("u.corr must be > 0");
        }
        if !(self.u.corr_tol.is_finite() && self.u.corr_tol >= 0.0) {
            eyre::bail!("u.corr_tol must be >= 0");
        }
        if self.u.corr_cycles == 0 {
            eyre::bail!("u.corr_cycles must be >= 1");
        }

        // Balance
        if !(self.balance.d.is_finite() && self.balance.d >= 0.0) {
            eyre::bail!("balance.d must be >= 0");
        }
        if !(0.0..=1.0).contains(&self.balance.r) {
            eyre::bail!("balance.r must be in [0.0, 1.0]");
        }
        if !self.balance.min.is_finite() {
            eyre::bail!("balance.min must be finite");
        }
        if !self.balance.pins.is_empty() && self.balance.pins.len() != usize::from(self.pack.n) {
            eyre::bail!("balance.pins must list one pin per cell ({})", self.pack.n);
        }

        // Relay
        if self.relay.tick_ms == 0 {
            eyre::bail!("relay.tick_ms must be >= 1");
        }
        if self.poll.k > 0 && self.poll.k < self.relay.tick_ms {
            eyre::bail!("poll.k must be >= relay.tick_ms");
        }

        // Cell overrides
        let mut seen = BTreeSet::new();
        for c in &self.cells {
            if c.index == 0 || c.index > self.pack.n {
                eyre::bail!("cells.index {} out of range [1, {}]", c.index, self.pack.n);
            }
            if !seen.insert(c.index) {
                eyre::bail!("cells.index {} configured twice", c.index);
            }
            if let Some(u) = &c.u {
                validate_quantity(&format!("cells[{}].u", c.index), &u.or(&self.cell.u))?;
            }
            if let Some(t) = &c.temp {
                validate_quantity(&format!("cells[{}].temp", c.index), &t.or(&self.cell.temp))?;
            }
            if let Some(s) = c.scale
                && !(s.is_finite() && s != 0.0)
            {
                eyre::bail!("cells[{}].scale must be finite and non-zero", c.index);
            }
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never|daily|hourly");
        }

        Ok(())
    }
}

fn validate_quantity(name: &str, q: &QuantityCfg) -> eyre::Result<()> {
    let finite = |v: Option<f32>| v.is_none_or(f32::is_finite);
    if !(finite(q.min) && finite(q.max)) {
        eyre::bail!("{name}.min/max must be finite");
    }
    if let (Some(lo), Some(hi)) = (q.min, q.max)
        && lo >= hi
    {
        eyre::bail!("{name}.min must be < {name}.max");
    }
    for (band_name, band) in [("lim", q.lim), ("ext", q.ext)] {
        let Some(b) = band else { continue };
        if !(finite(b.min) && finite(b.max)) {
            eyre::bail!("{name}.{band_name} must be finite");
        }
        if let Some(bmax) = b.max {
            if q.max.is_some_and(|hi| bmax >= hi) {
                eyre::bail!("{name}.{band_name}.max must be < {name}.max");
            }
            if q.min.is_some_and(|lo| bmax <= lo) {
                eyre::bail!("{name}.{band_name}.max must be > {name}.min");
            }
        }
        if let Some(bmin) = b.min {
            if q.min.is_some_and(|lo| bmin <= lo) {
                eyre::bail!("{name}.{band_name}.min must be > {name}.min");
            }
            if q.max.is_some_and(|hi| bmin >= hi) {
                eyre::bail!("{name}.{band_name}.min must be < {name}.max");
            }
        }
        if let (Some(bmin), Some(bmax)) = (b.min, b.max)
            && bmin > bmax
        {
            eyre::bail!("{name}.{band_name}.min must be <= {name}.{band_name}.max");
        }
    }
    if let Some(s) = q.scale
        && !(s.is_finite() && s != 0.0)
    {
        eyre::bail!("{name}.scale must be finite and non-zero");
    }
    if !finite(q.offset) {
        eyre::bail!("{name}.offset must be finite");
    }
    if q.samples == Some(0) {
        eyre::bail!("{name}.samples must be >= 1");
    }
    if let Some(d) = q.decay
        && !(1..=1000).contains(&d)
    {
        eyre::bail!("{name}.decay must be in [1, 1000]");
    }
    Ok(())
}

pub fn load_cell_calibration_csv(path: &std::path::Path) -> eyre::Result<Vec<CellCalibrationRow>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::All)
        .from_path(path)
        .map_err(|e| eyre::eyre!("open cell calibration CSV {:?}: {}", path, e))?;

    // Enforce exact headers
    let headers = rdr
        .headers()
        .map_err(|e| eyre::eyre!("read CSV headers {:?}: {}", path, e))?
        .clone();
    let expected = ["cell", "scale", "offset"];
    let actual: Vec<String> = headers.iter().map(|s| s.to_string()).collect();
    if actual != expected {
        eyre::bail!(
            "cell calibration CSV must have headers 'cell,scale,offset', got: {}",
            actual.join(",")
        );
    }

    let mut rows = Vec::new();
    let mut seen = BTreeSet::new();
    for (idx, rec) in rdr.deserialize::<CellCalibrationRow>().enumerate() {
        let row = rec.map_err(|e| eyre::eyre!("invalid CSV row {}: {}", idx + 2, e))?;
        if row.cell == 0 {
            eyre::bail!("invalid CSV row {}: cell index is 1-based", idx + 2);
        }
        if !(row.scale.is_finite() && row.scale != 0.0) {
            eyre::bail!("invalid CSV row {}: scale must be finite and non-zero", idx + 2);
        }
        if !row.offset.is_finite() {
            eyre::bail!("invalid CSV row {}: offset must be finite", idx + 2);
        }
        if !seen.insert(row.cell) {
            eyre::bail!("cell {} appears twice in calibration CSV", row.cell);
        }
        rows.push(row);
    }
    if rows.is_empty() {
        eyre::bail!("cell calibration CSV has no rows");
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantity_or_fills_only_unset_fields() {
        let class = QuantityCfg {
            min: Some(2.8),
            max: Some(3.65),
            samples: Some(4),
            ..QuantityCfg::default()
        };
        let cell = QuantityCfg {
            max: Some(3.6),
            ..QuantityCfg::default()
        };
        let merged = cell.or(&class);
        assert_eq!(merged.min, Some(2.8));
        assert_eq!(merged.max, Some(3.6));
        assert_eq!(merged.samples, Some(4));
    }

    #[test]
    fn lim_band_must_sit_inside_hard_band() {
        let q = QuantityCfg {
            min: Some(40.0),
            max: Some(58.0),
            lim: Some(Band {
                min: None,
                max: Some(58.5),
            }),
            ..QuantityCfg::default()
        };
        let err = validate_quantity("u", &q).expect_err("lim.max above max");
        assert!(err.to_string().contains("u.lim.max must be < u.max"));
    }
}
