//! Greedy per-cycle selection of cells to bleed.

use crate::config::BalanceCfg;

/// One cell as seen by the selector.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub index: u16,
    /// Fresh filtered voltage; `None` for stale or missing data.
    pub voltage: Option<f32>,
    /// Faulted or configured out of balancing.
    pub excluded: bool,
}

/// Select the cells to bleed this cycle, returned in ascending index order.
///
/// `v_low`/`v_high` span every cell with a fresh voltage. A cell qualifies
/// when it is at least `min`, at least `v_low + d`, and (with `r > 0`) sits at
/// or above fraction `r` of the low-to-high band. Qualifying cells are ranked
/// by descending voltage (ties by index) and cut to `n` unless `n == 0`.
pub fn select(candidates: &[Candidate], cfg: &BalanceCfg) -> Vec<u16> {
    let fresh = candidates.iter().filter_map(|c| c.voltage);
    let Some(v_low) = fresh.clone().reduce(f32::min) else {
        return Vec::new();
    };
    let v_high = fresh.fold(v_low, f32::max);
    let span = v_high - v_low;

    let mut ranked: Vec<(u16, f32)> = candidates
        .iter()
        .filter(|c| !c.excluded)
        .filter_map(|c| c.voltage.map(|v| (c.index, v)))
        .filter(|&(_, v)| v >= cfg.min && v >= v_low + cfg.d)
        .filter(|&(_, v)| cfg.r <= 0.0 || (span > 0.0 && (v - v_low) / span >= cfg.r))
        .collect();

    ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    if cfg.n > 0 {
        ranked.truncate(usize::from(cfg.n));
    }
    let mut cells: Vec<u16> = ranked.into_iter().map(|(i, _)| i).collect();
    cells.sort_unstable();
    cells
}
