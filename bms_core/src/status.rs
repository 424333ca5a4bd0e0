//! Per-tick outcome and the queryable controller summary.

use crate::limits::{Advisory, Fault};
use crate::relay::{RelayStatus, Transition};

/// What one controller tick observed and did.
#[derive(Debug, Clone, PartialEq)]
pub struct TickOutcome {
    pub faults: Vec<Fault>,
    pub advisories: Vec<Advisory>,
    /// Allowed current in amperes.
    pub current_limit: f32,
    pub transitions: Vec<Transition>,
    /// Cells bleeding after this tick, ascending.
    pub balancing: Vec<u16>,
    pub keepalive_expired: bool,
}

impl TickOutcome {
    pub fn is_healthy(&self) -> bool {
        self.faults.is_empty() && !self.keepalive_expired
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerStatus {
    pub relay: RelayStatus,
    pub faults: Vec<Fault>,
    pub current_limit: f32,
    pub balancing: Vec<u16>,
    pub lockout: bool,
    pub keepalive_deadline_ms: Option<u64>,
    /// `None` when the keep-alive is disabled.
    pub keepalive_remaining_ms: Option<u64>,
    pub state_of_charge: f32,
    pub work_ws: f64,
}
