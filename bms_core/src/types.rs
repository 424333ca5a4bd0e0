//! Shared vocabulary: who a record is about, what was measured, what went wrong.

use std::fmt;

/// The thing an event or fault refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Entity {
    Pack,
    Cell(u16),
    Relay,
    Balancer,
    KeepAlive,
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Pack => f.write_str("pack"),
            Entity::Cell(n) => write!(f, "cell{n}"),
            Entity::Relay => f.write_str("relay"),
            Entity::Balancer => f.write_str("balancer"),
            Entity::KeepAlive => f.write_str("keepalive"),
        }
    }
}

/// Monitored physical quantity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Quantity {
    Voltage,
    Current,
    Temperature,
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Quantity::Voltage => f.write_str("u"),
            Quantity::Current => f.write_str("i"),
            Quantity::Temperature => f.write_str("temp"),
        }
    }
}

/// Hard-fault classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FaultKind {
    Undervoltage,
    Overvoltage,
    Overcurrent,
    Undertemperature,
    Overtemperature,
    ChannelStale,
}

impl FaultKind {
    /// Fault raised when `quantity` leaves its hard band on the given side.
    pub fn for_excursion(quantity: Quantity, high: bool) -> Self {
        match (quantity, high) {
            (Quantity::Voltage, false) => FaultKind::Undervoltage,
            (Quantity::Voltage, true) => FaultKind::Overvoltage,
            (Quantity::Current, _) => FaultKind::Overcurrent,
            (Quantity::Temperature, false) => FaultKind::Undertemperature,
            (Quantity::Temperature, true) => FaultKind::Overtemperature,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            FaultKind::Undervoltage => "Undervoltage",
            FaultKind::Overvoltage => "Overvoltage",
            FaultKind::Overcurrent => "Overcurrent",
            FaultKind::Undertemperature => "Undertemperature",
            FaultKind::Overtemperature => "Overtemperature",
            FaultKind::ChannelStale => "ChannelStale",
        }
    }
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Advisory (non-faulting) classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum AdvisoryKind {
    /// Below the `ext.min` pre-warning bound.
    Low,
    /// Above the `ext.max` pre-warning bound.
    High,
    /// Pack voltage persistently disagrees with the corrected cell sum.
    Divergence,
}

impl fmt::Display for AdvisoryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AdvisoryKind::Low => f.write_str("Low"),
            AdvisoryKind::High => f.write_str("High"),
            AdvisoryKind::Divergence => f.write_str("Divergence"),
        }
    }
}

/// Independent poll cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Cadence {
    /// Pack voltage and current.
    Pack,
    CellVoltage,
    CellTemperature,
}

impl Cadence {
    pub const ALL: [Cadence; 3] = [Cadence::Pack, Cadence::CellVoltage, Cadence::CellTemperature];

    pub(crate) fn slot(self) -> usize {
        match self {
            Cadence::Pack => 0,
            Cadence::CellVoltage => 1,
            Cadence::CellTemperature => 2,
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cadence::Pack => f.write_str("voltage"),
            Cadence::CellVoltage => f.write_str("cellvoltage"),
            Cadence::CellTemperature => f.write_str("celltemperature"),
        }
    }
}
