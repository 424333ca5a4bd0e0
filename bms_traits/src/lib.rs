pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::fmt;

/// Physical measurement point addressed over the sensor link.
///
/// Cell indices are 1-based and stable for the controller's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ChannelId {
    PackVoltage,
    PackCurrent,
    CellVoltage(u16),
    CellTemperature(u16),
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelId::PackVoltage => f.write_str("pack.u"),
            ChannelId::PackCurrent => f.write_str("pack.i"),
            ChannelId::CellVoltage(n) => write!(f, "cell{n}.u"),
            ChannelId::CellTemperature(n) => write!(f, "cell{n}.temp"),
        }
    }
}

/// Contactor position as seen by the physical output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RelayPosition {
    Open,
    Closed,
}

impl fmt::Display for RelayPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayPosition::Open => f.write_str("open"),
            RelayPosition::Closed => f.write_str("closed"),
        }
    }
}

/// Raw sample source (device link). Reads may fail transiently.
pub trait SensorLink {
    fn read(&mut self, channel: ChannelId)
    -> Result<i32, Box<dyn std::error::Error + Send + Sync>>;
}

/// Main contactor output. Exactly one writer: the relay state machine.
pub trait RelayOutput {
    fn set(&mut self, position: RelayPosition)
    -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Bleed-resistor output. `cells` is the complete set that should bleed now;
/// every other cell must stop.
pub trait BalanceOutput {
    fn set_balancing(
        &mut self,
        cells: &[u16],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

impl<T: RelayOutput + ?Sized> RelayOutput for Box<T> {
    fn set(
        &mut self,
        position: RelayPosition,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set(position)
    }
}

impl<T: BalanceOutput + ?Sized> BalanceOutput for Box<T> {
    fn set_balancing(
        &mut self,
        cells: &[u16],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        (**self).set_balancing(cells)
    }
}

impl<T: SensorLink + ?Sized> SensorLink for &mut T {
    fn read(
        &mut self,
        channel: ChannelId,
    ) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
        (**self).read(channel)
    }
}
