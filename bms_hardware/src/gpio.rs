//! Contactor driver on a Raspberry Pi GPIO output.

use bms_traits::{BalanceOutput, RelayOutput, RelayPosition};
use rppal::gpio::{Gpio, OutputPin};
use tracing::{debug, info};

use crate::error::{HwError, Result};

pub struct GpioRelay {
    pin: OutputPin,
    active_high: bool,
}

impl GpioRelay {
    /// Claim `pin` as an output and drive it to the open level immediately.
    pub fn new(pin: u8, active_high: bool) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let out = gpio
            .get(pin)
            .map_err(|e| HwError::Gpio(format!("relay pin {pin}: {e}")))?
            .into_output();
        let mut relay = Self {
            pin: out,
            active_high,
        };
        relay.drive(RelayPosition::Open);
        info!(pin, active_high, "relay output claimed (open)");
        Ok(relay)
    }

    fn drive(&mut self, position: RelayPosition) {
        let high = matches!(position, RelayPosition::Closed) == self.active_high;
        if high {
            self.pin.set_high();
        } else {
            self.pin.set_low();
        }
        debug!(%position, high, "relay pin driven");
    }
}

impl RelayOutput for GpioRelay {
    fn set(
        &mut self,
        position: RelayPosition,
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.drive(position);
        Ok(())
    }
}

impl Drop for GpioRelay {
    fn drop(&mut self) {
        // Never leave the contactor closed without a live controller.
        self.drive(RelayPosition::Open);
    }
}

/// Bleed resistors switched by one GPIO output per cell.
pub struct GpioBalancer {
    /// `pins[k]` drives cell `k + 1`.
    pins: Vec<OutputPin>,
}

impl GpioBalancer {
    /// Claim one output per cell, all off.
    pub fn new(pins: &[u8]) -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(e.to_string()))?;
        let mut out = Vec::with_capacity(pins.len());
        for &pin in pins {
            let mut p = gpio
                .get(pin)
                .map_err(|e| HwError::Gpio(format!("balance pin {pin}: {e}")))?
                .into_output();
            p.set_low();
            out.push(p);
        }
        info!(cells = out.len(), "balance outputs claimed (off)");
        Ok(Self { pins: out })
    }
}

impl BalanceOutput for GpioBalancer {
    fn set_balancing(
        &mut self,
        cells: &[u16],
    ) -> std::result::Result<(), Box<dyn std::error::Error + Send + Sync>> {
        if let Some(bad) = cells
            .iter()
            .find(|&&c| c == 0 || usize::from(c) > self.pins.len())
        {
            return Err(Box::new(HwError::Gpio(format!("no balance output for cell {bad}"))));
        }
        for (k, pin) in self.pins.iter_mut().enumerate() {
            if cells.contains(&(k as u16 + 1)) {
                pin.set_high();
            } else {
                pin.set_low();
            }
        }
        debug!(?cells, "balance outputs driven");
        Ok(())
    }
}

impl Drop for GpioBalancer {
    fn drop(&mut self) {
        for pin in &mut self.pins {
            pin.set_low();
        }
    }
}
