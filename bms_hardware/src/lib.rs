pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;

use bms_traits::{BalanceOutput, ChannelId, RelayOutput, RelayPosition, SensorLink};
use error::HwError;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct SimChannels {
    raw: HashMap<ChannelId, i32>,
    failing: HashMap<ChannelId, bool>,
    link_down: bool,
    reads: u64,
}

/// Simulated device link. Clones share the same channel table, so one clone
/// can be handed to each poll cadence while a test drives the values.
#[derive(Debug, Clone, Default)]
pub struct SimulatedSensor {
    inner: Arc<Mutex<SimChannels>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl SimulatedSensor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the raw count returned for `channel`.
    pub fn set_raw(&self, channel: ChannelId, raw: i32) {
        lock(&self.inner).raw.insert(channel, raw);
    }

    /// Make reads of `channel` fail (or succeed again).
    pub fn set_failing(&self, channel: ChannelId, failing: bool) {
        lock(&self.inner).failing.insert(channel, failing);
    }

    /// Make every read fail, as if the serial link dropped.
    pub fn set_link_down(&self, down: bool) {
        lock(&self.inner).link_down = down;
    }

    /// Total read attempts across all clones.
    pub fn reads(&self) -> u64 {
        lock(&self.inner).reads
    }
}

impl SensorLink for SimulatedSensor {
    fn read(
        &mut self,
        channel: ChannelId,
    ) -> Result<i32, Box<dyn std::error::Error + Send + Sync>> {
        let mut st = lock(&self.inner);
        st.reads = st.reads.saturating_add(1);
        if st.link_down {
            return Err(Box::new(HwError::LinkDown));
        }
        if st.failing.get(&channel).copied().unwrap_or(false) {
            return Err(Box::new(HwError::Timeout(channel)));
        }
        match st.raw.get(&channel) {
            Some(v) => {
                tracing::trace!(%channel, raw = *v, "sim read");
                Ok(*v)
            }
            None => Err(Box::new(HwError::NoSuchChannel(channel))),
        }
    }
}

#[derive(Debug, Default)]
struct SimRelayState {
    position: Option<RelayPosition>,
    commands: Vec<RelayPosition>,
    fail_next: u32,
}

/// Simulated contactor that records every command it receives.
#[derive(Debug, Clone, Default)]
pub struct SimulatedRelay {
    inner: Arc<Mutex<SimRelayState>>,
}

impl SimulatedRelay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last position successfully applied, `None` before the first command.
    pub fn position(&self) -> Option<RelayPosition> {
        lock(&self.inner).position
    }

    /// Every successfully applied command, oldest first.
    pub fn commands(&self) -> Vec<RelayPosition> {
        lock(&self.inner).commands.clone()
    }

    /// Fail the next `n` commands.
    pub fn fail_next(&self, n: u32) {
        lock(&self.inner).fail_next = n;
    }
}

impl RelayOutput for SimulatedRelay {
    fn set(
        &mut self,
        position: RelayPosition,
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut st = lock(&self.inner);
        if st.fail_next > 0 {
            st.fail_next -= 1;
            return Err(Box::new(HwError::Gpio("simulated relay fault".into())));
        }
        st.position = Some(position);
        st.commands.push(position);
        tracing::debug!(%position, "relay (simulated)");
        Ok(())
    }
}

/// Simulated bleed-resistor bank.
#[derive(Debug, Clone, Default)]
pub struct SimulatedBalancer {
    active: Arc<Mutex<Vec<u16>>>,
}

impl SimulatedBalancer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cells currently bleeding.
    pub fn active(&self) -> Vec<u16> {
        lock(&self.active).clone()
    }
}

impl BalanceOutput for SimulatedBalancer {
    fn set_balancing(
        &mut self,
        cells: &[u16],
    ) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let mut active = lock(&self.active);
        active.clear();
        active.extend_from_slice(cells);
        Ok(())
    }
}
