//! Maps `Box<dyn Error>` from trait boundaries to typed `BmsError`.
//!
//! The traits in `bms_traits` use `Box<dyn Error + Send + Sync>` so any device
//! link can plug in; this module converts those to our typed error enum, with
//! an optional feature-gated path for `bms_hardware::HwError` downcasting.

use crate::error::BmsError;

/// Map a sensor-read error to a typed `BmsError`.
///
/// Attempts to downcast known hardware error types first, then falls back
/// to the error's display text.
pub fn map_sensor_error(e: &(dyn std::error::Error + 'static)) -> BmsError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(hw) = e.downcast_ref::<bms_hardware::error::HwError>() {
            return match hw {
                bms_hardware::error::HwError::Timeout(ch) => {
                    BmsError::SensorUnavailable(format!("timeout on {ch}"))
                }
                other => BmsError::SensorUnavailable(other.to_string()),
            };
        }
    }
    if let Some(be) = e.downcast_ref::<BmsError>() {
        return be.clone();
    }
    BmsError::SensorUnavailable(e.to_string())
}

/// Map a relay/balance output error to a typed `BmsError`.
pub fn map_output_error(e: &(dyn std::error::Error + 'static)) -> BmsError {
    #[cfg(feature = "hardware-errors")]
    {
        if let Some(bms_hardware::error::HwError::Io(io)) =
            e.downcast_ref::<bms_hardware::error::HwError>()
        {
            return BmsError::Io(io.to_string());
        }
    }
    BmsError::Relay(e.to_string())
}
