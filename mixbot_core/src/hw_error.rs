//! Maps `Box<dyn Error>` from trait boundaries to typed `BarError`.
//!
//! The traits in `mixbot_traits` use `Box<dyn Error + Send + Sync>`; this
//! module converts those to our typed error enum, downcasting
//! `mixbot_hardware::HwError` when that is what the backend produced.

use mixbot_hardware::HwError;

use crate::error::BarError;

/// Map a trait-boundary error to a typed `BarError`.
pub fn map_hw_error(e: &(dyn std::error::Error + 'static)) -> BarError {
    if let Some(hw) = e.downcast_ref::<HwError>() {
        return match hw {
            HwError::DataReadyTimeout => BarError::Timeout,
            other => BarError::HardwareFault(other.to_string()),
        };
    }

    // Fallback: string-based detection
    let s = e.to_string();
    if s.to_lowercase().contains("timeout") {
        BarError::Timeout
    } else {
        BarError::Hardware(s)
    }
}
