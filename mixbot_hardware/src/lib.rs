//! Hardware backends: the HX711 cell driver, simulated GPIO, and (with the
//! `hardware` feature on Linux) Raspberry Pi GPIO through rppal.

pub mod error;
#[cfg(all(feature = "hardware", target_os = "linux"))]
pub mod gpio;
pub mod hx711;
pub mod sim;
pub mod util;

pub use error::HwError;
pub use hx711::{Gain, Hx711, ReadMiss};
pub use sim::{PinEdge, SimLoadCell, SimPinFactory};
