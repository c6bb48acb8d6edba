//! Raspberry Pi GPIO backend (rppal).

use mixbot_traits::{BoxError, InputPin, OutputPin, PinFactory};
use rppal::gpio::Gpio;

use crate::error::{HwError, Result};

pub struct RppalPinFactory {
    gpio: Gpio,
}

impl RppalPinFactory {
    pub fn new() -> Result<Self> {
        let gpio = Gpio::new().map_err(|e| HwError::Gpio(format!("open gpio: {e}")))?;
        Ok(Self { gpio })
    }
}

impl PinFactory for RppalPinFactory {
    fn input(&self, pin: u8) -> std::result::Result<Box<dyn InputPin>, BoxError> {
        let p = self
            .gpio
            .get(pin)
            .map_err(|e| HwError::Gpio(format!("pin {pin}: {e}")))?
            .into_input();
        Ok(Box::new(RppalInput(p)))
    }

    fn output(&self, pin: u8) -> std::result::Result<Box<dyn OutputPin>, BoxError> {
        let p = self
            .gpio
            .get(pin)
            .map_err(|e| HwError::Gpio(format!("pin {pin}: {e}")))?
            .into_output_low();
        Ok(Box::new(RppalOutput(p)))
    }
}

struct RppalInput(rppal::gpio::InputPin);

impl InputPin for RppalInput {
    #[inline]
    fn is_high(&self) -> bool {
        self.0.is_high()
    }
}

// rppal resets the line to its original mode when the handle drops.
struct RppalOutput(rppal::gpio::OutputPin);

impl OutputPin for RppalOutput {
    #[inline]
    fn set_high(&mut self) {
        self.0.set_high();
    }

    #[inline]
    fn set_low(&mut self) {
        self.0.set_low();
    }
}
