//! Hardware seams shared by every crate in the workspace.
//!
//! Nothing here touches real hardware. Backends (simulated or GPIO) live in
//! `mixbot_hardware` and are selected once at startup through a [`PinFactory`].

pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock, SharedClock};

/// Error type used at trait boundaries so backends can surface their own errors.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A digital input line (sensor data line, push button).
pub trait InputPin: Send {
    fn is_high(&self) -> bool;

    fn is_low(&self) -> bool {
        !self.is_high()
    }
}

impl<P: InputPin + ?Sized> InputPin for Box<P> {
    fn is_high(&self) -> bool {
        (**self).is_high()
    }
}

/// A digital output line (sensor clock, pump driver, LED).
pub trait OutputPin: Send {
    fn set_high(&mut self);
    fn set_low(&mut self);

    fn write(&mut self, high: bool) {
        if high {
            self.set_high();
        } else {
            self.set_low();
        }
    }
}

impl<P: OutputPin + ?Sized> OutputPin for Box<P> {
    fn set_high(&mut self) {
        (**self).set_high();
    }

    fn set_low(&mut self) {
        (**self).set_low();
    }
}

/// Strategy that hands out pin handles. Chosen once at startup and injected
/// into every hardware-facing component.
///
/// Dropping a returned handle must release the underlying line so that a
/// later call for the same pin number succeeds.
pub trait PinFactory: Send + Sync {
    fn input(&self, pin: u8) -> Result<Box<dyn InputPin>, BoxError>;
    fn output(&self, pin: u8) -> Result<Box<dyn OutputPin>, BoxError>;
}

/// A source of raw load-cell samples.
///
/// `Ok(None)` is the routine "no sample this time" outcome (chip not ready,
/// timing violation, saturated value). `Err` is reserved for hard faults.
pub trait Scale: Send {
    fn read(&mut self) -> Result<Option<i32>, BoxError>;

    /// Wake the sensor before a fresh measurement series.
    fn power_up(&mut self) -> Result<(), BoxError> {
        Ok(())
    }

    fn power_down(&mut self) -> Result<(), BoxError> {
        Ok(())
    }
}

impl<S: Scale + ?Sized> Scale for Box<S> {
    fn read(&mut self) -> Result<Option<i32>, BoxError> {
        (**self).read()
    }

    fn power_up(&mut self) -> Result<(), BoxError> {
        (**self).power_up()
    }

    fn power_down(&mut self) -> Result<(), BoxError> {
        (**self).power_down()
    }
}
