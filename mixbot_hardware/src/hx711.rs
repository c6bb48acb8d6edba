//! Bit-banged HX711 load-cell ADC driver.
//!
//! The chip signals a finished conversion by pulling DOUT low. The host then
//! clocks 24 data bits out (MSB first) and adds 1 to 3 extra pulses that select
//! channel and gain for the *next* conversion. Holding PD_SCK high for 60 µs or
//! more powers the chip down, which corrupts a transfer in progress.

use std::time::Duration;

use mixbot_traits::{BoxError, Clock, InputPin, OutputPin, Scale};
use tracing::trace;

use crate::util::wait_until_low;

/// PD_SCK high for this long puts the chip into power-down mode.
pub const POWER_DOWN_THRESHOLD: Duration = Duration::from_micros(60);
/// Data-ready polls before a read gives up.
pub const DEFAULT_READY_POLLS: u32 = 50;
/// Spacing between data-ready polls.
pub const READY_POLL_INTERVAL: Duration = Duration::from_millis(10);
/// Settling time after a power-up or a channel/gain change.
pub const SETTLE_DELAY: Duration = Duration::from_millis(10);

const DATA_BITS: u32 = 24;
const MASK_24: u32 = 0x00FF_FFFF;
const SIGN_BIT: u32 = 0x0080_0000;
const SATURATED_HIGH: u32 = 0x007F_FFFF;
const SATURATED_LOW: u32 = 0x0080_0000;

/// Channel and gain pair selected for the next conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Gain {
    /// Channel A, gain 128.
    #[default]
    A128,
    /// Channel B, gain 32.
    B32,
    /// Channel A, gain 64.
    A64,
}

impl Gain {
    /// Extra clock pulses appended after the 24 data bits.
    pub fn pulses(self) -> u8 {
        match self {
            Gain::A128 => 1,
            Gain::B32 => 2,
            Gain::A64 => 3,
        }
    }

    pub fn from_channel_gain(channel: char, gain: u16) -> Option<Self> {
        match (channel.to_ascii_uppercase(), gain) {
            ('A', 128) => Some(Gain::A128),
            ('B', 32) => Some(Gain::B32),
            ('A', 64) => Some(Gain::A64),
            _ => None,
        }
    }

    pub fn channel(self) -> char {
        match self {
            Gain::A128 | Gain::A64 => 'A',
            Gain::B32 => 'B',
        }
    }

    pub fn gain(self) -> u16 {
        match self {
            Gain::A128 => 128,
            Gain::B32 => 32,
            Gain::A64 => 64,
        }
    }
}

/// Why a read produced no sample. All of these are routine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMiss {
    /// DOUT stayed high for every data-ready poll.
    NotReady,
    /// A clock pulse outlived the power-down threshold.
    PulseTooSlow,
    /// The chip reported one of its saturation codes.
    Saturated,
}

/// Decode a 24-bit two's-complement word, rejecting the saturation codes.
pub fn decode(raw: u32) -> Result<i32, ReadMiss> {
    let raw = raw & MASK_24;
    if raw == SATURATED_HIGH || raw == SATURATED_LOW {
        return Err(ReadMiss::Saturated);
    }
    if raw & SIGN_BIT != 0 {
        Ok(-(((raw ^ MASK_24) + 1) as i32))
    } else {
        Ok(raw as i32)
    }
}

pub struct Hx711<I, O, C> {
    dout: I,
    sck: O,
    clock: C,
    gain: Gain,
    ready_polls: u32,
}

impl<I: InputPin, O: OutputPin, C: Clock> Hx711<I, O, C> {
    pub fn new(dout: I, mut sck: O, gain: Gain, clock: C) -> Self {
        sck.set_low(); // clock idle low
        Self {
            dout,
            sck,
            clock,
            gain,
            ready_polls: DEFAULT_READY_POLLS,
        }
    }

    /// Override how many data-ready polls a read may spend.
    pub fn with_ready_polls(mut self, polls: u32) -> Self {
        self.ready_polls = polls.max(1);
        self
    }

    pub fn gain(&self) -> Gain {
        self.gain
    }

    /// Select a new channel/gain. The conversion already in flight was taken
    /// with the old setting, so one read is spent and discarded.
    pub fn set_gain(&mut self, gain: Gain) {
        self.gain = gain;
        let _ = self.read_raw();
        self.clock.sleep(SETTLE_DELAY);
    }

    /// Read one conversion.
    pub fn read_raw(&mut self) -> Result<i32, ReadMiss> {
        self.sck.set_low();

        let dout = &self.dout;
        wait_until_low(
            || dout.is_high(),
            self.ready_polls,
            READY_POLL_INTERVAL,
            &self.clock,
        )
        .map_err(|_| ReadMiss::NotReady)?;

        let mut data: u32 = 0;
        for _ in 0..DATA_BITS {
            if !self.pulse() {
                return Err(ReadMiss::PulseTooSlow);
            }
            data = (data << 1) | u32::from(self.dout.is_high());
        }

        for _ in 0..self.gain.pulses() {
            if !self.pulse() {
                return Err(ReadMiss::PulseTooSlow);
            }
        }

        let value = decode(data)?;
        trace!(raw = value, "hx711 raw read");
        Ok(value)
    }

    /// Hold the clock high long enough for the chip to power down.
    pub fn power_down(&mut self) {
        self.sck.set_low();
        self.sck.set_high();
        self.clock.sleep(SETTLE_DELAY);
    }

    /// Bring the chip back up; the first conversion after wake-up is discarded.
    pub fn power_up(&mut self) -> bool {
        self.sck.set_low();
        self.clock.sleep(SETTLE_DELAY);
        self.read_raw().is_ok()
    }

    /// One high-then-low clock pulse; false if it took long enough to power
    /// the chip down.
    #[inline]
    fn pulse(&mut self) -> bool {
        let start = self.clock.now();
        self.sck.set_high();
        self.sck.set_low();
        self.clock.elapsed_since(start) < POWER_DOWN_THRESHOLD
    }
}

impl<I: InputPin, O: OutputPin, C: Clock + Send> Scale for Hx711<I, O, C> {
    fn read(&mut self) -> Result<Option<i32>, BoxError> {
        match self.read_raw() {
            Ok(v) => Ok(Some(v)),
            Err(miss) => {
                trace!(?miss, "hx711 read missed");
                Ok(None)
            }
        }
    }

    fn power_up(&mut self) -> Result<(), BoxError> {
        if !Hx711::power_up(self) {
            trace!("hx711 first read after power-up missed");
        }
        Ok(())
    }

    fn power_down(&mut self) -> Result<(), BoxError> {
        Hx711::power_down(self);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rstest::rstest;

    #[rstest]
    #[case(0x000001, 1)]
    #[case(0xFFFFFF, -1)]
    #[case(0x800001, -8_388_607)]
    #[case(0x000000, 0)]
    #[case(0x7FFFFE, 8_388_606)]
    fn decodes_twos_complement(#[case] raw: u32, #[case] expected: i32) {
        assert_eq!(decode(raw), Ok(expected));
    }

    #[rstest]
    #[case(0x7FFFFF)]
    #[case(0x800000)]
    fn rejects_saturation_codes(#[case] raw: u32) {
        assert_eq!(decode(raw), Err(ReadMiss::Saturated));
    }

    #[test]
    fn gain_pulse_table() {
        assert_eq!(Gain::A128.pulses(), 1);
        assert_eq!(Gain::B32.pulses(), 2);
        assert_eq!(Gain::A64.pulses(), 3);
        assert_eq!(Gain::from_channel_gain('b', 32), Some(Gain::B32));
        assert_eq!(Gain::from_channel_gain('B', 128), None);
    }

    proptest! {
        #[test]
        fn decode_matches_sign_extension(raw in 0u32..=0xFF_FFFF) {
            prop_assume!(raw != SATURATED_HIGH && raw != SATURATED_LOW);
            let extended = ((raw << 8) as i32) >> 8;
            prop_assert_eq!(decode(raw), Ok(extended));
        }
    }
}
