use mixbot_hardware::Gain;

/// Linear model from raw counts to weight units.
/// weight = ratio * (raw - offset)
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    /// Tare baseline in raw counts
    pub offset: f64,
    /// Weight units per raw count
    pub ratio: f64,
    /// Channel and gain the cell driver selects
    pub gain: Gain,
}

impl Calibration {
    #[inline]
    pub fn convert(&self, raw: f64) -> f64 {
        self.ratio * (raw - self.offset)
    }
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            offset: 0.0,
            ratio: 1.0,
            gain: Gain::A128,
        }
    }
}
