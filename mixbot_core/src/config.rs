//! Runtime configuration snapshot handed to the controller and its workers.
//!
//! Built from `mixbot_config::Config` (see `conversions`); immutable once a
//! worker has started.

use std::time::Duration;

use crate::calibration::Calibration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PinMap {
    pub hx711_dt: u8,
    pub hx711_sck: u8,
    /// GPIO per pump; index is the pump id (= dispenser number)
    pub pumps: Vec<u8>,
    pub start_button: Option<u8>,
    pub interrupt_button: Option<u8>,
    pub indicator: Option<u8>,
}

impl Default for PinMap {
    fn default() -> Self {
        Self {
            hx711_dt: 5,
            hx711_sck: 6,
            pumps: vec![17, 27, 22, 23, 24, 25],
            start_button: None,
            interrupt_button: None,
            indicator: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeightSettings {
    pub queue_len: usize,
    pub sample_delay: Duration,
    pub min_detection: f64,
    pub max_measurable: f64,
    pub tare_samples: usize,
    pub tare_duration: Duration,
    pub ready_polls: u32,
}

impl Default for WeightSettings {
    fn default() -> Self {
        Self {
            queue_len: 10,
            sample_delay: Duration::from_millis(20),
            min_detection: 1.0,
            max_measurable: 5000.0,
            tare_samples: 10,
            tare_duration: Duration::from_secs(1),
            ready_polls: 50,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ServingSettings {
    pub glass_detection_value: f64,
    pub glass_detection_timeout: Duration,
    pub delay_before_serving: Duration,
    pub delay_between_servings: Duration,
    pub serving_timeout: Duration,
    pub mark_empty_on_timeout: bool,
    pub ignore_missing_glass: bool,
    pub start_with_button: bool,
    /// Gain under which a timed-out pour means the dispenser is empty
    pub empty_threshold: f64,
}

impl Default for ServingSettings {
    fn default() -> Self {
        Self {
            glass_detection_value: 10.0,
            glass_detection_timeout: Duration::from_secs(10),
            delay_before_serving: Duration::from_secs(2),
            delay_between_servings: Duration::from_secs(1),
            serving_timeout: Duration::from_secs(10),
            mark_empty_on_timeout: true,
            ignore_missing_glass: false,
            start_with_button: false,
            empty_threshold: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ButtonSettings {
    pub active_low: bool,
    pub bounce: Duration,
    pub hold: Duration,
    pub poll: Duration,
}

impl Default for ButtonSettings {
    fn default() -> Self {
        Self {
            active_low: true,
            bounce: Duration::from_millis(50),
            hold: Duration::from_secs(2),
            poll: Duration::from_millis(10),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorSettings {
    pub blink_on: Duration,
    pub blink_off: Duration,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            blink_on: Duration::from_millis(500),
            blink_off: Duration::from_millis(500),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleaningSettings {
    pub drain_delta: f64,
    pub timeout: Duration,
}

impl Default for CleaningSettings {
    fn default() -> Self {
        Self {
            drain_delta: 50.0,
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ArtistConfig {
    pub pins: PinMap,
    pub weight: WeightSettings,
    pub calibration: Calibration,
    pub serving: ServingSettings,
    /// At most one pump energized at a time
    pub single_pump_lock: bool,
    pub buttons: ButtonSettings,
    pub indicator: IndicatorSettings,
    pub cleaning: CleaningSettings,
}

impl Default for ArtistConfig {
    fn default() -> Self {
        Self {
            pins: PinMap::default(),
            weight: WeightSettings::default(),
            calibration: Calibration::default(),
            serving: ServingSettings::default(),
            single_pump_lock: true,
            buttons: ButtonSettings::default(),
            indicator: IndicatorSettings::default(),
            cleaning: CleaningSettings::default(),
        }
    }
}
