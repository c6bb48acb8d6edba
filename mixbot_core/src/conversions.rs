//! `From` implementations bridging `mixbot_config` types to `mixbot_core` types.

use std::time::Duration;

use mixbot_hardware::Gain;

use crate::calibration::Calibration;
use crate::config::{
    ArtistConfig, ButtonSettings, CleaningSettings, IndicatorSettings, PinMap, ServingSettings,
    WeightSettings,
};
use crate::order::{Dispenser, Dose, Ingredient, Mix};

const fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

// ── Pins ─────────────────────────────────────────────────────────────────────

impl From<&mixbot_config::Pins> for PinMap {
    fn from(c: &mixbot_config::Pins) -> Self {
        Self {
            hx711_dt: c.hx711_dt,
            hx711_sck: c.hx711_sck,
            pumps: c.pumps.clone(),
            start_button: c.start_button,
            interrupt_button: c.interrupt_button,
            indicator: c.indicator,
        }
    }
}

// ── Weight ───────────────────────────────────────────────────────────────────

impl From<&mixbot_config::WeightCfg> for WeightSettings {
    fn from(c: &mixbot_config::WeightCfg) -> Self {
        Self {
            queue_len: c.queue_len,
            sample_delay: ms(c.sample_delay_ms),
            min_detection: c.min_detection,
            max_measurable: c.max_measurable,
            tare_samples: c.tare_samples,
            tare_duration: ms(c.tare_duration_ms),
            ready_polls: c.ready_polls,
        }
    }
}

// ── Calibration ──────────────────────────────────────────────────────────────

impl From<&mixbot_config::CalibrationCfg> for Calibration {
    fn from(c: &mixbot_config::CalibrationCfg) -> Self {
        Self {
            offset: c.offset,
            ratio: c.ratio,
            // validate() restricts the pair; anything else falls back to A/128
            gain: Gain::from_channel_gain(c.channel, c.gain).unwrap_or_default(),
        }
    }
}

impl From<&Calibration> for mixbot_config::CalibrationCfg {
    fn from(c: &Calibration) -> Self {
        Self {
            offset: c.offset,
            ratio: c.ratio,
            channel: c.gain.channel(),
            gain: c.gain.gain(),
        }
    }
}

// ── Buttons / indicator / cleaning ───────────────────────────────────────────

impl From<&mixbot_config::ButtonsCfg> for ButtonSettings {
    fn from(c: &mixbot_config::ButtonsCfg) -> Self {
        Self {
            active_low: c.active_low,
            bounce: ms(c.bounce_ms),
            hold: ms(c.hold_ms),
            poll: ms(c.poll_ms),
        }
    }
}

impl From<&mixbot_config::IndicatorCfg> for IndicatorSettings {
    fn from(c: &mixbot_config::IndicatorCfg) -> Self {
        Self {
            blink_on: ms(c.blink_on_ms),
            blink_off: ms(c.blink_off_ms),
        }
    }
}

impl From<&mixbot_config::CleaningCfg> for CleaningSettings {
    fn from(c: &mixbot_config::CleaningCfg) -> Self {
        Self {
            drain_delta: c.drain_delta,
            timeout: ms(c.timeout_ms),
        }
    }
}

// ── Whole config ─────────────────────────────────────────────────────────────

impl From<&mixbot_config::Config> for ArtistConfig {
    fn from(c: &mixbot_config::Config) -> Self {
        let s = &c.serving;
        Self {
            pins: (&c.pins).into(),
            weight: (&c.weight).into(),
            calibration: (&c.calibration).into(),
            serving: ServingSettings {
                glass_detection_value: s.glass_detection_value,
                glass_detection_timeout: ms(s.glass_detection_timeout_ms),
                delay_before_serving: ms(s.delay_before_serving_ms),
                delay_between_servings: ms(s.delay_between_servings_ms),
                serving_timeout: ms(s.serving_timeout_ms),
                mark_empty_on_timeout: s.mark_empty_on_timeout,
                ignore_missing_glass: s.ignore_missing_glass,
                start_with_button: s.start_with_button,
                empty_threshold: c.empty_threshold(),
            },
            single_pump_lock: c.safety.single_pump_lock,
            buttons: (&c.buttons).into(),
            indicator: (&c.indicator).into(),
            cleaning: (&c.cleaning).into(),
        }
    }
}

// ── Catalog ──────────────────────────────────────────────────────────────────

impl From<&mixbot_config::IngredientEntry> for Ingredient {
    fn from(c: &mixbot_config::IngredientEntry) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            added_separately: c.added_separately,
        }
    }
}

impl From<&mixbot_config::DispenserEntry> for Dispenser {
    fn from(c: &mixbot_config::DispenserEntry) -> Self {
        Self {
            number: c.number,
            ingredient: c.ingredient,
            // an unassigned dispenser is always empty
            is_empty: c.is_empty || c.ingredient.is_none(),
        }
    }
}

impl From<&mixbot_config::MixEntry> for Mix {
    fn from(c: &mixbot_config::MixEntry) -> Self {
        Self {
            id: c.id,
            name: c.name.clone(),
            doses: c
                .doses
                .iter()
                .map(|d| Dose {
                    ingredient: d.ingredient,
                    quantity: d.quantity,
                    number: d.number,
                })
                .collect(),
        }
    }
}
