#![cfg_attr(all(not(debug_assertions), not(test)), deny(warnings))]
#![cfg_attr(
    all(not(debug_assertions), not(test)),
    deny(clippy::all, clippy::pedantic, clippy::nursery)
)]
#![allow(clippy::module_name_repetitions, clippy::missing_errors_doc)]
//! Config schemas for the dispensing controller.
//!
//! - `Config` and its sections are deserialized from TOML and validated.
//! - `Catalog` describes ingredients, dispensers and mixes for the in-memory
//!   order store.
use std::collections::HashSet;
use std::path::Path;

use eyre::WrapErr;
use serde::{Deserialize, Serialize};

/// GPIO assignment (BCM numbering).
#[derive(Debug, Deserialize, Clone)]
pub struct Pins {
    pub hx711_dt: u8,
    pub hx711_sck: u8,
    /// Pump outputs; pump `i` is dispenser number `i`.
    pub pumps: Vec<u8>,
    pub start_button: Option<u8>,
    /// Long press triggers an emergency stop.
    pub interrupt_button: Option<u8>,
    pub indicator: Option<u8>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WeightCfg {
    /// Samples kept for median smoothing
    pub queue_len: usize,
    /// Pacing of every weight polling loop (ms)
    pub sample_delay_ms: u64,
    /// Smallest change the cell reliably resolves, in weight units
    pub min_detection: f64,
    /// Converted readings beyond +/- this are treated as glitches
    pub max_measurable: f64,
    pub tare_samples: usize,
    pub tare_duration_ms: u64,
    /// Data-ready polls per HX711 read (10 ms apart)
    pub ready_polls: u32,
}

impl Default for WeightCfg {
    fn default() -> Self {
        Self {
            queue_len: 10,
            sample_delay_ms: 20,
            min_detection: 1.0,
            max_measurable: 5000.0,
            tare_samples: 10,
            tare_duration_ms: 1000,
            ready_polls: 50,
        }
    }
}

/// Persisted calibration, printed back by `mixbot calibrate`.
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq)]
#[serde(default)]
pub struct CalibrationCfg {
    /// Tare baseline in raw counts
    pub offset: f64,
    /// Weight units per raw count
    pub ratio: f64,
    pub channel: char,
    pub gain: u16,
}

impl Default for CalibrationCfg {
    fn default() -> Self {
        Self {
            offset: 0.0,
            ratio: 1.0,
            channel: 'A',
            gain: 128,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServingCfg {
    /// Weight gain over baseline that counts as "glass present"
    pub glass_detection_value: f64,
    pub glass_detection_timeout_ms: u64,
    pub delay_before_serving_ms: u64,
    pub delay_between_servings_ms: u64,
    /// Per-dose pour timeout
    pub serving_timeout_ms: u64,
    pub mark_empty_on_timeout: bool,
    pub ignore_missing_glass: bool,
    /// Start on button press instead of glass detection
    pub start_with_button: bool,
    /// A timed-out pour that gained less than this marks the dispenser empty.
    /// Defaults to twice `weight.min_detection`.
    pub empty_threshold: Option<f64>,
}

impl Default for ServingCfg {
    fn default() -> Self {
        Self {
            glass_detection_value: 10.0,
            glass_detection_timeout_ms: 10_000,
            delay_before_serving_ms: 2_000,
            delay_between_servings_ms: 1_000,
            serving_timeout_ms: 10_000,
            mark_empty_on_timeout: true,
            ignore_missing_glass: false,
            start_with_button: false,
            empty_threshold: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Safety {
    /// At most one pump energized at any time
    pub single_pump_lock: bool,
}

impl Default for Safety {
    fn default() -> Self {
        Self {
            single_pump_lock: true,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ButtonsCfg {
    /// Treat low level as pressed when true (pull-up wiring)
    pub active_low: bool,
    /// Level changes shorter than this are ignored
    pub bounce_ms: u64,
    /// Interrupt button must be held this long to stop
    pub hold_ms: u64,
    /// Polling interval of the interrupt watcher
    pub poll_ms: u64,
}

impl Default for ButtonsCfg {
    fn default() -> Self {
        Self {
            active_low: true,
            bounce_ms: 50,
            hold_ms: 2_000,
            poll_ms: 10,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct IndicatorCfg {
    pub blink_on_ms: u64,
    pub blink_off_ms: u64,
}

impl Default for IndicatorCfg {
    fn default() -> Self {
        Self {
            blink_on_ms: 500,
            blink_off_ms: 500,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct CleaningCfg {
    /// Weight drop that advances to the next pump (lift the glass)
    pub drain_delta: f64,
    /// Longest a single pump runs during cleaning
    pub timeout_ms: u64,
}

impl Default for CleaningCfg {
    fn default() -> Self {
        Self {
            drain_delta: 50.0,
            timeout_ms: 30_000,
        }
    }
}

#[derive(Debug, Deserialize, Default, Clone)]
#[serde(default)]
pub struct Logging {
    pub file: Option<String>,  // path to .log (JSON lines)
    pub level: Option<String>, // "info","debug"
    /// Log rotation policy: "never" | "daily" | "hourly" (default: never)
    pub rotation: Option<String>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub pins: Pins,
    #[serde(default)]
    pub weight: WeightCfg,
    #[serde(default)]
    pub calibration: CalibrationCfg,
    #[serde(default)]
    pub serving: ServingCfg,
    #[serde(default)]
    pub safety: Safety,
    #[serde(default)]
    pub buttons: ButtonsCfg,
    #[serde(default)]
    pub indicator: IndicatorCfg,
    #[serde(default)]
    pub cleaning: CleaningCfg,
    #[serde(default)]
    pub logging: Logging,
}

pub fn load_toml(s: &str) -> Result<Config, toml::de::Error> {
    toml::from_str::<Config>(s)
}

/// Read, parse and validate a config file.
pub fn load_path(path: &Path) -> eyre::Result<Config> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read config {}", path.display()))?;
    let cfg = load_toml(&text).wrap_err_with(|| format!("parse config {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

const DAY_MS: u64 = 24 * 60 * 60 * 1000;

fn positive(x: f64) -> bool {
    x.is_finite() && x > 0.0
}

impl Config {
    pub fn validate(&self) -> eyre::Result<()> {
        // Pins
        if self.pins.pumps.is_empty() {
            eyre::bail!("pins.pumps must list at least one pump");
        }
        let mut seen = HashSet::new();
        let named = [
            Some(self.pins.hx711_dt),
            Some(self.pins.hx711_sck),
            self.pins.start_button,
            self.pins.interrupt_button,
            self.pins.indicator,
        ];
        for pin in named.into_iter().flatten().chain(self.pins.pumps.iter().copied()) {
            if !seen.insert(pin) {
                eyre::bail!("pins: GPIO {pin} is assigned more than once");
            }
        }
        if self.serving.start_with_button && self.pins.start_button.is_none() {
            eyre::bail!("serving.start_with_button requires pins.start_button");
        }

        // Weight
        if self.weight.queue_len == 0 {
            eyre::bail!("weight.queue_len must be >= 1");
        }
        if self.weight.sample_delay_ms == 0 {
            eyre::bail!("weight.sample_delay_ms must be >= 1");
        }
        if !positive(self.weight.min_detection) {
            eyre::bail!("weight.min_detection must be > 0");
        }
        if !positive(self.weight.max_measurable) {
            eyre::bail!("weight.max_measurable must be > 0");
        }
        if self.weight.tare_samples == 0 {
            eyre::bail!("weight.tare_samples must be >= 1");
        }
        if self.weight.ready_polls == 0 {
            eyre::bail!("weight.ready_polls must be >= 1");
        }

        // Calibration
        if !self.calibration.offset.is_finite() {
            eyre::bail!("calibration.offset must be finite");
        }
        if !self.calibration.ratio.is_finite() || self.calibration.ratio == 0.0 {
            eyre::bail!("calibration.ratio must be finite and non-zero");
        }
        let pair = (self.calibration.channel.to_ascii_uppercase(), self.calibration.gain);
        if !matches!(pair, ('A', 128) | ('A', 64) | ('B', 32)) {
            eyre::bail!("calibration.channel/gain must be one of A/128, A/64, B/32");
        }

        // Serving
        if self.serving.glass_detection_value.is_sign_negative() {
            eyre::bail!("serving.glass_detection_value must be >= 0");
        }
        if self.serving.glass_detection_timeout_ms == 0 {
            eyre::bail!("serving.glass_detection_timeout_ms must be >= 1");
        }
        if self.serving.serving_timeout_ms == 0 {
            eyre::bail!("serving.serving_timeout_ms must be >= 1");
        }
        for (name, ms) in [
            ("glass_detection_timeout_ms", self.serving.glass_detection_timeout_ms),
            ("delay_before_serving_ms", self.serving.delay_before_serving_ms),
            ("delay_between_servings_ms", self.serving.delay_between_servings_ms),
            ("serving_timeout_ms", self.serving.serving_timeout_ms),
        ] {
            if ms > DAY_MS {
                eyre::bail!("serving.{name} is unreasonably large (>24h)");
            }
        }
        if let Some(t) = self.serving.empty_threshold
            && !(t.is_finite() && t >= 0.0)
        {
            eyre::bail!("serving.empty_threshold must be >= 0");
        }

        // Buttons
        if self.buttons.poll_ms == 0 {
            eyre::bail!("buttons.poll_ms must be >= 1");
        }
        if self.buttons.hold_ms < self.buttons.bounce_ms {
            eyre::bail!("buttons.hold_ms must be >= buttons.bounce_ms");
        }

        // Indicator
        if self.indicator.blink_on_ms == 0 || self.indicator.blink_off_ms == 0 {
            eyre::bail!("indicator.blink_on_ms and indicator.blink_off_ms must be >= 1");
        }

        // Cleaning
        if !positive(self.cleaning.drain_delta) {
            eyre::bail!("cleaning.drain_delta must be > 0");
        }
        if self.cleaning.timeout_ms == 0 {
            eyre::bail!("cleaning.timeout_ms must be >= 1");
        }

        // Logging
        if let Some(r) = self.logging.rotation.as_deref()
            && !matches!(r, "never" | "daily" | "hourly")
        {
            eyre::bail!("logging.rotation must be one of never, daily, hourly");
        }

        Ok(())
    }

    /// Weight gain below which a timed-out pour marks its dispenser empty.
    pub fn empty_threshold(&self) -> f64 {
        self.serving
            .empty_threshold
            .unwrap_or(2.0 * self.weight.min_detection)
    }
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct IngredientEntry {
    pub id: u32,
    pub name: String,
    /// Garnish or anything else the operator adds by hand
    #[serde(default)]
    pub added_separately: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DispenserEntry {
    pub number: u8,
    pub ingredient: Option<u32>,
    #[serde(default)]
    pub is_empty: bool,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct DoseEntry {
    pub ingredient: u32,
    pub quantity: f64,
    pub number: u32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct MixEntry {
    pub id: u32,
    pub name: String,
    #[serde(default)]
    pub doses: Vec<DoseEntry>,
}

/// Ingredients, dispensers and mixes.
///
/// ```toml
/// [[ingredients]]
/// id = 1
/// name = "gin"
///
/// [[dispensers]]
/// number = 0
/// ingredient = 1
///
/// [[mixes]]
/// id = 1
/// name = "neat gin"
/// doses = [{ ingredient = 1, quantity = 40.0, number = 1 }]
/// ```
#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
#[serde(default)]
pub struct Catalog {
    pub ingredients: Vec<IngredientEntry>,
    pub dispensers: Vec<DispenserEntry>,
    pub mixes: Vec<MixEntry>,
}

pub fn load_catalog(s: &str) -> Result<Catalog, toml::de::Error> {
    toml::from_str::<Catalog>(s)
}

pub fn load_catalog_path(path: &Path) -> eyre::Result<Catalog> {
    let text = std::fs::read_to_string(path)
        .wrap_err_with(|| format!("read catalog {}", path.display()))?;
    let catalog =
        load_catalog(&text).wrap_err_with(|| format!("parse catalog {}", path.display()))?;
    catalog.validate()?;
    Ok(catalog)
}

impl Catalog {
    pub fn validate(&self) -> eyre::Result<()> {
        let mut ids = HashSet::new();
        for ing in &self.ingredients {
            if !ids.insert(ing.id) {
                eyre::bail!("ingredients: duplicate id {}", ing.id);
            }
        }
        let mut numbers = HashSet::new();
        for d in &self.dispensers {
            if !numbers.insert(d.number) {
                eyre::bail!("dispensers: duplicate number {}", d.number);
            }
            if let Some(ing) = d.ingredient
                && !ids.contains(&ing)
            {
                eyre::bail!("dispensers.{}: unknown ingredient {ing}", d.number);
            }
        }
        let mut mix_ids = HashSet::new();
        for m in &self.mixes {
            if !mix_ids.insert(m.id) {
                eyre::bail!("mixes: duplicate id {}", m.id);
            }
            for dose in &m.doses {
                if !ids.contains(&dose.ingredient) {
                    eyre::bail!("mixes.{}: unknown ingredient {}", m.name, dose.ingredient);
                }
                if !positive(dose.quantity) {
                    eyre::bail!("mixes.{}: dose quantity must be > 0", m.name);
                }
            }
        }
        Ok(())
    }

    /// Check that every dispenser exists in the pin map.
    pub fn check_against(&self, cfg: &Config) -> eyre::Result<()> {
        for d in &self.dispensers {
            if usize::from(d.number) >= cfg.pins.pumps.len() {
                eyre::bail!(
                    "dispensers.{}: no pump wired (pins.pumps has {} entries)",
                    d.number,
                    cfg.pins.pumps.len()
                );
            }
        }
        Ok(())
    }

    pub fn mix_by_name(&self, name: &str) -> Option<&MixEntry> {
        self.mixes
            .iter()
            .find(|m| m.name.eq_ignore_ascii_case(name))
    }
}
