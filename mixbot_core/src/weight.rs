//! Smoothed, calibrated weight on top of a raw `Scale`.
//!
//! Raw samples go into a bounded FIFO; the reading is the median of the
//! queue. The queue is cleared whenever the measurement context changes (a
//! new dose baseline, a new tare), so stale samples never leak across.

use std::collections::VecDeque;
use std::time::Duration;

use eyre::WrapErr;
use mixbot_traits::{Clock, Scale, SharedClock};
use tracing::{debug, info, trace};

use crate::calibration::Calibration;
use crate::cancel::CancelToken;
use crate::config::WeightSettings;
use crate::error::{BarError, Result};
use crate::hw_error::map_hw_error;
use crate::telemetry::{Published, WeightSnapshot};

/// Result of [`WeightModule::wait_until`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WaitOutcome {
    /// Condition held for this weight.
    Met(f64),
    /// Timeout elapsed; last weight seen, if any.
    TimedOut(Option<f64>),
    Cancelled(Option<f64>),
}

/// Median of a set of samples; even counts average the two middle values.
pub fn median(samples: &[i32]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let mut sorted = samples.to_vec();
    sorted.sort_unstable();
    let n = sorted.len();
    let mid = n / 2;
    Some(if n % 2 == 1 {
        f64::from(sorted[mid])
    } else {
        (f64::from(sorted[mid - 1]) + f64::from(sorted[mid])) / 2.0
    })
}

pub struct WeightModule<S = Box<dyn Scale>> {
    scale: S,
    clock: SharedClock,
    calibration: Calibration,
    queue: VecDeque<i32>,
    capacity: usize,
    sample_delay: Duration,
    max_measurable: f64,
    tare_samples: usize,
    tare_duration: Duration,
    snapshot: Published<WeightSnapshot>,
}

impl<S: Scale> WeightModule<S> {
    pub fn new(
        scale: S,
        calibration: Calibration,
        settings: &WeightSettings,
        clock: SharedClock,
    ) -> Self {
        let capacity = settings.queue_len.max(1);
        Self {
            scale,
            clock,
            calibration,
            queue: VecDeque::with_capacity(capacity),
            capacity,
            sample_delay: settings.sample_delay,
            max_measurable: settings.max_measurable,
            tare_samples: settings.tare_samples.max(1),
            tare_duration: settings.tare_duration,
            snapshot: Published::default(),
        }
    }

    /// Cell read by the presentation layer; updated after every sample.
    pub fn snapshot(&self) -> Published<WeightSnapshot> {
        self.snapshot.clone()
    }

    pub fn calibration(&self) -> Calibration {
        self.calibration
    }

    pub fn set_calibration(&mut self, calibration: Calibration) {
        self.calibration = calibration;
        self.clear();
    }

    pub fn sample_delay(&self) -> Duration {
        self.sample_delay
    }

    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    pub fn clear(&mut self) {
        self.queue.clear();
    }

    fn read_raw(&mut self) -> Result<Option<i32>> {
        self.scale
            .read()
            .map_err(|e| eyre::Report::new(map_hw_error(e.as_ref())))
            .wrap_err("weight sensor read")
    }

    /// One driver read folded into the queue; returns the queue median.
    pub fn sample(&mut self) -> Result<Option<f64>> {
        if let Some(raw) = self.read_raw()? {
            if self.queue.len() == self.capacity {
                self.queue.pop_front();
            }
            self.queue.push_back(raw);
        }
        let raw = median(self.queue.make_contiguous());
        let weight = raw.and_then(|r| self.convert(r));
        self.snapshot.set(WeightSnapshot {
            raw,
            weight,
            queue: self.queue.iter().copied().collect(),
        });
        Ok(raw)
    }

    /// Calibrated weight for a raw reading; `None` when implausible.
    pub fn convert(&self, raw: f64) -> Option<f64> {
        let w = self.calibration.convert(raw);
        if !w.is_finite() || w.abs() > self.max_measurable {
            trace!(raw, weight = w, "reading outside measurable range");
            return None;
        }
        Some(w)
    }

    /// Sample once and convert the smoothed reading.
    pub fn current_weight(&mut self) -> Result<Option<f64>> {
        Ok(self.sample()?.and_then(|raw| self.convert(raw)))
    }

    /// Raw samples spread evenly over the tare window.
    fn collect_window(&mut self) -> Result<Vec<i32>> {
        let n = self.tare_samples;
        let spacing = self.tare_duration / u32::try_from(n).unwrap_or(u32::MAX);
        let mut got = Vec::with_capacity(n);
        for i in 0..n {
            if let Some(raw) = self.read_raw()? {
                got.push(raw);
            }
            if i + 1 < n {
                self.clock.sleep(spacing);
            }
        }
        Ok(got)
    }

    /// Zero the scale: offset becomes the mean raw value over the tare window.
    pub fn tare(&mut self) -> Result<f64> {
        let samples = self.collect_window().wrap_err("tare")?;
        let Some(mean) = mean(&samples) else {
            return Err(eyre::Report::new(BarError::NoSample)).wrap_err("tare");
        };
        self.calibration.offset = mean;
        self.clear();
        info!(offset = mean, samples = samples.len(), "tare complete");
        Ok(mean)
    }

    /// Derive the ratio from a known load placed on an already tared scale.
    pub fn calibrate(&mut self, known_weight: f64) -> Result<f64> {
        if !known_weight.is_finite() || known_weight <= 0.0 {
            return Err(eyre::Report::new(BarError::Calibration(format!(
                "known weight must be > 0, got {known_weight}"
            ))));
        }
        let samples = self.collect_window().wrap_err("calibrate")?;
        let Some(avg) = mean(&samples) else {
            return Err(eyre::Report::new(BarError::NoSample)).wrap_err("calibrate");
        };
        let delta = avg - self.calibration.offset;
        if delta == 0.0 || !delta.is_finite() {
            return Err(eyre::Report::new(BarError::Calibration(
                "reading did not change from the tare baseline".into(),
            )));
        }
        let ratio = known_weight / delta;
        self.calibration.ratio = ratio;
        self.clear();
        info!(ratio, avg, "calibration complete");
        Ok(ratio)
    }

    /// A settled weight reading.
    ///
    /// With `clear`, the queue is flushed, the cell powered up and refilled
    /// with `max(2, N-1)` fresh samples first. Then polls (paced by the
    /// sample delay) until a conversion succeeds, `max_tries` polls have
    /// missed (0 = no limit) or `cancel` fires.
    pub fn stable_weight(
        &mut self,
        clear: bool,
        max_tries: u32,
        cancel: &CancelToken,
    ) -> Result<Option<f64>> {
        if clear {
            self.clear();
            self.scale
                .power_up()
                .map_err(|e| eyre::Report::new(map_hw_error(e.as_ref())))
                .wrap_err("power up weight sensor")?;
            let fill = self.capacity.saturating_sub(1).max(2);
            for _ in 0..fill {
                if cancel.is_cancelled() {
                    return Ok(None);
                }
                self.sample()?;
                self.clock.sleep(self.sample_delay);
            }
        }
        let mut tries = 0u32;
        loop {
            if cancel.is_cancelled() {
                return Ok(None);
            }
            if let Some(w) = self.current_weight()? {
                debug!(weight = w, "stable weight");
                return Ok(Some(w));
            }
            tries = tries.saturating_add(1);
            if max_tries != 0 && tries >= max_tries {
                return Ok(None);
            }
            self.clock.sleep(self.sample_delay);
        }
    }

    /// Poll until `condition(weight)` holds, `timeout` elapses or `cancel`
    /// fires. Every iteration checks the token before sampling.
    pub fn wait_until(
        &mut self,
        mut condition: impl FnMut(f64) -> bool,
        timeout: Duration,
        poll: Duration,
        cancel: &CancelToken,
    ) -> Result<WaitOutcome> {
        let start = self.clock.now();
        let mut last = None;
        loop {
            if cancel.is_cancelled() {
                return Ok(WaitOutcome::Cancelled(last));
            }
            if let Some(w) = self.current_weight()? {
                last = Some(w);
                if condition(w) {
                    return Ok(WaitOutcome::Met(w));
                }
            }
            if self.clock.elapsed_since(start) >= timeout {
                return Ok(WaitOutcome::TimedOut(last));
            }
            self.clock.sleep(poll);
        }
    }
}

fn mean(samples: &[i32]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let sum: f64 = samples.iter().map(|&s| f64::from(s)).sum();
    Some(sum / samples.len() as f64)
}
