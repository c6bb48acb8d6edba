//! Pump outputs with an optional single-pump safety lock.
//!
//! With the lock enabled at most one output is energized system-wide. The
//! lock is a tag holding the active pump id: `start` claims it with a
//! compare-and-swap (Acquire) before energizing, `stop` de-energizes before
//! releasing it (Release), so a stop happens-before the next start.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use mixbot_traits::OutputPin;
use tracing::{debug, warn};

use crate::error::PumpError;

const NO_PUMP: usize = usize::MAX;

struct PumpLine {
    pin: Mutex<Box<dyn OutputPin>>,
    energized: AtomicBool,
}

impl PumpLine {
    fn pin(&self) -> MutexGuard<'_, Box<dyn OutputPin>> {
        self.pin.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn energize(&self) {
        self.pin().set_high();
        self.energized.store(true, Ordering::Release);
    }

    fn de_energize(&self) {
        self.pin().set_low();
        self.energized.store(false, Ordering::Release);
    }
}

pub struct PumpController {
    lines: Vec<PumpLine>,
    active: Option<AtomicUsize>,
}

impl PumpController {
    /// Outputs are indexed by pump id; all are driven low on construction.
    pub fn new(outputs: Vec<Box<dyn OutputPin>>, single_pump_lock: bool) -> Self {
        let lines = outputs
            .into_iter()
            .map(|mut pin| {
                pin.set_low();
                PumpLine {
                    pin: Mutex::new(pin),
                    energized: AtomicBool::new(false),
                }
            })
            .collect();
        Self {
            lines,
            active: single_pump_lock.then(|| AtomicUsize::new(NO_PUMP)),
        }
    }

    pub fn pump_count(&self) -> usize {
        self.lines.len()
    }

    pub fn safety_enabled(&self) -> bool {
        self.active.is_some()
    }

    fn line(&self, id: usize) -> Result<&PumpLine, PumpError> {
        self.lines.get(id).ok_or(PumpError::UnknownPump(id))
    }

    pub fn start(&self, id: usize) -> Result<(), PumpError> {
        let line = self.line(id)?;
        if let Some(tag) = &self.active
            && let Err(active) = tag.compare_exchange(NO_PUMP, id, Ordering::Acquire, Ordering::Acquire)
        {
            warn!(pump = id, active, "pump start refused: another pump is running");
            return Err(PumpError::Busy {
                active,
                requested: id,
            });
        }
        line.energize();
        debug!(pump = id, "pump on");
        Ok(())
    }

    pub fn stop(&self, id: usize) -> Result<(), PumpError> {
        let line = self.line(id)?;
        line.de_energize();
        if let Some(tag) = &self.active
            && let Err(active) = tag.compare_exchange(id, NO_PUMP, Ordering::Release, Ordering::Relaxed)
            && active != NO_PUMP
        {
            warn!(pump = id, active, "inconsistent stop: pump is not the active one");
        }
        debug!(pump = id, "pump off");
        Ok(())
    }

    /// De-energize everything and release the lock unconditionally.
    pub fn stop_all(&self) {
        for line in &self.lines {
            line.de_energize();
        }
        if let Some(tag) = &self.active {
            tag.store(NO_PUMP, Ordering::Release);
        }
    }

    /// Pump holding the lock, or the first energized one without the lock.
    pub fn active(&self) -> Option<usize> {
        match &self.active {
            Some(tag) => Some(tag.load(Ordering::Acquire)).filter(|&id| id != NO_PUMP),
            None => (0..self.lines.len()).find(|&id| self.is_energized(id)),
        }
    }

    pub fn is_energized(&self, id: usize) -> bool {
        self.lines
            .get(id)
            .is_some_and(|l| l.energized.load(Ordering::Acquire))
    }
}

impl Drop for PumpController {
    fn drop(&mut self) {
        self.stop_all();
    }
}
