//! In-memory GPIO backend and a simulated HX711 load cell.
//!
//! `SimPinFactory` hands out pins backed by a shared level table. A
//! `SimLoadCell` attached to a data/clock pin pair speaks the HX711 serial
//! protocol, and its load grows while any attached pump output is high, so the
//! whole stack (driver, weight module, pumps, worker) runs unmodified.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

use mixbot_traits::{BoxError, InputPin, OutputPin, PinFactory};

use crate::error::HwError;

const MASK_24: i64 = 0x00FF_FFFF;
const RAW_MAX: i64 = 0x007F_FFFE;
const RAW_MIN: i64 = -0x007F_FFFF;

/// One level change on a watched line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PinEdge {
    pub pin: u8,
    pub high: bool,
    /// Load on the attached cell when the edge happened.
    pub load: Option<f64>,
}

#[derive(Default)]
struct Bank {
    levels: HashMap<u8, bool>,
    claimed: HashSet<u8>,
    cells_by_dout: HashMap<u8, SimLoadCell>,
    cells_by_sck: HashMap<u8, SimLoadCell>,
    watched: HashSet<u8>,
    edges: Vec<PinEdge>,
}

impl Bank {
    fn drive(&mut self, pin: u8, high: bool) {
        let was = self.levels.insert(pin, high).unwrap_or(false);
        if was != high && self.watched.contains(&pin) {
            let load = self.cells_by_dout.values().next().map(SimLoadCell::load);
            self.edges.push(PinEdge { pin, high, load });
        }
    }
}

fn lock(bank: &Mutex<Bank>) -> MutexGuard<'_, Bank> {
    // A panicking test thread must not wedge every other pin user.
    bank.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Pin factory for simulation and tests.
#[derive(Clone, Default)]
pub struct SimPinFactory {
    bank: Arc<Mutex<Bank>>,
}

impl SimPinFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drive a line from the outside (press a button, pull a line low).
    pub fn set_level(&self, pin: u8, high: bool) {
        lock(&self.bank).drive(pin, high);
    }

    /// Start logging level changes on `pins`.
    pub fn watch(&self, pins: &[u8]) {
        lock(&self.bank).watched.extend(pins.iter().copied());
    }

    /// Level changes seen on watched lines, oldest first.
    pub fn edges(&self) -> Vec<PinEdge> {
        lock(&self.bank).edges.clone()
    }

    /// Current level of a line; lines never written read low.
    pub fn level(&self, pin: u8) -> bool {
        lock(&self.bank).levels.get(&pin).copied().unwrap_or(false)
    }

    /// Whether a handle for `pin` is currently alive.
    pub fn is_claimed(&self, pin: u8) -> bool {
        lock(&self.bank).claimed.contains(&pin)
    }

    /// Wire a simulated HX711 to the given data (input) and clock (output) pins.
    pub fn attach_load_cell(&self, dout: u8, sck: u8, cell: SimLoadCell) {
        let mut bank = lock(&self.bank);
        bank.cells_by_dout.insert(dout, cell.clone());
        bank.cells_by_sck.insert(sck, cell);
    }

    fn claim(&self, pin: u8) -> Result<Claim, HwError> {
        let mut bank = lock(&self.bank);
        if !bank.claimed.insert(pin) {
            return Err(HwError::PinInUse(pin));
        }
        Ok(Claim {
            pin,
            bank: self.bank.clone(),
        })
    }
}

impl PinFactory for SimPinFactory {
    fn input(&self, pin: u8) -> Result<Box<dyn InputPin>, BoxError> {
        let claim = self.claim(pin)?;
        let cell = lock(&self.bank).cells_by_dout.get(&pin).cloned();
        Ok(match cell {
            Some(cell) => Box::new(SimCellData { claim, cell }),
            None => Box::new(SimInput { claim }),
        })
    }

    fn output(&self, pin: u8) -> Result<Box<dyn OutputPin>, BoxError> {
        let claim = self.claim(pin)?;
        let cell = {
            let mut bank = lock(&self.bank);
            bank.levels.insert(pin, false);
            bank.cells_by_sck.get(&pin).cloned()
        };
        Ok(match cell {
            Some(cell) => Box::new(SimCellClock { claim, cell }),
            None => Box::new(SimOutput { claim }),
        })
    }
}

/// Ownership of one simulated line; released (and driven low if it was an
/// output) when dropped.
struct Claim {
    pin: u8,
    bank: Arc<Mutex<Bank>>,
}

impl Claim {
    fn level(&self) -> bool {
        lock(&self.bank).levels.get(&self.pin).copied().unwrap_or(false)
    }

    fn write(&self, high: bool) {
        lock(&self.bank).drive(self.pin, high);
    }

    fn levels_of(&self, pins: &[u8]) -> Vec<bool> {
        let bank = lock(&self.bank);
        pins.iter()
            .map(|p| bank.levels.get(p).copied().unwrap_or(false))
            .collect()
    }
}

impl Drop for Claim {
    fn drop(&mut self) {
        let mut bank = lock(&self.bank);
        bank.claimed.remove(&self.pin);
    }
}

struct SimInput {
    claim: Claim,
}

impl InputPin for SimInput {
    fn is_high(&self) -> bool {
        self.claim.level()
    }
}

struct SimOutput {
    claim: Claim,
}

impl OutputPin for SimOutput {
    fn set_high(&mut self) {
        self.claim.write(true);
    }

    fn set_low(&mut self) {
        self.claim.write(false);
    }
}

impl Drop for SimOutput {
    fn drop(&mut self) {
        self.claim.write(false);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Idle,
    Transfer { bits_left: u8, extra: u8 },
}

struct CellState {
    offset: i32,
    counts_per_unit: f64,
    load: f64,
    flows: Vec<(u8, f64)>,
    not_ready_polls: u32,
    forced_word: Option<u32>,
    word: u32,
    current_bit: bool,
    phase: Phase,
    last_gain_pulses: u8,
    conversions: u64,
}

/// A simulated HX711 with a linear load cell behind it.
///
/// raw = offset + load * counts_per_unit
#[derive(Clone)]
pub struct SimLoadCell {
    state: Arc<Mutex<CellState>>,
}

impl SimLoadCell {
    pub fn new(offset: i32, counts_per_unit: f64) -> Self {
        Self {
            state: Arc::new(Mutex::new(CellState {
                offset,
                counts_per_unit,
                load: 0.0,
                flows: Vec::new(),
                not_ready_polls: 0,
                forced_word: None,
                word: 0,
                current_bit: false,
                phase: Phase::Idle,
                last_gain_pulses: 0,
                conversions: 0,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, CellState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Put a given load on the cell (e.g. a glass of 250 units).
    pub fn set_load(&self, units: f64) {
        self.state().load = units;
    }

    pub fn load(&self) -> f64 {
        self.state().load
    }

    /// Every conversion taken while `pump_pin` is high adds `units` of load.
    pub fn add_flow(&self, pump_pin: u8, units: f64) {
        self.state().flows.push((pump_pin, units));
    }

    /// Report "not ready" for the next `polls` data-ready checks.
    pub fn hold_not_ready(&self, polls: u32) {
        self.state().not_ready_polls = polls;
    }

    /// Emit a fixed 24-bit word instead of the load-derived value.
    pub fn force_word(&self, word: Option<u32>) {
        self.state().forced_word = word;
    }

    /// Extra clock pulses seen after the last complete transfer.
    pub fn last_gain_pulses(&self) -> u8 {
        self.state().last_gain_pulses
    }

    pub fn conversions(&self) -> u64 {
        self.state().conversions
    }

    fn data_level(&self, energized: &[bool]) -> bool {
        let mut st = self.state();
        if let Phase::Transfer { bits_left: 0, extra } = st.phase
            && extra > 0
        {
            st.last_gain_pulses = extra;
            st.phase = Phase::Idle;
        }
        match st.phase {
            Phase::Transfer { .. } => st.current_bit,
            Phase::Idle => {
                if st.not_ready_polls > 0 {
                    st.not_ready_polls -= 1;
                    return true;
                }
                let inflow: f64 = st
                    .flows
                    .iter()
                    .zip(energized)
                    .filter(|(_, on)| **on)
                    .map(|((_, units), _)| *units)
                    .sum();
                st.load += inflow;
                let raw = (f64::from(st.offset) + st.load * st.counts_per_unit).round() as i64;
                st.word = match st.forced_word {
                    Some(w) => w & MASK_24 as u32,
                    None => (raw.clamp(RAW_MIN, RAW_MAX) & MASK_24) as u32,
                };
                st.conversions += 1;
                st.phase = Phase::Transfer {
                    bits_left: 24,
                    extra: 0,
                };
                false
            }
        }
    }

    fn clock_rising(&self) {
        let mut st = self.state();
        if let Phase::Transfer { bits_left, extra } = st.phase {
            if bits_left > 0 {
                st.current_bit = (st.word >> (bits_left - 1)) & 1 == 1;
                st.phase = Phase::Transfer {
                    bits_left: bits_left - 1,
                    extra,
                };
            } else {
                st.phase = Phase::Transfer {
                    bits_left: 0,
                    extra: extra.saturating_add(1),
                };
            }
        }
    }

    fn flow_pins(&self) -> Vec<u8> {
        self.state().flows.iter().map(|(pin, _)| *pin).collect()
    }
}

struct SimCellData {
    claim: Claim,
    cell: SimLoadCell,
}

impl InputPin for SimCellData {
    fn is_high(&self) -> bool {
        let energized = self.claim.levels_of(&self.cell.flow_pins());
        self.cell.data_level(&energized)
    }
}

struct SimCellClock {
    claim: Claim,
    cell: SimLoadCell,
}

impl OutputPin for SimCellClock {
    fn set_high(&mut self) {
        self.claim.write(true);
        self.cell.clock_rising();
    }

    fn set_low(&mut self) {
        self.claim.write(false);
    }
}
