//! Snapshot cells read by the presentation layer.
//!
//! Each cell has a single writer (weight module, worker, controller) and any
//! number of readers. Readers never touch the locks that guard hardware.

use std::fmt;
use std::sync::{Arc, RwLock};

use serde::Serialize;

use crate::error::AbandonReason;
use crate::order::OrderId;

/// Latest value published by a single writer.
#[derive(Debug, Default)]
pub struct Published<T> {
    cell: Arc<RwLock<T>>,
}

impl<T> Clone for Published<T> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
        }
    }
}

impl<T: Clone> Published<T> {
    pub fn new(value: T) -> Self {
        Self {
            cell: Arc::new(RwLock::new(value)),
        }
    }

    pub fn get(&self) -> T {
        match self.cell.read() {
            Ok(g) => g.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn set(&self, value: T) {
        match self.cell.write() {
            Ok(mut g) => *g = value,
            Err(poisoned) => *poisoned.into_inner() = value,
        }
    }
}

/// What the weight module saw on its last sample.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WeightSnapshot {
    /// Median of the sample queue, raw counts
    pub raw: Option<f64>,
    /// `raw` converted through the calibration
    pub weight: Option<f64>,
    pub queue: Vec<i32>,
}

/// Human-readable progress of the controller.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Phase {
    #[default]
    Idle,
    Preparing,
    WaitingForGlass,
    WaitingForButton,
    Starting,
    Serving {
        dose: usize,
        of: usize,
        pump: usize,
    },
    AddSeparately {
        ingredient: String,
    },
    Finished,
    Abandoned(AbandonReason),
    Cleaning {
        pump: usize,
    },
    Maintenance,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Idle => f.write_str("idle"),
            Phase::Preparing => f.write_str("preparing"),
            Phase::WaitingForGlass => f.write_str("waiting for glass"),
            Phase::WaitingForButton => f.write_str("press button to start"),
            Phase::Starting => f.write_str("starting"),
            Phase::Serving { dose, of, pump } => {
                write!(f, "serving dose {dose}/{of} via pump {pump}")
            }
            Phase::AddSeparately { ingredient } => write!(f, "add {ingredient} by hand"),
            Phase::Finished => f.write_str("finished"),
            Phase::Abandoned(reason) => write!(f, "abandoned: {reason}"),
            Phase::Cleaning { pump } => write!(f, "cleaning pump {pump}"),
            Phase::Maintenance => f.write_str("maintenance"),
        }
    }
}

/// Everything the presentation layer shows about the controller.
#[derive(Debug, Clone, Serialize)]
pub struct ArtistStatus {
    pub busy: bool,
    pub current_order: Option<OrderId>,
    pub phase: String,
    pub raw: Option<f64>,
    pub weight: Option<f64>,
    pub queue: Vec<i32>,
}
