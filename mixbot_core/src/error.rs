use serde::Serialize;
use thiserror::Error;

use crate::order::OrderStatus;

#[derive(Debug, Error, Clone)]
pub enum BarError {
    #[error("hardware error: {0}")]
    Hardware(String),
    #[error("hardware fault: {0}")]
    HardwareFault(String),
    #[error("timeout waiting for sensor")]
    Timeout,
    #[error("no sample from the weight sensor")]
    NoSample,
    #[error("calibration error: {0}")]
    Calibration(String),
    #[error("controller is busy")]
    Busy,
    #[error("hardware not initialised")]
    NoHardware,
    #[error("invalid state: {0}")]
    State(String),
}

/// Failure to acquire hardware handles for a configuration.
#[derive(Debug, Error, Clone)]
pub enum BuildError {
    #[error("cannot claim {role} on GPIO {pin}: {reason}")]
    Pin {
        role: &'static str,
        pin: u8,
        reason: String,
    },
    #[error("cannot spawn {0} thread: {1}")]
    Thread(&'static str, String),
    #[error("invalid config: {0}")]
    InvalidConfig(&'static str),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PumpError {
    #[error("pump {requested} refused: pump {active} is already running")]
    Busy { active: usize, requested: usize },
    #[error("unknown pump {0}")]
    UnknownPump(usize),
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: u64 },
    #[error("store backend: {0}")]
    Backend(String),
}

/// Why an order ended in `Abandoned`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    #[error("no glass detected before timeout")]
    NoGlass,
    #[error("order has no mix")]
    NoMix,
    #[error("no usable dispenser for an ingredient")]
    NoDispenser,
    #[error("dispenser ran empty")]
    DispenserEmpty,
    #[error("pour did not complete before timeout")]
    ServingTimeout,
    #[error("another pump is running")]
    PumpBusy,
    #[error("emergency stop")]
    Cancelled,
    #[error("interrupt button held")]
    Interrupted,
    #[error("order store failure")]
    Store,
    #[error("weight sensor unavailable")]
    SensorUnavailable,
}

/// Why `accept_order` refused an order.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Rejection {
    #[error("another order is in progress")]
    Busy,
    #[error("order has no mix")]
    NoMix,
    #[error("mix cannot be served with the current dispensers")]
    MixUnavailable,
    #[error("hardware not initialised")]
    NoHardware,
    #[error("store error: {0}")]
    Store(#[from] StoreError),
    #[error("cannot start worker: {0}")]
    Spawn(String),
    #[error("order is already {0}")]
    NotNew(OrderStatus),
}

pub type Result<T> = eyre::Result<T>;
pub use eyre::Report;
