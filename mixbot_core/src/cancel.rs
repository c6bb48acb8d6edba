//! Per-order cancellation flag.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

const RUNNING: u8 = 0;

/// What asked the current operation to stop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StopCause {
    EmergencyStop = 1,
    InterruptButton = 2,
}

/// Shared, cloneable cancel flag. The first cause recorded wins.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    cause: Arc<AtomicU8>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, cause: StopCause) {
        let _ = self
            .cause
            .compare_exchange(RUNNING, cause as u8, Ordering::AcqRel, Ordering::Acquire);
    }

    #[inline]
    pub fn is_cancelled(&self) -> bool {
        self.cause.load(Ordering::Acquire) != RUNNING
    }

    pub fn cause(&self) -> Option<StopCause> {
        match self.cause.load(Ordering::Acquire) {
            1 => Some(StopCause::EmergencyStop),
            2 => Some(StopCause::InterruptButton),
            _ => None,
        }
    }
}
