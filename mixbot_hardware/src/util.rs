use std::time::Duration;

use mixbot_traits::Clock;

use crate::error::{HwError, Result};

/// Wait until the provided `is_high` predicate becomes false (i.e., line goes low),
/// polling at most `max_polls` times with `poll_interval` sleeps in between.
/// Never blocks indefinitely.
pub fn wait_until_low(
    mut is_high: impl FnMut() -> bool,
    max_polls: u32,
    poll_interval: Duration,
    clock: &impl Clock,
) -> Result<()> {
    let mut polls = 0_u32;
    while is_high() {
        polls += 1;
        if polls >= max_polls {
            return Err(HwError::DataReadyTimeout);
        }
        clock.sleep(poll_interval);
    }
    Ok(())
}
