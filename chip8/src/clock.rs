//! Frame clock.
use std::{
    thread,
    time::{Duration, Instant},
};

use crate::vm::Hz;

/// Sleeping shorter than this is left to yielding.
const SLEEP_MARGIN: Duration = Duration::from_millis(2);

/// Timer to synchronize a thread with the fixed frame rate of the scheduler.
///
/// The time spent working during a frame is subtracted from the wait, so
/// the frame period stays constant regardless of how long the work took.
pub struct Clock {
    start: Instant,
    interval: Duration,
}

impl Clock {
    /// Creates a new clock ticking at the given frequency, with the current
    /// time as internal state.
    pub fn new(freq: Hz) -> Self {
        Self {
            start: Instant::now(),
            interval: freq.into(),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Set the clock state back to zero.
    pub fn reset(&mut self) {
        self.start = Instant::now()
    }

    /// Block the current thread until the next clock cycle.
    pub fn wait(&mut self) {
        loop {
            let elapsed = self.start.elapsed();
            if elapsed < self.interval {
                let remaining = self.interval - elapsed;

                // Sleep does not have enough resolution to land on the
                // deadline, so the last stretch is spent yielding.
                if remaining > SLEEP_MARGIN {
                    thread::sleep(remaining - SLEEP_MARGIN);
                } else {
                    thread::yield_now();
                }
            } else {
                // Reset back to zero, rather than trying to catch up.
                //
                // If the VM was paused for debugging, or a frame overran,
                // it should simply continue at the next cycle running
                // at its usual speed.
                self.reset();
                return;
            }
        }
    }
}
