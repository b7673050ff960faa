use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use tokio::time::Instant;

/// Wall clock millis since epoch, used for RTT timestamps on the wire. A clock before the epoch
///  yields 0.
pub fn epoch_millis() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

/// Measures time since the last reset, based on tokio's monotonic clock (which makes it
///  controllable in tests with paused time).
///
/// A timer is shared between the receive loop (which resets it on liveness evidence) and the
///  RTT / timeout loop (which checks it), so it synchronizes internally. Checking and resetting
///  happen under the same lock, so an auto-reset can not swallow a concurrent reset.
#[derive(Debug)]
pub struct Timer {
    last_reset: Mutex<Instant>,
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

impl Timer {
    pub fn new() -> Timer {
        Timer {
            last_reset: Mutex::new(Instant::now()),
        }
    }

    pub fn reset(&self) {
        *self.lock() = Instant::now();
    }

    /// Returns true iff at least `duration` has passed since the last reset. If so and
    ///  `auto_reset` is set, the timer is reset as well.
    pub fn has_elapsed(&self, duration: Duration, auto_reset: bool) -> bool {
        let mut last_reset = self.lock();
        let now = Instant::now();
        if now.duration_since(*last_reset) >= duration {
            if auto_reset {
                *last_reset = now;
            }
            return true;
        }
        false
    }

    pub fn elapsed(&self) -> Duration {
        self.lock().elapsed()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Instant> {
        // an Instant can not be left in an inconsistent state, so poisoning is irrelevant
        self.last_reset.lock()
            .unwrap_or_else(|e| e.into_inner())
    }
}
