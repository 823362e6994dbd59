//! Wall-clock source for deadline arithmetic
//!
//! Send dates are absolute epoch milliseconds, but waits must not drift when the
//! system clock is adjusted. `MonotonicClock` anchors the epoch once and advances it
//! with the tokio monotonic clock, which also makes it follow paused time in tests.

use std::fmt::Debug;
use std::time::Duration;

use tokio::time::Instant;

/// Source of the current time in Unix milliseconds
pub trait Clock: Send + Sync + Debug {
    fn now_ms(&self) -> i64;
}

/// Epoch anchor plus monotonic elapsed time
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    anchor_ms: i64,
    anchor: Instant,
}

impl MonotonicClock {
    /// Anchor at the current system time
    pub fn new() -> Self {
        Self::starting_at(crate::id::now_ms())
    }

    /// Anchor at a fixed epoch time
    pub fn starting_at(anchor_ms: i64) -> Self {
        Self {
            anchor_ms,
            anchor: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ms(&self) -> i64 {
        self.anchor_ms + self.anchor.elapsed().as_millis() as i64
    }
}

/// Time left until `deadline_ms`, zero if it has passed
pub fn until(clock: &dyn Clock, deadline_ms: i64) -> Duration {
    let remaining = deadline_ms.saturating_sub(clock.now_ms());
    Duration::from_millis(remaining.max(0) as u64)
}
