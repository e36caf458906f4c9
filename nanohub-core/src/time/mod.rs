//! ## nanohub-core::time
//! **Clocks, hardware timer seam and the timer pool**
//!
//! ### Expectations:
//! - Monotonic nanosecond timestamps from a single [`Clock`]
//! - One hardware timer multiplexed across every nanoapp and system timer
//! - Expiry work always lands on the event loop thread
//!
//! ### Key Submodules:
//! - `system_timer/`: the one-shot hardware timer abstraction and a thread-backed implementation
//! - `timer_pool/`: ordered timer requests with per-owner admission control

use std::time::Instant;

pub mod system_timer;
pub mod timer_pool;

pub use system_timer::{ExpiryCallback, StdSystemTimer, SystemTimer};
pub use timer_pool::{TimerError, TimerLimits, TimerPool};

/// Monotonic time source in nanoseconds.
pub trait Clock: Send + Sync {
    fn now_ns(&self) -> u64;
}

/// Wall-independent clock anchored at construction.
#[derive(Clone, Copy, Debug)]
pub struct MonotonicClock {
    epoch: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            epoch: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now_ns(&self) -> u64 {
        u64::try_from(self.epoch.elapsed().as_nanos()).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_never_goes_back() {
        let clock = MonotonicClock::new();
        let first = clock.now_ns();
        let second = clock.now_ns();
        assert!(second >= first);
    }
}
