//! # Virtual Clock for Simulation
//!
//! Deterministic time source. It only moves when the simulation driver moves it.
//!
//! ## Expectations:
//! - Nanosecond resolution
//! - Never runs backwards
//! - Lock-free reads from PAL threads

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nanohub_core::time::Clock;

#[derive(Clone, Debug, Default)]
pub struct VirtualClock {
    now: Arc<AtomicU64>,
}

impl VirtualClock {
    pub fn new(start_ns: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(start_ns)),
        }
    }

    #[inline]
    pub fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }

    #[inline]
    pub fn advance(&self, by: Duration) {
        let ns = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let _ = self
            .now
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |now| {
                Some(now.saturating_add(ns))
            });
    }

    /// Moves the clock to `deadline_ns` unless it is already past it.
    #[inline]
    pub fn advance_to(&self, deadline_ns: u64) {
        self.now.fetch_max(deadline_ns, Ordering::AcqRel);
    }
}

impl Clock for VirtualClock {
    fn now_ns(&self) -> u64 {
        self.now.load(Ordering::Acquire)
    }
}
