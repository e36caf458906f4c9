//! ## nanohub-core::events::stats
//! **Event loop counters**
//!
//! Shared between the loop and every [`super::EventPoster`], so producers on other threads can
//! account for the events they fail to enqueue.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

#[derive(Debug, Default)]
pub struct LoopStats {
    events_posted: AtomicU64,
    events_dispatched: AtomicU64,
    events_dropped: AtomicU64,
    callbacks_deferred: AtomicU64,
    max_queue_depth: AtomicUsize,
}

impl LoopStats {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn increment_posted(&self) {
        self.events_posted.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_dispatched(&self) {
        self.events_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_deferred(&self) {
        self.callbacks_deferred.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn observe_depth(&self, depth: usize) {
        self.max_queue_depth.fetch_max(depth, Ordering::Relaxed);
    }

    pub fn events_posted(&self) -> u64 {
        self.events_posted.load(Ordering::Relaxed)
    }

    pub fn events_dispatched(&self) -> u64 {
        self.events_dispatched.load(Ordering::Relaxed)
    }

    pub fn events_dropped(&self) -> u64 {
        self.events_dropped.load(Ordering::Relaxed)
    }

    pub fn callbacks_deferred(&self) -> u64 {
        self.callbacks_deferred.load(Ordering::Relaxed)
    }

    pub fn max_queue_depth(&self) -> usize {
        self.max_queue_depth.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let stats = LoopStats::new();
        for _ in 0..10 {
            stats.increment_posted();
        }
        stats.increment_dispatched();
        stats.increment_dropped();
        stats.increment_deferred();
        assert_eq!(stats.events_posted(), 10);
        assert_eq!(stats.events_dispatched(), 1);
        assert_eq!(stats.events_dropped(), 1);
        assert_eq!(stats.callbacks_deferred(), 1);
    }

    #[test]
    fn depth_keeps_the_maximum() {
        let stats = LoopStats::new();
        stats.observe_depth(4);
        stats.observe_depth(2);
        assert_eq!(stats.max_queue_depth(), 4);
    }
}
