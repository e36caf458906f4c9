//! Hardware timer driven by virtual time.

use std::time::Duration;

use parking_lot::Mutex;

use nanohub_core::time::{ExpiryCallback, SystemTimer};

use crate::virtual_clock::VirtualClock;

/// [`SystemTimer`] whose deadline fires only when the simulation reaches it.
pub struct SimulatedSystemTimer {
    clock: VirtualClock,
    armed: Mutex<Option<(u64, ExpiryCallback)>>,
}

impl SimulatedSystemTimer {
    pub fn new(clock: VirtualClock) -> Self {
        Self {
            clock,
            armed: Mutex::new(None),
        }
    }

    pub fn deadline_ns(&self) -> Option<u64> {
        self.armed.lock().as_ref().map(|(deadline, _)| *deadline)
    }

    /// Runs the expiry callback if the armed deadline is due at the current virtual time.
    pub fn fire_if_due(&self) -> bool {
        let now = self.clock.now_ns();
        let due = {
            let mut armed = self.armed.lock();
            match armed.as_ref() {
                Some((deadline, _)) if *deadline <= now => armed.take(),
                _ => None,
            }
        };
        match due {
            Some((_, on_expiry)) => {
                on_expiry();
                true
            }
            None => false,
        }
    }
}

impl SystemTimer for SimulatedSystemTimer {
    fn set(&self, delay: Duration, on_expiry: ExpiryCallback) {
        let delay_ns = u64::try_from(delay.as_nanos()).unwrap_or(u64::MAX);
        let deadline = self.clock.now_ns().saturating_add(delay_ns);
        *self.armed.lock() = Some((deadline, on_expiry));
    }

    fn cancel(&self) {
        self.armed.lock().take();
    }

    fn is_active(&self) -> bool {
        self.armed.lock().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn counting(fired: &Arc<AtomicUsize>) -> ExpiryCallback {
        let fired = fired.clone();
        Arc::new(move || {
            fired.fetch_add(1, Ordering::SeqCst);
        })
    }

    #[test]
    fn fires_only_once_deadline_is_reached() {
        let clock = VirtualClock::new(0);
        let timer = SimulatedSystemTimer::new(clock.clone());
        let fired = Arc::new(AtomicUsize::new(0));

        timer.set(Duration::from_millis(5), counting(&fired));
        assert_eq!(timer.deadline_ns(), Some(5_000_000));
        assert!(!timer.fire_if_due());

        clock.advance(Duration::from_millis(5));
        assert!(timer.fire_if_due());
        assert!(!timer.fire_if_due());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!timer.is_active());
    }

    #[test]
    fn rearming_replaces_the_deadline() {
        let clock = VirtualClock::new(0);
        let timer = SimulatedSystemTimer::new(clock.clone());
        let fired = Arc::new(AtomicUsize::new(0));

        timer.set(Duration::from_millis(10), counting(&fired));
        timer.set(Duration::from_millis(2), counting(&fired));
        assert_eq!(timer.deadline_ns(), Some(2_000_000));

        timer.cancel();
        clock.advance(Duration::from_secs(1));
        assert!(!timer.fire_if_due());
        assert_eq!(fired.load(Ordering::SeqCst), 0);
    }
}
