//! Deterministic clock and hardware timer for unit tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::time::{Clock, ExpiryCallback, SystemTimer};

#[derive(Default)]
pub(crate) struct ManualClock {
    now_ns: AtomicU64,
}

impl ManualClock {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn advance(&self, by: Duration) {
        self.now_ns
            .fetch_add(by.as_nanos() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.load(Ordering::SeqCst)
    }
}

pub(crate) struct ManualSystemTimer {
    clock: Arc<ManualClock>,
    armed: Mutex<Option<(u64, ExpiryCallback)>>,
}

impl ManualSystemTimer {
    pub(crate) fn new(clock: Arc<ManualClock>) -> Self {
        Self {
            clock,
            armed: Mutex::new(None),
        }
    }

    pub(crate) fn armed_deadline(&self) -> Option<u64> {
        self.armed.lock().as_ref().map(|(deadline, _)| *deadline)
    }

    /// Invokes the expiry callback if the armed deadline has passed.
    pub(crate) fn fire_if_due(&self, now_ns: u64) -> bool {
        let due = {
            let mut armed = self.armed.lock();
            match armed.as_ref() {
                Some((deadline, _)) if *deadline <= now_ns => armed.take(),
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

impl SystemTimer for ManualSystemTimer {
    fn set(&self, delay: Duration, on_expiry: ExpiryCallback) {
        let deadline = self.clock.now_ns().saturating_add(delay.as_nanos() as u64);
        *self.armed.lock() = Some((deadline, on_expiry));
    }

    fn cancel(&self) {
        self.armed.lock().take();
    }

    fn is_active(&self) -> bool {
        self.armed.lock().is_some()
    }
}

/// Event loop, clock, hardware timer and timer pool wired together for manager tests.
pub(crate) struct Harness {
    pub(crate) event_loop: crate::events::EventLoop,
    pub(crate) clock: Arc<ManualClock>,
    pub(crate) hw: Arc<ManualSystemTimer>,
    pub(crate) ctx: crate::requests::ResourceContext,
}

impl Harness {
    pub(crate) fn new() -> Self {
        let event_loop = crate::events::EventLoop::new(256);
        let clock = Arc::new(ManualClock::new());
        let hw = Arc::new(ManualSystemTimer::new(clock.clone()));
        let timer_pool = Arc::new(crate::time::TimerPool::new(
            crate::time::TimerLimits::from(&nanohub_config::TimerConfig::default()),
            clock.clone(),
            hw.clone(),
            event_loop.poster(),
        ));
        let ctx = crate::requests::ResourceContext {
            timer_pool,
            clock: clock.clone(),
            metrics: None,
        };
        Self {
            event_loop,
            clock,
            hw,
            ctx,
        }
    }

    /// Drains the loop, running timer ticks in place and returning everything else.
    pub(crate) fn drain(&mut self) -> Vec<crate::events::poster::LoopTask> {
        use crate::events::poster::LoopTask;
        use crate::events::SystemCallback;

        let mut out = Vec::new();
        while let Some(task) = self.event_loop.try_next_task() {
            match task {
                LoopTask::Deferred(SystemCallback::TimerPoolTick) => {
                    self.ctx.timer_pool.handle_expired_timers_and_schedule_next();
                }
                other => out.push(other),
            }
        }
        out
    }

    pub(crate) fn advance(&mut self, by: Duration) -> Vec<crate::events::poster::LoopTask> {
        self.clock.advance(by);
        self.hw.fire_if_due(self.clock.now_ns());
        self.drain()
    }
}

/// Payloads of type `T` posted with `event_type`, with their targets.
pub(crate) fn posted<T: Clone + 'static>(
    tasks: &[crate::events::poster::LoopTask],
    event_type: u16,
) -> Vec<(crate::events::EventTarget, T)> {
    tasks
        .iter()
        .filter_map(|task| match task {
            crate::events::poster::LoopTask::Event(event) if event.event_type == event_type => event
                .data
                .downcast_ref::<T>()
                .map(|payload| (event.target, payload.clone())),
            _ => None,
        })
        .collect()
}

/// Handles and callbacks of system timers that expired in `tasks`.
pub(crate) fn expired_system_timers(
    tasks: &[crate::events::poster::LoopTask],
) -> Vec<(crate::types::TimerHandle, crate::events::SystemTimerCallback)> {
    tasks
        .iter()
        .filter_map(|task| match task {
            crate::events::poster::LoopTask::Deferred(
                crate::events::SystemCallback::SystemTimerExpired { handle, callback },
            ) => Some((*handle, *callback)),
            _ => None,
        })
        .collect()
}
