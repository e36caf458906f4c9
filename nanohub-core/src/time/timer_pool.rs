//! ## nanohub-core::time::timer_pool
//! **Timer requests multiplexed onto one hardware timer**
//!
//! Requests are ordered by expiration (ties broken by insertion order) and the hardware timer
//! is always armed for the earliest one. Expiry is never handled on the interrupt path: the
//! hardware callback defers a [`SystemCallback::TimerPoolTick`] and the loop thread collects
//! expired requests, posts their events, and re-arms.
//!
//! All methods are safe to call from any thread. State is guarded by one mutex, and methods
//! with a `_locked` suffix expect it to be held.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use nanohub_config::TimerConfig;
use parking_lot::Mutex;
use thiserror::Error;

use super::system_timer::{ExpiryCallback, SystemTimer};
use super::Clock;
use crate::error::fatal_error;
use crate::events::{Event, EventPoster, SystemCallback, SystemTimerCallback};
use crate::types::{event_type, Cookie, InstanceId, TimerEvent, TimerHandle};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TimerError {
    #[error("Recurring timers need a non-zero duration")]
    ZeroDurationRecurring,

    #[error("System timers need a callback and nanoapp timers must not have one")]
    OwnerCallbackMismatch,

    #[error("Nanoapp timer limit of {0} reached")]
    NanoappLimitReached(usize),

    #[error("Nanoapp {owner} already holds {held} timers and the remaining slots are reserved")]
    FairnessFloor { owner: InstanceId, held: usize },

    #[error("Timer pool is full ({0} requests)")]
    PoolFull(usize),

    #[error("System timer limit of {0} reached")]
    SystemLimitReached(usize),

    #[error("No free timer handle")]
    HandlesExhausted,
}

#[derive(Clone, Copy, Debug)]
pub struct TimerLimits {
    pub max_timer_requests: usize,
    pub max_nanoapp_timers: usize,
    pub reserved_nanoapp_timers: usize,
    pub nanoapp_timer_floor: usize,
}

impl TimerLimits {
    fn max_system_timers(&self) -> usize {
        self.max_timer_requests
            .saturating_sub(self.reserved_nanoapp_timers)
    }
}

impl From<&TimerConfig> for TimerLimits {
    fn from(config: &TimerConfig) -> Self {
        Self {
            max_timer_requests: config.max_timer_requests,
            max_nanoapp_timers: config.max_nanoapp_timers,
            reserved_nanoapp_timers: config.reserved_nanoapp_timers,
            nanoapp_timer_floor: config.nanoapp_timer_floor,
        }
    }
}

#[derive(Clone, Debug)]
struct TimerRequest {
    handle: TimerHandle,
    expiration_ns: u64,
    duration_ns: u64,
    cookie: Cookie,
    system_callback: Option<SystemTimerCallback>,
    one_shot: bool,
    owner: InstanceId,
}

/// Ordering key: expiration, then insertion sequence.
type QueueKey = (u64, u64);

struct TimerQueue {
    requests: BTreeMap<QueueKey, TimerRequest>,
    keys: HashMap<TimerHandle, QueueKey>,
    next_seq: u64,
    last_handle: TimerHandle,
    /// Set once the handle counter wrapped; from then on candidates are checked for reuse.
    must_check_uniqueness: bool,
    nanoapp_timer_count: usize,
}

impl TimerQueue {
    fn new() -> Self {
        Self {
            requests: BTreeMap::new(),
            keys: HashMap::new(),
            next_seq: 0,
            last_handle: TimerHandle::INVALID,
            must_check_uniqueness: false,
            nanoapp_timer_count: 0,
        }
    }

    fn len(&self) -> usize {
        self.requests.len()
    }

    fn system_timer_count(&self) -> usize {
        self.len() - self.nanoapp_timer_count
    }

    fn owned_count_locked(&self, owner: InstanceId) -> usize {
        self.requests
            .values()
            .filter(|request| request.owner == owner)
            .count()
    }

    fn generate_handle_locked(&mut self) -> Option<TimerHandle> {
        let candidate = self.last_handle.0.wrapping_add(1);
        if candidate == TimerHandle::INVALID.0 {
            self.must_check_uniqueness = true;
        }
        if self.must_check_uniqueness {
            return self.generate_unique_handle_locked();
        }
        self.last_handle = TimerHandle(candidate);
        Some(self.last_handle)
    }

    fn generate_unique_handle_locked(&mut self) -> Option<TimerHandle> {
        let mut candidate = self.last_handle.0;
        for _ in 0..u32::MAX {
            candidate = candidate.wrapping_add(1);
            let handle = TimerHandle(candidate);
            if handle.is_valid() && !self.keys.contains_key(&handle) {
                self.last_handle = handle;
                return Some(handle);
            }
        }
        None
    }

    fn is_new_timer_allowed_locked(
        &self,
        owner: InstanceId,
        limits: &TimerLimits,
    ) -> Result<(), TimerError> {
        if owner.is_system() {
            if self.system_timer_count() >= limits.max_system_timers() {
                return Err(TimerError::SystemLimitReached(limits.max_system_timers()));
            }
            return Ok(());
        }

        if self.nanoapp_timer_count >= limits.max_nanoapp_timers {
            return Err(TimerError::NanoappLimitReached(limits.max_nanoapp_timers));
        }
        if self.len() >= limits.max_timer_requests {
            return Err(TimerError::PoolFull(limits.max_timer_requests));
        }

        let held = self.owned_count_locked(owner);
        let free_after = limits.max_nanoapp_timers - self.nanoapp_timer_count - 1;
        if held >= limits.nanoapp_timer_floor && free_after < limits.nanoapp_timer_floor {
            return Err(TimerError::FairnessFloor { owner, held });
        }
        Ok(())
    }

    fn insert_locked(&mut self, request: TimerRequest) {
        let key = (request.expiration_ns, self.next_seq);
        self.next_seq += 1;
        if !request.owner.is_system() {
            self.nanoapp_timer_count += 1;
        }
        self.keys.insert(request.handle, key);
        self.requests.insert(key, request);
    }

    fn remove_locked(&mut self, handle: TimerHandle) -> Option<TimerRequest> {
        let key = self.keys.remove(&handle)?;
        let request = self.requests.remove(&key)?;
        if !request.owner.is_system() {
            self.nanoapp_timer_count -= 1;
        }
        Some(request)
    }

    fn front_locked(&self) -> Option<&TimerRequest> {
        self.requests.values().next()
    }

    fn pop_expired_locked(&mut self, now_ns: u64) -> Option<TimerRequest> {
        let handle = self
            .front_locked()
            .filter(|request| request.expiration_ns <= now_ns)?
            .handle;
        self.remove_locked(handle)
    }
}

/// Expired work collected under the lock and acted upon after it is released.
enum Expiry {
    Nanoapp {
        owner: InstanceId,
        handle: TimerHandle,
        cookie: Cookie,
    },
    System {
        handle: TimerHandle,
        callback: SystemTimerCallback,
    },
}

pub struct TimerPool {
    queue: Mutex<TimerQueue>,
    limits: TimerLimits,
    clock: Arc<dyn Clock>,
    system_timer: Arc<dyn SystemTimer>,
    on_expiry: ExpiryCallback,
    poster: EventPoster,
    dropped_expiries: AtomicU64,
}

impl TimerPool {
    pub fn new(
        limits: TimerLimits,
        clock: Arc<dyn Clock>,
        system_timer: Arc<dyn SystemTimer>,
        poster: EventPoster,
    ) -> Self {
        let tick_poster = poster.clone();
        let on_expiry: ExpiryCallback =
            Arc::new(move || tick_poster.defer_callback_or_die(SystemCallback::TimerPoolTick));
        Self {
            queue: Mutex::new(TimerQueue::new()),
            limits,
            clock,
            system_timer,
            on_expiry,
            poster,
            dropped_expiries: AtomicU64::new(0),
        }
    }

    /// Requests a timer for a nanoapp. Returns [`TimerHandle::INVALID`] if refused.
    pub fn set_nanoapp_timer(
        &self,
        owner: InstanceId,
        duration: Duration,
        cookie: Cookie,
        one_shot: bool,
    ) -> TimerHandle {
        match self.try_set_timer(owner, duration, cookie, None, one_shot) {
            Ok(handle) => handle,
            Err(err) => {
                tracing::warn!(%owner, error = %err, "Timer request refused");
                TimerHandle::INVALID
            }
        }
    }

    /// Requests a one-shot timer whose expiry defers `callback` onto the loop.
    ///
    /// The system relies on its own timers, so exhaustion is fatal.
    pub fn set_system_timer(
        &self,
        duration: Duration,
        callback: SystemTimerCallback,
    ) -> TimerHandle {
        match self.try_set_timer(InstanceId::SYSTEM, duration, Cookie::NONE, Some(callback), true) {
            Ok(handle) => handle,
            Err(err) => fatal_error!("Failed to set system timer for {:?}: {}", callback, err),
        }
    }

    pub fn try_set_timer(
        &self,
        owner: InstanceId,
        duration: Duration,
        cookie: Cookie,
        system_callback: Option<SystemTimerCallback>,
        one_shot: bool,
    ) -> Result<TimerHandle, TimerError> {
        if owner.is_system() != system_callback.is_some() {
            return Err(TimerError::OwnerCallbackMismatch);
        }
        let duration_ns = u64::try_from(duration.as_nanos()).unwrap_or(u64::MAX);
        if !one_shot && duration_ns == 0 {
            return Err(TimerError::ZeroDurationRecurring);
        }

        let mut queue = self.queue.lock();
        queue.is_new_timer_allowed_locked(owner, &self.limits)?;
        let handle = queue
            .generate_handle_locked()
            .ok_or(TimerError::HandlesExhausted)?;

        let now = self.clock.now_ns();
        let earliest_before = queue.front_locked().map(|request| request.handle);
        queue.insert_locked(TimerRequest {
            handle,
            expiration_ns: now.saturating_add(duration_ns),
            duration_ns,
            cookie,
            system_callback,
            one_shot,
            owner,
        });

        if queue.front_locked().map(|request| request.handle) != earliest_before {
            self.schedule_next_locked(&queue, now);
        }
        tracing::trace!(%owner, %handle, duration_ns, one_shot, "Timer set");
        Ok(handle)
    }

    /// Cancels a nanoapp timer. `false` if the handle is unknown or owned by someone else.
    pub fn cancel_nanoapp_timer(&self, owner: InstanceId, handle: TimerHandle) -> bool {
        self.cancel_timer(owner, handle)
    }

    pub fn cancel_system_timer(&self, handle: TimerHandle) -> bool {
        self.cancel_timer(InstanceId::SYSTEM, handle)
    }

    fn cancel_timer(&self, owner: InstanceId, handle: TimerHandle) -> bool {
        if !handle.is_valid() {
            return false;
        }
        let mut queue = self.queue.lock();
        let Some(key) = queue.keys.get(&handle).copied() else {
            return false;
        };
        let owned = queue
            .requests
            .get(&key)
            .is_some_and(|request| request.owner == owner);
        if !owned {
            return false;
        }

        let was_front = queue.front_locked().map(|request| request.handle) == Some(handle);
        queue.remove_locked(handle);
        if was_front {
            let now = self.clock.now_ns();
            self.schedule_next_locked(&queue, now);
        }
        true
    }

    /// Cancels every timer owned by `owner`; returns how many were removed.
    pub fn cancel_all_owned_by(&self, owner: InstanceId) -> usize {
        let mut queue = self.queue.lock();
        let front_before = queue.front_locked().map(|request| request.handle);
        let owned: Vec<TimerHandle> = queue
            .requests
            .values()
            .filter(|request| request.owner == owner)
            .map(|request| request.handle)
            .collect();
        for handle in &owned {
            queue.remove_locked(*handle);
        }
        if queue.front_locked().map(|request| request.handle) != front_before {
            let now = self.clock.now_ns();
            self.schedule_next_locked(&queue, now);
        }
        owned.len()
    }

    /// Runs on the loop thread for every [`SystemCallback::TimerPoolTick`]. Posts an event or
    /// defers a callback for each expired request, reschedules recurring ones, and re-arms
    /// the hardware timer. Returns the number of requests that fired.
    pub fn handle_expired_timers_and_schedule_next(&self) -> usize {
        let mut expired = Vec::new();
        {
            let mut queue = self.queue.lock();
            let now = self.clock.now_ns();
            while let Some(mut request) = queue.pop_expired_locked(now) {
                expired.push(match request.system_callback {
                    Some(callback) => Expiry::System {
                        handle: request.handle,
                        callback,
                    },
                    None => Expiry::Nanoapp {
                        owner: request.owner,
                        handle: request.handle,
                        cookie: request.cookie,
                    },
                });
                if !request.one_shot {
                    request.expiration_ns =
                        request.expiration_ns.saturating_add(request.duration_ns);
                    queue.insert_locked(request);
                }
            }
            self.schedule_next_locked(&queue, now);
        }

        let fired = expired.len();
        for expiry in expired {
            match expiry {
                Expiry::Nanoapp {
                    owner,
                    handle,
                    cookie,
                } => {
                    let event =
                        Event::targeted(event_type::TIMER, TimerEvent { handle, cookie }, owner);
                    if !self.poster.post_event(event) {
                        self.dropped_expiries.fetch_add(1, Ordering::Relaxed);
                        tracing::error!(%owner, %handle, "Failed to post timer event");
                    }
                }
                Expiry::System { handle, callback } => {
                    self.poster.defer_callback_or_die(SystemCallback::SystemTimerExpired {
                        handle,
                        callback,
                    });
                }
            }
        }
        fired
    }

    /// Nanoapp expiries lost because the event queue was full.
    pub fn dropped_expiry_count(&self) -> u64 {
        self.dropped_expiries.load(Ordering::Relaxed)
    }

    fn schedule_next_locked(&self, queue: &TimerQueue, now_ns: u64) {
        match queue.front_locked() {
            Some(front) if front.expiration_ns != u64::MAX => {
                let delay = Duration::from_nanos(front.expiration_ns.saturating_sub(now_ns));
                self.system_timer.set(delay, self.on_expiry.clone());
            }
            _ => self.system_timer.cancel(),
        }
    }

    pub fn active_timer_count(&self) -> usize {
        self.queue.lock().len()
    }

    pub fn nanoapp_timer_count(&self) -> usize {
        self.queue.lock().nanoapp_timer_count
    }

    pub fn timers_owned_by(&self, owner: InstanceId) -> usize {
        self.queue.lock().owned_count_locked(owner)
    }

    pub fn has_nanoapp_timers(&self, owner: InstanceId) -> bool {
        self.timers_owned_by(owner) > 0
    }

    pub fn expiration_of(&self, handle: TimerHandle) -> Option<u64> {
        let queue = self.queue.lock();
        queue.keys.get(&handle).map(|(expiration, _)| *expiration)
    }

    pub fn next_expiration_ns(&self) -> Option<u64> {
        self.queue
            .lock()
            .front_locked()
            .map(|request| request.expiration_ns)
    }

    pub fn limits(&self) -> TimerLimits {
        self.limits
    }

    /// Moves the handle counter, for exercising wrap-around without issuing 2^32 timers.
    pub fn fast_forward_handles(&self, last_handle: TimerHandle) {
        self.queue.lock().last_handle = last_handle;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventLoop;
    use crate::events::poster::LoopTask;
    use crate::test_support::{ManualClock, ManualSystemTimer};
    use proptest::prelude::*;

    const APP: InstanceId = InstanceId(1);
    const OTHER: InstanceId = InstanceId(2);

    struct Fixture {
        event_loop: EventLoop,
        clock: Arc<ManualClock>,
        hw: Arc<ManualSystemTimer>,
        pool: TimerPool,
    }

    fn fixture_with(limits: TimerLimits) -> Fixture {
        let event_loop = EventLoop::new(256);
        let clock = Arc::new(ManualClock::new());
        let hw = Arc::new(ManualSystemTimer::new(clock.clone()));
        let pool = TimerPool::new(limits, clock.clone(), hw.clone(), event_loop.poster());
        Fixture {
            event_loop,
            clock,
            hw,
            pool,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(TimerLimits::from(&TimerConfig::default()))
    }

    impl Fixture {
        /// Advances the clock, fires the hardware timer if due, and runs ticks.
        /// Returns the timer events and system callbacks that came out.
        fn advance(&mut self, by: Duration) -> Vec<LoopTask> {
            self.clock.advance(by);
            self.hw.fire_if_due(self.clock.now_ns());
            let mut out = Vec::new();
            while let Some(task) = self.event_loop.try_next_task() {
                match task {
                    LoopTask::Deferred(SystemCallback::TimerPoolTick) => {
                        self.pool.handle_expired_timers_and_schedule_next();
                    }
                    other => out.push(other),
                }
            }
            out
        }
    }

    fn timer_events(tasks: &[LoopTask]) -> Vec<(InstanceId, TimerHandle)> {
        tasks
            .iter()
            .filter_map(|task| match task {
                LoopTask::Event(event) => {
                    let payload = event.data.downcast_ref::<TimerEvent>()?;
                    match event.target {
                        crate::events::EventTarget::Instance(owner) => Some((owner, payload.handle)),
                        _ => None,
                    }
                }
                _ => None,
            })
            .collect()
    }

    #[test]
    fn one_shot_fires_once_at_deadline() {
        let mut f = fixture();
        let handle = f
            .pool
            .set_nanoapp_timer(APP, Duration::from_millis(100), Cookie(7), true);
        assert!(handle.is_valid());
        assert_eq!(f.hw.armed_deadline(), Some(100_000_000));

        assert!(timer_events(&f.advance(Duration::from_millis(99))).is_empty());
        let fired = f.advance(Duration::from_millis(1));
        assert_eq!(timer_events(&fired), vec![(APP, handle)]);
        assert!(timer_events(&f.advance(Duration::from_secs(1))).is_empty());
        assert_eq!(f.pool.active_timer_count(), 0);
        assert_eq!(f.hw.armed_deadline(), None);
    }

    #[test]
    fn recurring_timer_does_not_drift() {
        let mut f = fixture();
        let handle = f
            .pool
            .set_nanoapp_timer(APP, Duration::from_millis(10), Cookie::NONE, false);
        f.advance(Duration::from_millis(13));
        assert_eq!(f.pool.expiration_of(handle), Some(20_000_000));
        f.advance(Duration::from_millis(7));
        assert_eq!(f.pool.expiration_of(handle), Some(30_000_000));
    }

    #[test]
    fn recurring_timer_catches_up_on_missed_periods() {
        let mut f = fixture();
        let handle = f
            .pool
            .set_nanoapp_timer(APP, Duration::from_millis(10), Cookie::NONE, false);

        // One tick covers a full second of missed deadlines.
        let fired = timer_events(&f.advance(Duration::from_secs(1)));
        assert_eq!(fired.len(), 100);
        assert!(fired.iter().all(|fire| *fire == (APP, handle)));
        assert_eq!(f.pool.expiration_of(handle), Some(1_010_000_000));
        assert_eq!(f.hw.armed_deadline(), Some(1_010_000_000));
        assert_eq!(f.pool.dropped_expiry_count(), 0);
    }

    #[test]
    fn expiries_that_overflow_the_queue_are_counted() {
        let event_loop = EventLoop::new(8);
        let clock = Arc::new(ManualClock::new());
        let hw = Arc::new(ManualSystemTimer::new(clock.clone()));
        let pool = TimerPool::new(
            TimerLimits::from(&TimerConfig::default()),
            clock.clone(),
            hw.clone(),
            event_loop.poster(),
        );
        pool.set_nanoapp_timer(APP, Duration::from_millis(1), Cookie::NONE, false);

        clock.advance(Duration::from_millis(20));
        assert_eq!(pool.handle_expired_timers_and_schedule_next(), 20);
        assert_eq!(event_loop.queued_tasks(), 8);
        assert_eq!(pool.dropped_expiry_count(), 12);
        assert_eq!(event_loop.stats().events_dropped(), 12);
    }

    #[test]
    fn zero_duration_recurring_is_rejected() {
        let f = fixture();
        assert_eq!(
            f.pool
                .try_set_timer(APP, Duration::ZERO, Cookie::NONE, None, false),
            Err(TimerError::ZeroDurationRecurring)
        );
        assert!(f
            .pool
            .set_nanoapp_timer(APP, Duration::ZERO, Cookie::NONE, true)
            .is_valid());
    }

    #[test]
    fn zero_duration_one_shot_fires_on_next_tick_not_synchronously() {
        let mut f = fixture();
        let handle = f.pool.set_nanoapp_timer(APP, Duration::ZERO, Cookie::NONE, true);
        assert_eq!(f.event_loop.queued_tasks(), 0);
        assert_eq!(timer_events(&f.advance(Duration::ZERO)), vec![(APP, handle)]);
    }

    #[test]
    fn cancel_removes_and_rearms() {
        let mut f = fixture();
        let early = f.pool.set_nanoapp_timer(APP, Duration::from_millis(5), Cookie::NONE, true);
        let late = f.pool.set_nanoapp_timer(APP, Duration::from_millis(50), Cookie::NONE, true);
        assert_eq!(f.hw.armed_deadline(), Some(5_000_000));

        assert!(f.pool.cancel_nanoapp_timer(APP, early));
        assert_eq!(f.hw.armed_deadline(), Some(50_000_000));
        assert!(!f.pool.cancel_nanoapp_timer(APP, early));
        assert!(!f.pool.cancel_nanoapp_timer(OTHER, late));

        assert!(f.pool.cancel_nanoapp_timer(APP, late));
        assert_eq!(f.hw.armed_deadline(), None);
        assert!(timer_events(&f.advance(Duration::from_secs(1))).is_empty());
    }

    #[test]
    fn cancel_invalid_handle_is_false() {
        let f = fixture();
        assert!(!f.pool.cancel_nanoapp_timer(APP, TimerHandle::INVALID));
        assert!(!f.pool.cancel_nanoapp_timer(APP, TimerHandle(42)));
    }

    #[test]
    fn equal_deadlines_fire_in_insertion_order() {
        let mut f = fixture();
        let a = f.pool.set_nanoapp_timer(APP, Duration::from_millis(10), Cookie::NONE, true);
        let b = f.pool.set_nanoapp_timer(OTHER, Duration::from_millis(10), Cookie::NONE, true);
        let fired = timer_events(&f.advance(Duration::from_millis(10)));
        assert_eq!(fired, vec![(APP, a), (OTHER, b)]);
    }

    #[test]
    fn nanoapp_ceiling_is_enforced() {
        let f = fixture_with(TimerLimits {
            max_timer_requests: 64,
            max_nanoapp_timers: 32,
            reserved_nanoapp_timers: 32,
            nanoapp_timer_floor: 0,
        });
        for _ in 0..32 {
            assert!(f
                .pool
                .set_nanoapp_timer(APP, Duration::from_secs(1), Cookie::NONE, true)
                .is_valid());
        }
        assert_eq!(
            f.pool
                .try_set_timer(OTHER, Duration::from_secs(1), Cookie::NONE, None, true),
            Err(TimerError::NanoappLimitReached(32))
        );
    }

    #[test]
    fn fairness_floor_keeps_slots_for_other_nanoapps() {
        let f = fixture_with(TimerLimits {
            max_timer_requests: 64,
            max_nanoapp_timers: 8,
            reserved_nanoapp_timers: 8,
            nanoapp_timer_floor: 2,
        });
        let granted = (0..8)
            .filter(|_| {
                f.pool
                    .set_nanoapp_timer(APP, Duration::from_secs(1), Cookie::NONE, true)
                    .is_valid()
            })
            .count();
        assert_eq!(granted, 6);
        assert!(matches!(
            f.pool
                .try_set_timer(APP, Duration::from_secs(1), Cookie::NONE, None, true),
            Err(TimerError::FairnessFloor { .. })
        ));
        for _ in 0..2 {
            assert!(f
                .pool
                .set_nanoapp_timer(OTHER, Duration::from_secs(1), Cookie::NONE, true)
                .is_valid());
        }
        assert_eq!(f.pool.nanoapp_timer_count(), 8);
    }

    #[test]
    fn system_timers_keep_reserved_slots_free() {
        let f = fixture();
        let max_system = f.pool.limits().max_system_timers();
        for _ in 0..max_system {
            f.pool
                .set_system_timer(Duration::from_secs(1), SystemTimerCallback::WifiScanRetry);
        }
        assert_eq!(
            f.pool.try_set_timer(
                InstanceId::SYSTEM,
                Duration::from_secs(1),
                Cookie::NONE,
                Some(SystemTimerCallback::WifiScanRetry),
                true
            ),
            Err(TimerError::SystemLimitReached(max_system))
        );
        assert!(f
            .pool
            .set_nanoapp_timer(APP, Duration::from_secs(1), Cookie::NONE, true)
            .is_valid());
    }

    #[test]
    #[should_panic(expected = "Failed to set system timer")]
    fn system_timer_exhaustion_is_fatal() {
        let f = fixture_with(TimerLimits {
            max_timer_requests: 2,
            max_nanoapp_timers: 1,
            reserved_nanoapp_timers: 1,
            nanoapp_timer_floor: 0,
        });
        f.pool
            .set_system_timer(Duration::from_secs(1), SystemTimerCallback::WifiScanTimeout);
        f.pool
            .set_system_timer(Duration::from_secs(1), SystemTimerCallback::WifiScanTimeout);
    }

    #[test]
    fn system_timer_defers_its_callback() {
        let mut f = fixture();
        let handle = f
            .pool
            .set_system_timer(Duration::from_millis(3), SystemTimerCallback::WwanCellInfoTimeout);
        let tasks = f.advance(Duration::from_millis(3));
        assert!(matches!(
            tasks.as_slice(),
            [LoopTask::Deferred(SystemCallback::SystemTimerExpired {
                handle: fired,
                callback: SystemTimerCallback::WwanCellInfoTimeout
            })] if *fired == handle
        ));
    }

    #[test]
    fn cancel_all_owned_by_leaves_other_owners() {
        let f = fixture();
        for _ in 0..3 {
            f.pool.set_nanoapp_timer(APP, Duration::from_secs(1), Cookie::NONE, false);
        }
        f.pool.set_nanoapp_timer(OTHER, Duration::from_secs(1), Cookie::NONE, false);
        assert_eq!(f.pool.cancel_all_owned_by(APP), 3);
        assert!(!f.pool.has_nanoapp_timers(APP));
        assert_eq!(f.pool.timers_owned_by(OTHER), 1);
    }

    #[test]
    fn saturated_deadline_never_arms_hardware() {
        let mut f = fixture();
        f.clock.advance(Duration::from_nanos(10));
        f.pool.set_nanoapp_timer(APP, Duration::MAX, Cookie::NONE, true);
        assert_eq!(f.pool.next_expiration_ns(), Some(u64::MAX));
        assert_eq!(f.hw.armed_deadline(), None);
        assert!(timer_events(&f.advance(Duration::from_secs(3600))).is_empty());
    }

    #[test]
    fn handles_stay_unique_after_wrap() {
        let f = fixture();
        f.pool.fast_forward_handles(TimerHandle(u32::MAX - 3));
        let a = f.pool.set_nanoapp_timer(APP, Duration::from_secs(1), Cookie::NONE, true);
        let b = f.pool.set_nanoapp_timer(APP, Duration::from_secs(1), Cookie::NONE, true);
        assert_eq!(a, TimerHandle(u32::MAX - 2));
        assert_eq!(b, TimerHandle(u32::MAX - 1));

        let c = f.pool.set_nanoapp_timer(APP, Duration::from_secs(1), Cookie::NONE, true);
        assert_eq!(c, TimerHandle(0));

        f.pool.fast_forward_handles(TimerHandle(u32::MAX - 3));
        let d = f.pool.set_nanoapp_timer(APP, Duration::from_secs(1), Cookie::NONE, true);
        assert_eq!(d, TimerHandle(1));
    }

    proptest! {
        #[test]
        fn timers_fire_in_deadline_order(delays in proptest::collection::vec(1u64..1_000, 1..24)) {
            let mut f = fixture();
            let mut expected: Vec<(u64, usize, TimerHandle)> = delays
                .iter()
                .enumerate()
                .map(|(i, ms)| {
                    let handle = f.pool.set_nanoapp_timer(APP, Duration::from_millis(*ms), Cookie(i as u64), true);
                    (*ms, i, handle)
                })
                .collect();
            expected.sort();

            let mut fired = Vec::new();
            for _ in 0..1_000 {
                fired.extend(timer_events(&f.advance(Duration::from_millis(1))));
            }
            let expected: Vec<_> = expected.into_iter().map(|(_, _, handle)| (APP, handle)).collect();
            prop_assert_eq!(fired, expected);
        }
    }
}
