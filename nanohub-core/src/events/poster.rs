//! Cross-thread handle onto the event loop inbox.
//!
//! The inbox is a bounded MPSC channel. Every producer (timer interrupt, PAL callback
//! threads, host commands, nanoapps on the loop thread itself) posts through a clone of the
//! same [`EventPoster`], so tasks are processed in the order they were accepted.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::channel::{Sender, TrySendError};
use thiserror::Error;

use super::event::{Event, SystemCallback};
use super::stats::LoopStats;
use crate::error::fatal_error;
use crate::types::InstanceId;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EventError {
    #[error("Event queue capacity exceeded")]
    QueueFull,
    #[error("Event loop is gone")]
    LoopStopped,
}

/// Tasks accepted but not yet taken by the loop, wherever they sit.
///
/// The loop moves inbox tasks into a local deque when it filters queued work, which frees
/// channel capacity, so admission is counted here rather than by the channel alone.
#[derive(Debug)]
pub(crate) struct QueueBudget {
    capacity: usize,
    queued: AtomicUsize,
}

impl QueueBudget {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity,
            queued: AtomicUsize::new(0),
        }
    }

    /// Claims one slot; the returned value is the depth including the new task.
    fn try_reserve(&self) -> Option<usize> {
        self.queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                (queued < self.capacity).then_some(queued + 1)
            })
            .ok()
            .map(|previous| previous + 1)
    }

    pub(crate) fn release(&self, count: usize) {
        let _ = self
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |queued| {
                Some(queued.saturating_sub(count))
            });
    }

    pub(crate) fn queued(&self) -> usize {
        self.queued.load(Ordering::Acquire)
    }
}

/// One unit of work for the loop thread.
pub(crate) enum LoopTask {
    Event(Event),
    Deferred(SystemCallback),
}

#[derive(Clone)]
pub struct EventPoster {
    inbox: Sender<LoopTask>,
    stop: Sender<()>,
    budget: Arc<QueueBudget>,
    stats: Arc<LoopStats>,
}

impl EventPoster {
    pub(crate) fn new(
        inbox: Sender<LoopTask>,
        stop: Sender<()>,
        budget: Arc<QueueBudget>,
        stats: Arc<LoopStats>,
    ) -> Self {
        Self {
            inbox,
            stop,
            budget,
            stats,
        }
    }

    fn enqueue(&self, task: LoopTask) -> Result<(), (EventError, LoopTask)> {
        let Some(depth) = self.budget.try_reserve() else {
            return Err((EventError::QueueFull, task));
        };
        match self.inbox.try_send(task) {
            Ok(()) => {
                self.stats.observe_depth(depth);
                Ok(())
            }
            Err(TrySendError::Full(task)) => {
                self.budget.release(1);
                Err((EventError::QueueFull, task))
            }
            Err(TrySendError::Disconnected(task)) => {
                self.budget.release(1);
                Err((EventError::LoopStopped, task))
            }
        }
    }

    /// Enqueues an event. On failure the event's release callback runs before returning.
    pub fn try_post_event(&self, event: Event) -> Result<(), EventError> {
        match self.enqueue(LoopTask::Event(event)) {
            Ok(()) => {
                self.stats.increment_posted();
                Ok(())
            }
            Err((err, task)) => {
                self.stats.increment_dropped();
                if let LoopTask::Event(event) = task {
                    tracing::warn!(
                        event_type = format_args!("0x{:04x}", event.event_type),
                        error = %err,
                        "Dropping event"
                    );
                    event.release();
                }
                Err(err)
            }
        }
    }

    pub fn post_event(&self, event: Event) -> bool {
        self.try_post_event(event).is_ok()
    }

    /// For events whose loss would leave the system in an inconsistent state.
    pub fn post_event_or_die(&self, event: Event) {
        if let Err(err) = self.try_post_event(event) {
            fatal_error!("Failed to post critical event: {}", err);
        }
    }

    /// Schedules `callback` to run on the loop thread, in order with posted events.
    pub fn defer_callback(&self, callback: SystemCallback) -> bool {
        let callback_type = callback.callback_type();
        match self.enqueue(LoopTask::Deferred(callback)) {
            Ok(()) => true,
            Err((err, _)) => {
                tracing::error!(?callback_type, error = %err, "Failed to defer system callback");
                false
            }
        }
    }

    pub fn defer_callback_or_die(&self, callback: SystemCallback) {
        let callback_type = callback.callback_type();
        if !self.defer_callback(callback) {
            fatal_error!("Failed to defer {:?} callback", callback_type);
        }
    }

    /// Asks the loop to unload `instance_id` once it reaches this request.
    pub fn request_unload(&self, instance_id: InstanceId) -> bool {
        self.defer_callback(SystemCallback::UnloadNanoapp(instance_id))
    }

    /// Makes a blocking [`super::EventLoop`] run return after its current task.
    pub fn stop(&self) {
        let _ = self.stop.try_send(());
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Tasks accepted but not yet picked up by the loop.
    pub fn queued(&self) -> usize {
        self.budget.queued()
    }
}
