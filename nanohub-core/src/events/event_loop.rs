//! The loop-owned side of the event queue, plus the registry of loaded nanoapps.
//!
//! Tasks arrive on the bounded inbox. The loop keeps a local `pending` deque in front of it
//! so it can drain the inbox and filter queued work (nanoapp unload, timer cancellation)
//! without losing FIFO order.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use crossbeam::channel::{bounded, Receiver};

use super::event::{Event, EventTarget};
use super::poster::{EventPoster, LoopTask, QueueBudget};
use super::stats::LoopStats;
use crate::error::RuntimeError;
use crate::nanoapp::{Nanoapp, NanoappHandler, NanoappPermissions};
use crate::types::InstanceId;

pub struct EventLoop {
    inbox: Receiver<LoopTask>,
    stop: Receiver<()>,
    pending: VecDeque<LoopTask>,
    poster: EventPoster,
    budget: Arc<QueueBudget>,
    stats: Arc<LoopStats>,
    nanoapps: BTreeMap<InstanceId, Nanoapp>,
    next_instance_id: u16,
}

impl EventLoop {
    pub fn new(queue_capacity: usize) -> Self {
        let (inbox_tx, inbox) = bounded(queue_capacity);
        let (stop_tx, stop) = bounded(1);
        let stats = Arc::new(LoopStats::new());
        let budget = Arc::new(QueueBudget::new(queue_capacity));
        Self {
            inbox,
            stop,
            pending: VecDeque::new(),
            poster: EventPoster::new(inbox_tx, stop_tx, budget.clone(), stats.clone()),
            budget,
            stats,
            nanoapps: BTreeMap::new(),
            next_instance_id: 1,
        }
    }

    /// A handle producers on any thread can post through.
    pub fn poster(&self) -> EventPoster {
        self.poster.clone()
    }

    pub fn post_event(&self, event: Event) -> bool {
        self.poster.post_event(event)
    }

    pub fn post_event_or_die(&self, event: Event) {
        self.poster.post_event_or_die(event)
    }

    pub fn stats(&self) -> &LoopStats {
        &self.stats
    }

    /// Queued tasks, whether still in the inbox or already drained locally.
    pub fn queued_tasks(&self) -> usize {
        self.budget.queued()
    }

    fn taken(&self, task: Option<LoopTask>) -> Option<LoopTask> {
        if task.is_some() {
            self.budget.release(1);
        }
        task
    }

    pub(crate) fn try_next_task(&mut self) -> Option<LoopTask> {
        let task = self
            .pending
            .pop_front()
            .or_else(|| self.inbox.try_recv().ok());
        self.taken(task)
    }

    /// Blocks until a task is available; `None` once [`EventPoster::stop`] was called.
    pub(crate) fn wait_for_task(&mut self) -> Option<LoopTask> {
        if self.stop.try_recv().is_ok() {
            return None;
        }
        if let Some(task) = self.pending.pop_front() {
            return self.taken(Some(task));
        }
        let task = crossbeam::select! {
            recv(self.inbox) -> task => task.ok(),
            recv(self.stop) -> _ => None,
        };
        self.taken(task)
    }

    fn drain_inbox(&mut self) {
        while let Ok(task) = self.inbox.try_recv() {
            self.pending.push_back(task);
        }
    }

    /// Removes queued events matching `predicate`, running their release callbacks.
    pub fn discard_queued_events<F>(&mut self, mut predicate: F) -> usize
    where
        F: FnMut(&Event) -> bool,
    {
        self.drain_inbox();
        let mut discarded = Vec::new();
        let mut kept = VecDeque::with_capacity(self.pending.len());
        for task in self.pending.drain(..) {
            match task {
                LoopTask::Event(event) if predicate(&event) => discarded.push(event),
                other => kept.push_back(other),
            }
        }
        self.pending = kept;

        let count = discarded.len();
        self.budget.release(count);
        for event in discarded {
            self.stats.increment_dropped();
            event.release();
        }
        count
    }

    /// Drops every queued event addressed to `instance_id`.
    pub(crate) fn purge_events_for(&mut self, instance_id: InstanceId) -> usize {
        self.discard_queued_events(|event| event.target.is_targeted_at(instance_id))
    }

    /// Instance ids that should receive `event`, in ascending order.
    pub(crate) fn recipients(&self, event: &Event) -> Vec<InstanceId> {
        match event.target {
            EventTarget::Instance(id) => self
                .nanoapps
                .contains_key(&id)
                .then_some(id)
                .into_iter()
                .collect(),
            EventTarget::Broadcast => self
                .nanoapps
                .values()
                .filter(|app| app.is_registered_for_broadcast_event(event.event_type))
                .map(Nanoapp::instance_id)
                .collect(),
        }
    }

    fn allocate_instance_id(&mut self) -> Option<InstanceId> {
        let usable = (u16::MAX - 1) as usize;
        for _ in 0..usable {
            let candidate = InstanceId(self.next_instance_id);
            self.next_instance_id = match self.next_instance_id {
                n if n >= u16::MAX - 1 => 1,
                n => n + 1,
            };
            if !self.nanoapps.contains_key(&candidate) {
                return Some(candidate);
            }
        }
        None
    }

    pub(crate) fn register_nanoapp(
        &mut self,
        app_id: u64,
        permissions: NanoappPermissions,
        handler: Box<dyn NanoappHandler>,
    ) -> Result<InstanceId, RuntimeError> {
        if self.find_nanoapp_by_app_id(app_id).is_some() {
            return Err(RuntimeError::DuplicateAppId(app_id));
        }
        let instance_id = self
            .allocate_instance_id()
            .ok_or(RuntimeError::InstanceIdsExhausted)?;
        self.nanoapps
            .insert(instance_id, Nanoapp::new(app_id, instance_id, permissions, handler));
        Ok(instance_id)
    }

    pub(crate) fn remove_nanoapp(&mut self, instance_id: InstanceId) -> Option<Nanoapp> {
        self.nanoapps.remove(&instance_id)
    }

    pub fn find_nanoapp_by_instance_id(&self, instance_id: InstanceId) -> Option<&Nanoapp> {
        self.nanoapps.get(&instance_id)
    }

    pub fn find_nanoapp_by_app_id(&self, app_id: u64) -> Option<&Nanoapp> {
        self.nanoapps.values().find(|app| app.app_id() == app_id)
    }

    pub fn nanoapp_mut(&mut self, instance_id: InstanceId) -> Option<&mut Nanoapp> {
        self.nanoapps.get_mut(&instance_id)
    }

    pub fn nanoapps(&self) -> impl Iterator<Item = &Nanoapp> {
        self.nanoapps.values()
    }

    pub fn nanoapp_count(&self) -> usize {
        self.nanoapps.len()
    }

    /// Registers `instance_id` for a broadcast event type; `false` if the nanoapp is unknown.
    pub fn subscribe(&mut self, instance_id: InstanceId, event_type: u16) -> bool {
        match self.nanoapps.get_mut(&instance_id) {
            Some(app) => {
                app.register_for_broadcast_event(event_type);
                true
            }
            None => false,
        }
    }

    pub fn unsubscribe(&mut self, instance_id: InstanceId, event_type: u16) -> bool {
        match self.nanoapps.get_mut(&instance_id) {
            Some(app) => {
                app.unregister_for_broadcast_event(event_type);
                true
            }
            None => false,
        }
    }
}
