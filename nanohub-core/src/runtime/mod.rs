//! ## nanohub-core::runtime
//! **The runtime context: event loop plus the services nanoapps reach through it**
//!
//! One [`Runtime`] owns everything; there is no global state, so several runtimes can coexist
//! in one process. The loop thread calls [`Runtime::run`] (or [`Runtime::run_until_idle`] under
//! simulation); other threads only hold [`EventPoster`] clones and the PAL callback handles.

use std::fmt::Write;
use std::sync::Arc;
use std::time::Instant;

use nanohub_telemetry::{EventLogger, MetricsRecorder};
use opentelemetry::KeyValue;
use tracing::instrument;

use crate::alloc::MemoryManager;
use crate::error::RuntimeError;
use crate::events::poster::LoopTask;
use crate::events::{
    Event, EventLoop, EventPoster, EventTarget, SystemCallback, SystemTimerCallback,
};
use crate::nanoapp::{NanoappHandler, NanoappPermissions};
use crate::requests::{GnssManager, WifiRequestManager, WwanRequestManager};
use crate::time::{Clock, TimerPool};
use crate::types::{event_type, InstanceId, NanoappInfo, TimerHandle};

mod api;
mod builder;

pub use api::NanoappApi;
pub use builder::RuntimeBuilder;

/// Everything besides the event loop that a handler may touch.
pub(crate) struct Services {
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) timer_pool: Arc<TimerPool>,
    pub(crate) memory: Arc<MemoryManager>,
    pub(crate) wifi: WifiRequestManager,
    pub(crate) wwan: WwanRequestManager,
    pub(crate) gnss: GnssManager,
    pub(crate) metrics: Option<MetricsRecorder>,
}

impl Services {
    pub(crate) fn update_heap_gauge(&self) {
        if let Some(metrics) = &self.metrics {
            metrics
                .heap_bytes
                .set(i64::try_from(self.memory.total_allocated_bytes()).unwrap_or(i64::MAX));
        }
    }

    fn handle_system_timer(
        &mut self,
        event_loop: &mut EventLoop,
        handle: TimerHandle,
        callback: SystemTimerCallback,
    ) {
        match callback {
            SystemTimerCallback::WifiScanRetry => self.wifi.handle_scan_retry(event_loop, handle),
            SystemTimerCallback::WifiScanTimeout => {
                self.wifi.handle_scan_timeout(event_loop, handle)
            }
            SystemTimerCallback::WifiRangingTimeout => {
                self.wifi.handle_ranging_timeout(event_loop, handle)
            }
            SystemTimerCallback::WwanCellInfoTimeout => {
                self.wwan.handle_cell_info_timeout(event_loop, handle)
            }
            SystemTimerCallback::GnssLocationSessionTimeout => {
                self.gnss.handle_location_timeout(event_loop, handle)
            }
            SystemTimerCallback::GnssMeasurementSessionTimeout => {
                self.gnss.handle_measurement_timeout(event_loop, handle)
            }
        }
    }
}

pub struct Runtime {
    event_loop: EventLoop,
    services: Services,
}

impl Runtime {
    pub fn builder(config: &nanohub_config::HubConfig) -> RuntimeBuilder {
        RuntimeBuilder::new(config)
    }

    /// Registers a nanoapp and runs its `start` entry point.
    ///
    /// A nanoapp whose `start` returns `false` is cleaned up as if unloaded and never becomes
    /// visible to others.
    #[instrument(skip(self, handler))]
    pub fn load_nanoapp(
        &mut self,
        app_id: u64,
        permissions: NanoappPermissions,
        handler: Box<dyn NanoappHandler>,
    ) -> Result<InstanceId, RuntimeError> {
        let instance_id = self
            .event_loop
            .register_nanoapp(app_id, permissions, handler)?;

        let started = self
            .with_handler(instance_id, |handler, api| handler.start(api))
            .unwrap_or(false);
        if !started {
            tracing::warn!(%instance_id, "Nanoapp start failed");
            self.release_resources(instance_id);
            EventLogger::log_lifecycle("start_failed", &lifecycle_attributes(app_id, instance_id));
            return Err(RuntimeError::StartFailed(app_id));
        }

        EventLogger::log_lifecycle("load", &lifecycle_attributes(app_id, instance_id));
        self.event_loop.post_event(Event::broadcast(
            event_type::NANOAPP_STARTED,
            NanoappInfo {
                app_id,
                instance_id,
            },
        ));
        Ok(instance_id)
    }

    /// Runs the nanoapp's `end` entry point, then reclaims everything it held: timers, heap
    /// blocks, pending resource requests and queued events.
    #[instrument(skip(self))]
    pub fn unload_nanoapp(&mut self, instance_id: InstanceId) -> Result<(), RuntimeError> {
        let app_id = self
            .event_loop
            .find_nanoapp_by_instance_id(instance_id)
            .map(|app| app.app_id())
            .ok_or(RuntimeError::NanoappNotFound(instance_id))?;

        self.with_handler(instance_id, |handler, api| handler.end(api));
        self.release_resources(instance_id);

        EventLogger::log_lifecycle("unload", &lifecycle_attributes(app_id, instance_id));
        self.event_loop.post_event(Event::broadcast(
            event_type::NANOAPP_STOPPED,
            NanoappInfo {
                app_id,
                instance_id,
            },
        ));
        Ok(())
    }

    fn release_resources(&mut self, instance_id: InstanceId) {
        let timers = self.services.timer_pool.cancel_all_owned_by(instance_id);
        let leaked = self.services.memory.free_all_owned_by(instance_id);
        if !leaked.is_empty() {
            tracing::warn!(
                %instance_id,
                bytes = leaked.bytes,
                blocks = leaked.count,
                "Nanoapp unloaded without freeing its heap"
            );
        }
        self.services.update_heap_gauge();

        self.services.wifi.on_nanoapp_unloaded(instance_id);
        self.services.wwan.on_nanoapp_unloaded(instance_id);
        self.services.gnss.on_nanoapp_unloaded(instance_id);

        let purged = self.event_loop.purge_events_for(instance_id);
        if let Some(metrics) = &self.services.metrics {
            metrics.events_dropped.inc_by(purged as u64);
        }
        self.event_loop.remove_nanoapp(instance_id);
        tracing::debug!(%instance_id, timers, purged, "Nanoapp resources released");
    }

    /// Takes the handler out of the registry for the duration of `f`.
    fn with_handler<R>(
        &mut self,
        instance_id: InstanceId,
        f: impl FnOnce(&mut dyn NanoappHandler, &mut NanoappApi<'_>) -> R,
    ) -> Option<R> {
        let mut handler = self.event_loop.nanoapp_mut(instance_id)?.take_handler()?;
        let result = {
            let mut api = NanoappApi::new(instance_id, &mut self.event_loop, &mut self.services);
            f(handler.as_mut(), &mut api)
        };
        if let Some(app) = self.event_loop.nanoapp_mut(instance_id) {
            app.restore_handler(handler);
        }
        Some(result)
    }

    /// Blocks, processing tasks until [`EventPoster::stop`] is called.
    #[instrument(skip(self))]
    pub fn run(&mut self) {
        tracing::info!("Event loop running");
        while let Some(task) = self.event_loop.wait_for_task() {
            self.process_task(task);
        }
        tracing::info!("Event loop stopped");
    }

    /// Processes one queued task, if any.
    pub fn run_once(&mut self) -> bool {
        match self.event_loop.try_next_task() {
            Some(task) => {
                self.process_task(task);
                true
            }
            None => false,
        }
    }

    /// Processes tasks until the queue is empty, including tasks queued along the way.
    pub fn run_until_idle(&mut self) -> usize {
        let mut processed = 0;
        while self.run_once() {
            processed += 1;
        }
        processed
    }

    fn process_task(&mut self, task: LoopTask) {
        let started = self.services.metrics.as_ref().map(|_| Instant::now());
        match task {
            LoopTask::Event(event) => self.deliver_event(event),
            LoopTask::Deferred(callback) => {
                self.event_loop.stats().increment_deferred();
                if let Some(metrics) = &self.services.metrics {
                    metrics.deferred_callbacks.inc();
                }
                self.handle_system_callback(callback);
            }
        }
        if let (Some(metrics), Some(started)) = (&self.services.metrics, started) {
            metrics
                .dispatch_latency
                .observe(started.elapsed().as_nanos() as f64);
        }
    }

    fn deliver_event(&mut self, event: Event) {
        let recipients = self.event_loop.recipients(&event);
        if recipients.is_empty() {
            if let EventTarget::Instance(instance_id) = event.target {
                tracing::warn!(
                    %instance_id,
                    event_type = format_args!("0x{:04x}", event.event_type),
                    "Dropping event for unknown nanoapp"
                );
                self.event_loop.stats().increment_dropped();
                if let Some(metrics) = &self.services.metrics {
                    metrics.events_dropped.inc();
                }
            }
            event.release();
            return;
        }

        for instance_id in recipients {
            let delivered = self.with_handler(instance_id, |handler, api| {
                handler.handle_event(api, event.sender, event.event_type, &*event.data)
            });
            if delivered.is_none() {
                tracing::error!(%instance_id, "Nanoapp handler unavailable during dispatch");
            }
        }
        self.event_loop.stats().increment_dispatched();
        if let Some(metrics) = &self.services.metrics {
            metrics.events_dispatched.inc();
        }
        event.release();
    }

    fn handle_system_callback(&mut self, callback: SystemCallback) {
        tracing::trace!(callback_type = ?callback.callback_type(), "Running system callback");
        match callback {
            SystemCallback::TimerPoolTick => {
                let fired = self
                    .services
                    .timer_pool
                    .handle_expired_timers_and_schedule_next();
                if let Some(metrics) = &self.services.metrics {
                    metrics.timers_fired.inc_by(fired as u64);
                }
            }
            SystemCallback::SystemTimerExpired { handle, callback } => {
                self.services
                    .handle_system_timer(&mut self.event_loop, handle, callback)
            }
            SystemCallback::Wifi(event) => {
                self.services.wifi.handle_pal_event(&mut self.event_loop, event)
            }
            SystemCallback::Wwan(event) => {
                self.services.wwan.handle_pal_event(&mut self.event_loop, event)
            }
            SystemCallback::Gnss(event) => {
                self.services.gnss.handle_pal_event(&mut self.event_loop, event)
            }
            SystemCallback::UnloadNanoapp(instance_id) => {
                if let Err(err) = self.unload_nanoapp(instance_id) {
                    tracing::warn!(error = %err, "Deferred unload skipped");
                }
            }
        }
    }

    /// Unloads every nanoapp and closes the PALs.
    #[instrument(skip(self))]
    pub fn shutdown(&mut self) {
        let loaded: Vec<InstanceId> = self
            .event_loop
            .nanoapps()
            .map(|app| app.instance_id())
            .collect();
        for instance_id in loaded {
            if let Err(err) = self.unload_nanoapp(instance_id) {
                tracing::warn!(error = %err, "Unload during shutdown failed");
            }
        }
        self.services.wifi.deinit();
        self.services.wwan.deinit();
        self.services.gnss.deinit();
    }

    pub fn poster(&self) -> EventPoster {
        self.event_loop.poster()
    }

    pub fn event_loop(&self) -> &EventLoop {
        &self.event_loop
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.services.clock
    }

    pub fn timer_pool(&self) -> &Arc<TimerPool> {
        &self.services.timer_pool
    }

    pub fn memory(&self) -> &Arc<MemoryManager> {
        &self.services.memory
    }

    pub fn wifi(&self) -> &WifiRequestManager {
        &self.services.wifi
    }

    pub fn wwan(&self) -> &WwanRequestManager {
        &self.services.wwan
    }

    pub fn gnss(&self) -> &GnssManager {
        &self.services.gnss
    }

    pub fn metrics(&self) -> Option<&MetricsRecorder> {
        self.services.metrics.as_ref()
    }

    /// Human-readable state of the loop and every manager.
    pub fn debug_dump(&self) -> String {
        let stats = self.event_loop.stats();
        let mut out = String::new();
        let _ = writeln!(
            out,
            "Event loop: queued={} posted={} dispatched={} dropped={} deferred={} max_depth={}",
            self.event_loop.queued_tasks(),
            stats.events_posted(),
            stats.events_dispatched(),
            stats.events_dropped(),
            stats.callbacks_deferred(),
            stats.max_queue_depth()
        );
        let _ = writeln!(out, "Nanoapps:");
        for app in self.event_loop.nanoapps() {
            let usage = self.services.memory.usage_of(app.instance_id());
            let _ = writeln!(
                out,
                " instance={} app_id=0x{:016x} timers={} heap_bytes={} heap_blocks={}",
                app.instance_id(),
                app.app_id(),
                self.services.timer_pool.timers_owned_by(app.instance_id()),
                usage.bytes,
                usage.count
            );
        }
        let _ = writeln!(
            out,
            "Timers: active={} nanoapp={} dropped_expiries={}",
            self.services.timer_pool.active_timer_count(),
            self.services.timer_pool.nanoapp_timer_count(),
            self.services.timer_pool.dropped_expiry_count()
        );
        let _ = writeln!(
            out,
            "Heap: bytes={} peak={} blocks={}",
            self.services.memory.total_allocated_bytes(),
            self.services.memory.peak_allocated_bytes(),
            self.services.memory.allocation_count()
        );
        self.services.wifi.debug_dump(&mut out);
        self.services.wwan.debug_dump(&mut out);
        self.services.gnss.debug_dump(&mut out);
        out
    }
}

impl Drop for Runtime {
    fn drop(&mut self) {
        self.services.wifi.deinit();
        self.services.wwan.deinit();
        self.services.gnss.deinit();
    }
}

fn lifecycle_attributes(app_id: u64, instance_id: InstanceId) -> [KeyValue; 2] {
    [
        KeyValue::new("app_id", format!("0x{app_id:016x}")),
        KeyValue::new("instance_id", i64::from(instance_id.0)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ManualClock, ManualSystemTimer};
    use crate::types::{Cookie, TimerEvent};
    use nanohub_config::HubConfig;
    use parking_lot::Mutex;
    use std::any::Any;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing_test::traced_test;

    type Log = Arc<Mutex<Vec<(InstanceId, u16)>>>;
    type StartHook = Box<dyn FnMut(&mut NanoappApi<'_>) -> bool + Send>;
    type EventHook = Box<dyn FnMut(&mut NanoappApi<'_>, u16, &dyn Any) + Send>;

    /// Records every event it sees and runs optional hooks.
    struct Probe {
        log: Log,
        on_start: Option<StartHook>,
        on_event: Option<EventHook>,
    }

    impl Probe {
        fn new(log: &Log) -> Self {
            Self {
                log: log.clone(),
                on_start: None,
                on_event: None,
            }
        }

        fn on_start(
            mut self,
            hook: impl FnMut(&mut NanoappApi<'_>) -> bool + Send + 'static,
        ) -> Self {
            self.on_start = Some(Box::new(hook));
            self
        }

        fn on_event(
            mut self,
            hook: impl FnMut(&mut NanoappApi<'_>, u16, &dyn Any) + Send + 'static,
        ) -> Self {
            self.on_event = Some(Box::new(hook));
            self
        }
    }

    impl NanoappHandler for Probe {
        fn start(&mut self, api: &mut NanoappApi<'_>) -> bool {
            match &mut self.on_start {
                Some(hook) => hook(api),
                None => true,
            }
        }

        fn handle_event(
            &mut self,
            api: &mut NanoappApi<'_>,
            _sender: InstanceId,
            event_type: u16,
            data: &dyn Any,
        ) {
            self.log.lock().push((api.instance_id(), event_type));
            if let Some(hook) = &mut self.on_event {
                hook(api, event_type, data);
            }
        }
    }

    struct Fixture {
        runtime: Runtime,
        clock: Arc<ManualClock>,
        hw: Arc<ManualSystemTimer>,
        log: Log,
    }

    impl Fixture {
        fn new() -> Self {
            let clock = Arc::new(ManualClock::new());
            let hw = Arc::new(ManualSystemTimer::new(clock.clone()));
            let runtime = Runtime::builder(&HubConfig::default())
                .clock(clock.clone())
                .system_timer(hw.clone())
                .metrics(MetricsRecorder::new())
                .build()
                .unwrap();
            Self {
                runtime,
                clock,
                hw,
                log: Log::default(),
            }
        }

        fn advance(&mut self, by: Duration) {
            self.clock.advance(by);
            self.hw.fire_if_due(self.clock.now_ns());
            self.runtime.run_until_idle();
        }

        fn seen(&self) -> Vec<(InstanceId, u16)> {
            self.log.lock().clone()
        }
    }

    #[test]
    fn load_announces_new_nanoapp_to_subscribers() {
        let mut f = Fixture::new();
        let watcher = f
            .runtime
            .load_nanoapp(
                0x1,
                NanoappPermissions::empty(),
                Box::new(Probe::new(&f.log).on_start(|api| {
                    api.register_broadcast_event(event_type::NANOAPP_STARTED)
                })),
            )
            .unwrap();
        f.runtime.run_until_idle();
        let newcomer = f
            .runtime
            .load_nanoapp(0x2, NanoappPermissions::empty(), Box::new(Probe::new(&f.log)))
            .unwrap();
        f.runtime.run_until_idle();

        assert_ne!(watcher, newcomer);
        // Its own announcement is posted after `start`, so the watcher hears both.
        assert_eq!(
            f.seen(),
            vec![
                (watcher, event_type::NANOAPP_STARTED),
                (watcher, event_type::NANOAPP_STARTED)
            ]
        );
    }

    #[test]
    fn duplicate_app_id_is_refused() {
        let mut f = Fixture::new();
        f.runtime
            .load_nanoapp(0x7, NanoappPermissions::empty(), Box::new(Probe::new(&f.log)))
            .unwrap();
        let err = f
            .runtime
            .load_nanoapp(0x7, NanoappPermissions::empty(), Box::new(Probe::new(&f.log)))
            .unwrap_err();
        assert!(matches!(err, RuntimeError::DuplicateAppId(0x7)));
    }

    #[test]
    fn failed_start_reclaims_everything() {
        let mut f = Fixture::new();
        let err = f
            .runtime
            .load_nanoapp(
                0x9,
                NanoappPermissions::empty(),
                Box::new(Probe::new(&f.log).on_start(|api| {
                    api.set_timer(Duration::from_secs(1), Cookie(1), false);
                    api.heap_alloc(64);
                    false
                })),
            )
            .unwrap_err();
        assert!(matches!(err, RuntimeError::StartFailed(0x9)));
        assert_eq!(f.runtime.event_loop().nanoapp_count(), 0);
        assert_eq!(f.runtime.timer_pool().active_timer_count(), 0);
        assert_eq!(f.runtime.memory().total_allocated_bytes(), 0);
    }

    #[test]
    fn one_shot_timer_fires_once_and_its_handle_dies() {
        let mut f = Fixture::new();
        let handle = Arc::new(Mutex::new(TimerHandle::INVALID));
        let slot = handle.clone();
        let app = f
            .runtime
            .load_nanoapp(
                0x1,
                NanoappPermissions::empty(),
                Box::new(Probe::new(&f.log).on_start(move |api| {
                    *slot.lock() = api.set_timer(Duration::from_millis(100), Cookie(5), true);
                    true
                })),
            )
            .unwrap();
        f.runtime.run_until_idle();

        f.advance(Duration::from_millis(99));
        assert!(f.seen().is_empty());
        f.advance(Duration::from_millis(1));
        assert_eq!(f.seen(), vec![(app, event_type::TIMER)]);
        f.advance(Duration::from_secs(1));
        assert_eq!(f.seen().len(), 1);

        let handle = *handle.lock();
        assert!(!f.runtime.timer_pool().cancel_nanoapp_timer(app, handle));
        assert_eq!(f.runtime.metrics().unwrap().timers_fired.get(), 1);
    }

    #[test]
    fn cancelling_drops_an_undelivered_expiry() {
        let mut f = Fixture::new();
        let handles = Arc::new(Mutex::new(Vec::new()));
        let (set, seen) = (handles.clone(), handles.clone());
        // Two timers due together: both expiries are queued by the same tick, and handling the
        // first cancels the second before it is delivered.
        let app = f
            .runtime
            .load_nanoapp(
                0x1,
                NanoappPermissions::empty(),
                Box::new(
                    Probe::new(&f.log)
                        .on_start(move |api| {
                            let mut set = set.lock();
                            for cookie in [1, 2] {
                                let delay = Duration::from_millis(10);
                                set.push(api.set_timer(delay, Cookie(cookie), true));
                            }
                            set.iter().all(|handle| handle.is_valid())
                        })
                        .on_event(move |api, kind, data| {
                            let Some(timer) = data.downcast_ref::<TimerEvent>() else {
                                return;
                            };
                            assert_eq!(kind, event_type::TIMER);
                            let others: Vec<TimerHandle> = seen
                                .lock()
                                .iter()
                                .copied()
                                .filter(|handle| *handle != timer.handle)
                                .collect();
                            for other in others {
                                assert!(api.cancel_timer(other));
                            }
                        }),
                ),
            )
            .unwrap();
        f.runtime.run_until_idle();
        f.advance(Duration::from_millis(10));
        assert_eq!(f.seen(), vec![(app, event_type::TIMER)]);
        assert_eq!(f.runtime.event_loop().stats().events_dropped(), 1);
    }

    #[test]
    fn unload_reclaims_timers_heap_and_queued_events() {
        let mut f = Fixture::new();
        let app = f
            .runtime
            .load_nanoapp(
                0x1,
                NanoappPermissions::empty(),
                Box::new(Probe::new(&f.log).on_start(|api| {
                    api.set_timer(Duration::from_millis(10), Cookie(1), false);
                    api.heap_alloc(128).is_some()
                })),
            )
            .unwrap();
        let observer = f
            .runtime
            .load_nanoapp(
                0x2,
                NanoappPermissions::empty(),
                Box::new(Probe::new(&f.log).on_start(|api| {
                    api.register_broadcast_event(event_type::NANOAPP_STOPPED)
                })),
            )
            .unwrap();
        f.runtime.run_until_idle();
        assert_eq!(f.runtime.memory().total_allocated_bytes(), 128);

        // Queue an event for the app, then unload before it is dispatched.
        assert!(f.runtime.poster().post_event(Event::targeted(
            event_type::FIRST_USER_VALUE,
            (),
            app
        )));
        f.runtime.unload_nanoapp(app).unwrap();
        f.runtime.run_until_idle();

        assert_eq!(f.seen(), vec![(observer, event_type::NANOAPP_STOPPED)]);
        assert_eq!(f.runtime.timer_pool().active_timer_count(), 0);
        assert_eq!(f.runtime.memory().total_allocated_bytes(), 0);
        assert_eq!(f.runtime.metrics().unwrap().heap_bytes.get(), 0);
        assert!(matches!(
            f.runtime.unload_nanoapp(app),
            Err(RuntimeError::NanoappNotFound(_))
        ));
    }

    #[test]
    fn reserved_event_types_are_refused_and_released() {
        let mut f = Fixture::new();
        let released = Arc::new(AtomicUsize::new(0));
        let counter = released.clone();
        f.runtime
            .load_nanoapp(
                0x1,
                NanoappPermissions::empty(),
                Box::new(Probe::new(&f.log).on_start(move |api| {
                    let counter = counter.clone();
                    let event = Event::broadcast(event_type::TIMER, 0u8).with_release(Box::new(
                        move |_, _| {
                            counter.fetch_add(1, Ordering::SeqCst);
                        },
                    ));
                    !api.send_event(event)
                })),
            )
            .unwrap();
        assert_eq!(released.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn nanoapps_exchange_user_events() {
        let mut f = Fixture::new();
        let receiver = f
            .runtime
            .load_nanoapp(0xB, NanoappPermissions::empty(), Box::new(Probe::new(&f.log)))
            .unwrap();
        f.runtime
            .load_nanoapp(
                0xA,
                NanoappPermissions::empty(),
                Box::new(Probe::new(&f.log).on_start(|api| {
                    let Some(target) = api.find_nanoapp_instance_id(0xB) else {
                        return false;
                    };
                    api.send_event_to(event_type::FIRST_USER_VALUE + 1, 42u32, target)
                })),
            )
            .unwrap();
        f.runtime.run_until_idle();
        assert_eq!(f.seen(), vec![(receiver, event_type::FIRST_USER_VALUE + 1)]);
    }

    #[test]
    fn resource_calls_require_permission() {
        let mut f = Fixture::new();
        let refused = Arc::new(AtomicUsize::new(0));
        let counter = refused.clone();
        f.runtime
            .load_nanoapp(
                0x1,
                NanoappPermissions::empty(),
                Box::new(Probe::new(&f.log).on_start(move |api| {
                    if !api.wwan_get_cell_info(Cookie(1)) {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    let interval = Duration::from_secs(1);
                    if !api.gnss_location_session_start(interval, Duration::ZERO, Cookie(2)) {
                        counter.fetch_add(1, Ordering::SeqCst);
                    }
                    api.wifi_capabilities().is_empty()
                })),
            )
            .unwrap();
        assert_eq!(refused.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn handler_can_request_its_own_unload() {
        let mut f = Fixture::new();
        let app = f
            .runtime
            .load_nanoapp(
                0x1,
                NanoappPermissions::empty(),
                Box::new(Probe::new(&f.log).on_start(|api| api.request_unload())),
            )
            .unwrap();
        assert!(f.runtime.event_loop().find_nanoapp_by_instance_id(app).is_some());
        f.runtime.run_until_idle();
        assert!(f.runtime.event_loop().find_nanoapp_by_instance_id(app).is_none());
    }

    #[traced_test]
    #[test]
    fn event_for_unknown_instance_is_dropped_and_logged() {
        let mut f = Fixture::new();
        f.runtime
            .poster()
            .post_event(Event::targeted(event_type::FIRST_USER_VALUE, (), InstanceId(42)));
        f.runtime.run_until_idle();
        assert_eq!(f.runtime.event_loop().stats().events_dropped(), 1);
        assert!(logs_contain("Dropping event for unknown nanoapp"));
    }

    #[test]
    fn run_returns_after_stop() {
        let mut f = Fixture::new();
        let poster = f.runtime.poster();
        let stopper = std::thread::spawn(move || poster.stop());
        stopper.join().unwrap();
        f.runtime.run();
    }

    #[test]
    fn debug_dump_covers_every_subsystem() {
        let mut f = Fixture::new();
        f.runtime
            .load_nanoapp(0x1, NanoappPermissions::empty(), Box::new(Probe::new(&f.log)))
            .unwrap();
        let dump = f.runtime.debug_dump();
        assert!(dump.starts_with("Event loop:"));
        assert!(dump.contains("app_id=0x0000000000000001"));
        assert!(dump.contains("\nWiFi:"));
        assert!(dump.contains("\nWWAN:"));
        assert!(dump.contains("\nGNSS:"));
    }
}
