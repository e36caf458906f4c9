//! The surface a nanoapp sees while one of its entry points runs.
//!
//! Every call is synchronous and reports only whether the request was accepted. Results of
//! asynchronous requests arrive later as targeted events.

use std::time::Duration;

use crate::alloc::HeapPtr;
use crate::events::{Event, EventLoop, EventTarget};
use crate::nanoapp::{Nanoapp, NanoappPermissions};
use crate::pal::{
    GnssCapabilities, WifiCapabilities, WifiRangingParams, WifiScanParams, WwanCapabilities,
};
use crate::requests::RequestError;
use crate::types::{event_type, Cookie, InstanceId, TimerEvent, TimerHandle};

use super::Services;

pub struct NanoappApi<'a> {
    instance_id: InstanceId,
    event_loop: &'a mut EventLoop,
    services: &'a mut Services,
}

impl<'a> NanoappApi<'a> {
    pub(crate) fn new(
        instance_id: InstanceId,
        event_loop: &'a mut EventLoop,
        services: &'a mut Services,
    ) -> Self {
        Self {
            instance_id,
            event_loop,
            services,
        }
    }

    pub fn instance_id(&self) -> InstanceId {
        self.instance_id
    }

    pub fn app_id(&self) -> u64 {
        self.nanoapp().map_or(0, Nanoapp::app_id)
    }

    /// Monotonic runtime time.
    pub fn time_ns(&self) -> u64 {
        self.services.clock.now_ns()
    }

    fn nanoapp(&self) -> Option<&Nanoapp> {
        self.event_loop.find_nanoapp_by_instance_id(self.instance_id)
    }

    fn permitted(&self, permission: NanoappPermissions) -> bool {
        self.nanoapp()
            .is_some_and(|app| app.permit_permission_use(permission))
    }

    fn admitted(&self, request: &str, result: Result<(), RequestError>) -> bool {
        match result {
            Ok(()) => true,
            Err(err) => {
                tracing::debug!(
                    instance_id = %self.instance_id,
                    request,
                    error = %err,
                    "Request refused"
                );
                false
            }
        }
    }

    // Timers

    /// Returns [`TimerHandle::INVALID`] when the timer pool refuses the request.
    pub fn set_timer(&mut self, duration: Duration, cookie: Cookie, one_shot: bool) -> TimerHandle {
        self.services
            .timer_pool
            .set_nanoapp_timer(self.instance_id, duration, cookie, one_shot)
    }

    /// Cancels `handle` and drops its expiry if one is queued but not yet delivered.
    pub fn cancel_timer(&mut self, handle: TimerHandle) -> bool {
        let cancelled = self
            .services
            .timer_pool
            .cancel_nanoapp_timer(self.instance_id, handle);
        let instance_id = self.instance_id;
        let discarded = self.event_loop.discard_queued_events(|event| {
            event.event_type == event_type::TIMER
                && event.target.is_targeted_at(instance_id)
                && event
                    .data
                    .downcast_ref::<TimerEvent>()
                    .is_some_and(|timer| timer.handle == handle)
        });
        cancelled || discarded > 0
    }

    // Heap

    pub fn heap_alloc(&mut self, bytes: u32) -> Option<HeapPtr> {
        let ptr = self.services.memory.alloc(self.instance_id, bytes);
        self.services.update_heap_gauge();
        ptr
    }

    pub fn heap_free(&mut self, ptr: Option<HeapPtr>) {
        self.services.memory.free(self.instance_id, ptr);
        self.services.update_heap_gauge();
    }

    pub fn with_heap_block_mut<R>(
        &self,
        ptr: HeapPtr,
        f: impl FnOnce(&mut [u8]) -> R,
    ) -> Option<R> {
        self.services.memory.with_block_mut(self.instance_id, ptr, f)
    }

    // Events

    /// Posts a nanoapp-defined event. Types below [`event_type::FIRST_USER_VALUE`] are
    /// reserved; such an event is released and refused.
    pub fn send_event(&mut self, event: Event) -> bool {
        if event.event_type < event_type::FIRST_USER_VALUE {
            tracing::warn!(
                instance_id = %self.instance_id,
                event_type = event.event_type,
                "Nanoapp tried to send a reserved event type"
            );
            event.release();
            return false;
        }
        self.event_loop
            .post_event(event.with_sender(self.instance_id))
    }

    /// Shorthand for a targeted event without a release callback.
    pub fn send_event_to<T: std::any::Any + Send>(
        &mut self,
        event_type: u16,
        data: T,
        target: InstanceId,
    ) -> bool {
        self.send_event(Event::new(event_type, data, EventTarget::Instance(target)))
    }

    pub fn register_broadcast_event(&mut self, event_type: u16) -> bool {
        self.event_loop.subscribe(self.instance_id, event_type)
    }

    pub fn unregister_broadcast_event(&mut self, event_type: u16) -> bool {
        self.event_loop.unsubscribe(self.instance_id, event_type)
    }

    pub fn find_nanoapp_instance_id(&self, app_id: u64) -> Option<InstanceId> {
        self.event_loop
            .find_nanoapp_by_app_id(app_id)
            .map(Nanoapp::instance_id)
    }

    /// Asks the runtime to unload this nanoapp once the current entry point returns.
    pub fn request_unload(&self) -> bool {
        self.event_loop.poster().request_unload(self.instance_id)
    }

    // WiFi

    pub fn wifi_capabilities(&self) -> WifiCapabilities {
        if self.permitted(NanoappPermissions::WIFI) {
            self.services.wifi.capabilities()
        } else {
            WifiCapabilities::empty()
        }
    }

    pub fn wifi_configure_scan_monitor(&mut self, enable: bool, cookie: Cookie) -> bool {
        if !self.permitted(NanoappPermissions::WIFI) {
            return false;
        }
        let result = self.services.wifi.configure_scan_monitor(
            self.event_loop,
            self.instance_id,
            enable,
            cookie,
        );
        self.admitted("wifi scan monitor", result)
    }

    pub fn wifi_request_scan(&mut self, params: &WifiScanParams, cookie: Cookie) -> bool {
        if !self.permitted(NanoappPermissions::WIFI) {
            return false;
        }
        let result = self
            .services
            .wifi
            .request_scan(self.instance_id, params, cookie);
        self.admitted("wifi scan", result)
    }

    pub fn wifi_request_ranging(&mut self, params: &WifiRangingParams, cookie: Cookie) -> bool {
        if !self.permitted(NanoappPermissions::WIFI) {
            return false;
        }
        let result = self
            .services
            .wifi
            .request_ranging(self.instance_id, params, cookie);
        self.admitted("wifi ranging", result)
    }

    // WWAN

    pub fn wwan_capabilities(&self) -> WwanCapabilities {
        if self.permitted(NanoappPermissions::WWAN) {
            self.services.wwan.capabilities()
        } else {
            WwanCapabilities::empty()
        }
    }

    pub fn wwan_get_cell_info(&mut self, cookie: Cookie) -> bool {
        if !self.permitted(NanoappPermissions::WWAN) {
            return false;
        }
        let result = self.services.wwan.request_cell_info(self.instance_id, cookie);
        self.admitted("cell info", result)
    }

    // GNSS

    pub fn gnss_capabilities(&self) -> GnssCapabilities {
        if self.permitted(NanoappPermissions::GNSS) {
            self.services.gnss.capabilities()
        } else {
            GnssCapabilities::empty()
        }
    }

    pub fn gnss_location_session_start(
        &mut self,
        min_interval: Duration,
        min_time_to_next_fix: Duration,
        cookie: Cookie,
    ) -> bool {
        self.gnss_location_session(true, min_interval, min_time_to_next_fix, cookie)
    }

    pub fn gnss_location_session_stop(&mut self, cookie: Cookie) -> bool {
        self.gnss_location_session(false, Duration::ZERO, Duration::ZERO, cookie)
    }

    fn gnss_location_session(
        &mut self,
        enable: bool,
        min_interval: Duration,
        min_time_to_next_fix: Duration,
        cookie: Cookie,
    ) -> bool {
        if !self.permitted(NanoappPermissions::GNSS) {
            return false;
        }
        let result = self.services.gnss.control_location_session(
            self.event_loop,
            self.instance_id,
            enable,
            min_interval,
            min_time_to_next_fix,
            cookie,
        );
        self.admitted("gnss location session", result)
    }

    pub fn gnss_measurement_session_start(
        &mut self,
        min_interval: Duration,
        cookie: Cookie,
    ) -> bool {
        self.gnss_measurement_session(true, min_interval, cookie)
    }

    pub fn gnss_measurement_session_stop(&mut self, cookie: Cookie) -> bool {
        self.gnss_measurement_session(false, Duration::ZERO, cookie)
    }

    fn gnss_measurement_session(
        &mut self,
        enable: bool,
        min_interval: Duration,
        cookie: Cookie,
    ) -> bool {
        if !self.permitted(NanoappPermissions::GNSS) {
            return false;
        }
        let result = self.services.gnss.control_measurement_session(
            self.event_loop,
            self.instance_id,
            enable,
            min_interval,
            cookie,
        );
        self.admitted("gnss measurement session", result)
    }
}
