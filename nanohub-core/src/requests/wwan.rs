//! Cell info requests.

use std::fmt::Write;

use nanohub_config::WwanConfig;

use super::{
    dump_pending, ErrorCode, ErrorHistogram, PendingRequest, RequestError, RequestSlot,
    ResourceContext,
};
use crate::events::{Event, EventLoop, SystemTimerCallback};
use crate::pal::{
    PalSystemApi, WwanCapabilities, WwanCellInfoResult, WwanPal, WwanPalCallbacks, WwanPalEvent,
};
use crate::types::{event_type, Cookie, InstanceId, TimerHandle};

pub struct WwanRequestManager {
    pal: Box<dyn WwanPal>,
    available: bool,
    config: WwanConfig,
    ctx: ResourceContext,
    cell_info: RequestSlot<()>,
    cell_info_errors: ErrorHistogram,
}

impl WwanRequestManager {
    pub fn new(pal: Box<dyn WwanPal>, config: WwanConfig, ctx: ResourceContext) -> Self {
        Self {
            pal,
            available: false,
            config,
            ctx,
            cell_info: RequestSlot::default(),
            cell_info_errors: ErrorHistogram::default(),
        }
    }

    pub(crate) fn init(&mut self, system: &PalSystemApi, callbacks: WwanPalCallbacks) {
        self.available = self.pal.open(system, callbacks);
        if !self.available {
            tracing::error!("WWAN PAL failed to open");
        }
    }

    pub(crate) fn deinit(&mut self) {
        if self.available {
            self.pal.close();
            self.available = false;
        }
    }

    pub fn capabilities(&self) -> WwanCapabilities {
        if self.available {
            self.pal.capabilities()
        } else {
            WwanCapabilities::empty()
        }
    }

    /// Asks the PAL for cell info on behalf of `instance_id`. The result arrives as a
    /// targeted [`event_type::WWAN_CELL_INFO_RESULT`].
    pub fn request_cell_info(
        &mut self,
        instance_id: InstanceId,
        cookie: Cookie,
    ) -> Result<(), RequestError> {
        if !self.capabilities().contains(WwanCapabilities::GET_CELL_INFO) {
            return Err(RequestError::NotSupported("cell info"));
        }
        if self.cell_info.is_pending() {
            tracing::error!(%instance_id, "Cell info request made while a request is in flight");
            return Err(RequestError::Busy("cell info"));
        }
        if !self.pal.request_cell_info() {
            return Err(RequestError::PalRejected("cell info"));
        }

        let timeout = self.config.cell_info_timeout();
        let timeout_timer = self
            .ctx
            .timer_pool
            .set_system_timer(timeout, SystemTimerCallback::WwanCellInfoTimeout);
        self.cell_info.occupy(PendingRequest {
            instance_id: Some(instance_id),
            cookie,
            requested_at_ns: self.ctx.now_ns(),
            timeout,
            timeout_timer,
            kind: (),
        });
        Ok(())
    }

    pub(crate) fn handle_pal_event(&mut self, event_loop: &mut EventLoop, event: WwanPalEvent) {
        match event {
            WwanPalEvent::CellInfoResult(result) => {
                self.handle_cell_info_result(event_loop, result)
            }
        }
    }

    fn handle_cell_info_result(
        &mut self,
        event_loop: &mut EventLoop,
        mut result: WwanCellInfoResult,
    ) {
        let Some(request) = self.cell_info.take() else {
            tracing::error!("Cell info results received unexpectedly");
            return;
        };
        self.ctx.timer_pool.cancel_system_timer(request.timeout_timer);

        let code = self.cell_info_errors.record(result.error_code);
        if !code.is_success() {
            self.ctx.record_pal_error("wwan");
        }
        if let Some(instance_id) = request.instance_id {
            result.cookie = request.cookie;
            event_loop.post_event_or_die(Event::targeted(
                event_type::WWAN_CELL_INFO_RESULT,
                result,
                instance_id,
            ));
        }
    }

    pub(crate) fn handle_cell_info_timeout(
        &mut self,
        event_loop: &mut EventLoop,
        handle: TimerHandle,
    ) {
        if !self.cell_info.is_timed_by(handle) {
            tracing::debug!(%handle, "Stale cell info timeout");
            return;
        }
        let Some(request) = self.cell_info.take() else {
            return;
        };
        tracing::warn!(requester = ?request.instance_id, "Cell info request timed out");
        self.cell_info_errors.record(ErrorCode::Timeout.as_raw());
        if let Some(instance_id) = request.instance_id {
            event_loop.post_event_or_die(Event::targeted(
                event_type::WWAN_CELL_INFO_RESULT,
                WwanCellInfoResult {
                    error_code: ErrorCode::Timeout.as_raw(),
                    cookie: request.cookie,
                    cells: Vec::new(),
                },
                instance_id,
            ));
        }
    }

    /// Detaches `instance_id` from an in-flight request; the PAL keeps working on it.
    pub(crate) fn on_nanoapp_unloaded(&mut self, instance_id: InstanceId) {
        if self.cell_info.is_owned_by(instance_id) {
            if let Some(request) = self.cell_info.take() {
                self.ctx.timer_pool.cancel_system_timer(request.timeout_timer);
                tracing::debug!(%instance_id, "Vacated cell info request of unloaded nanoapp");
            }
        }
    }

    pub fn is_cell_info_pending(&self) -> bool {
        self.cell_info.is_pending()
    }

    pub fn cell_info_errors(&self) -> &ErrorHistogram {
        &self.cell_info_errors
    }

    pub fn debug_dump(&self, out: &mut String) {
        let _ = writeln!(out, "\nWWAN:");
        dump_pending("Cell info", &self.cell_info, out);
        let _ = writeln!(out, " API error distribution (error-code indexed):");
        self.cell_info_errors.dump("Cell Scan", out);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventTarget;
    use crate::test_support::{expired_system_timers, posted, Harness};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tracing_test::traced_test;

    const APP: InstanceId = InstanceId(1);
    const OTHER: InstanceId = InstanceId(2);

    #[derive(Clone, Default)]
    struct FakeWwan {
        requests: Arc<AtomicUsize>,
        refuse: Arc<AtomicBool>,
    }

    impl WwanPal for FakeWwan {
        fn open(&mut self, _: &PalSystemApi, _: WwanPalCallbacks) -> bool {
            true
        }

        fn close(&mut self) {}

        fn capabilities(&self) -> WwanCapabilities {
            WwanCapabilities::GET_CELL_INFO
        }

        fn request_cell_info(&mut self) -> bool {
            self.requests.fetch_add(1, Ordering::SeqCst);
            !self.refuse.load(Ordering::SeqCst)
        }
    }

    fn setup() -> (Harness, WwanRequestManager, FakeWwan) {
        let harness = Harness::new();
        let pal = FakeWwan::default();
        let mut manager =
            WwanRequestManager::new(Box::new(pal.clone()), WwanConfig::default(), harness.ctx.clone());
        manager.init(
            &PalSystemApi::new(harness.clock.clone()),
            WwanPalCallbacks::new(harness.event_loop.poster()),
        );
        (harness, manager, pal)
    }

    fn result(error_code: ErrorCode) -> WwanPalEvent {
        WwanPalEvent::CellInfoResult(WwanCellInfoResult {
            error_code: error_code.as_raw(),
            cookie: Cookie::NONE,
            cells: Vec::new(),
        })
    }

    #[test]
    fn completion_reaches_requester_with_its_cookie() {
        let (mut h, mut manager, _) = setup();
        manager.request_cell_info(APP, Cookie(77)).unwrap();
        assert!(manager.is_cell_info_pending());

        manager.handle_pal_event(&mut h.event_loop, result(ErrorCode::None));
        let delivered = posted::<WwanCellInfoResult>(&h.drain(), event_type::WWAN_CELL_INFO_RESULT);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, EventTarget::Instance(APP));
        assert_eq!(delivered[0].1.cookie, Cookie(77));
        assert!(!manager.is_cell_info_pending());
        assert_eq!(manager.cell_info_errors().count(ErrorCode::None), 1);
    }

    #[test]
    fn second_request_while_pending_never_reaches_pal() {
        let (_h, mut manager, pal) = setup();
        manager.request_cell_info(APP, Cookie(1)).unwrap();
        assert_eq!(
            manager.request_cell_info(OTHER, Cookie(2)),
            Err(RequestError::Busy("cell info"))
        );
        assert_eq!(pal.requests.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn pal_refusal_leaves_slot_empty() {
        let (_h, mut manager, pal) = setup();
        pal.refuse.store(true, Ordering::SeqCst);
        assert_eq!(
            manager.request_cell_info(APP, Cookie(1)),
            Err(RequestError::PalRejected("cell info"))
        );
        assert!(!manager.is_cell_info_pending());
    }

    #[traced_test]
    #[test]
    fn unexpected_completion_is_dropped() {
        let (mut h, mut manager, _) = setup();
        manager.handle_pal_event(&mut h.event_loop, result(ErrorCode::None));
        assert!(h.drain().is_empty());
        assert!(logs_contain("Cell info results received unexpectedly"));
    }

    #[traced_test]
    #[test]
    fn unload_while_pending_then_late_completion() {
        let (mut h, mut manager, _) = setup();
        manager.request_cell_info(APP, Cookie(1)).unwrap();
        manager.on_nanoapp_unloaded(APP);
        assert!(!manager.is_cell_info_pending());

        manager.request_cell_info(OTHER, Cookie(2)).unwrap();
        manager.handle_pal_event(&mut h.event_loop, result(ErrorCode::None));
        let delivered = posted::<WwanCellInfoResult>(&h.drain(), event_type::WWAN_CELL_INFO_RESULT);
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, EventTarget::Instance(OTHER));

        manager.handle_pal_event(&mut h.event_loop, result(ErrorCode::None));
        assert!(h.drain().is_empty());
        assert!(logs_contain("received unexpectedly"));
    }

    #[test]
    fn timeout_fails_the_request() {
        let (mut h, mut manager, _) = setup();
        manager.request_cell_info(APP, Cookie(5)).unwrap();
        let tasks = h.advance(Duration::from_millis(WwanConfig::default().cell_info_timeout_ms));
        let timers = expired_system_timers(&tasks);
        assert_eq!(timers.len(), 1);
        assert_eq!(timers[0].1, SystemTimerCallback::WwanCellInfoTimeout);

        manager.handle_cell_info_timeout(&mut h.event_loop, timers[0].0);
        let delivered = posted::<WwanCellInfoResult>(&h.drain(), event_type::WWAN_CELL_INFO_RESULT);
        assert_eq!(delivered[0].1.error_code, ErrorCode::Timeout.as_raw());
        assert_eq!(delivered[0].1.cookie, Cookie(5));
        assert!(!manager.is_cell_info_pending());
    }

    #[test]
    fn debug_dump_lists_pending_request() {
        let (_h, mut manager, _) = setup();
        manager.request_cell_info(APP, Cookie(3)).unwrap();
        let mut out = String::new();
        manager.debug_dump(&mut out);
        assert!(out.contains("Cell info request pending: instance=1 cookie=3"));
    }
}
