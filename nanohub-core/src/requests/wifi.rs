//! WiFi scan monitoring, on-demand scans and ranging.
//!
//! Scan monitoring is shared: the PAL is only reconfigured when the aggregate "anyone wants
//! it" state flips, otherwise the request is answered immediately. On-demand scans retry
//! recoverable refusals after a backoff without telling the requester; the requester sees
//! exactly one [`AsyncResult`] per accepted request.

use std::fmt::Write;

use nanohub_config::WifiConfig;

use super::{
    dump_pending, AsyncResult, ErrorCode, ErrorHistogram, PendingRequest, RequestError,
    RequestSlot, ResourceContext,
};
use crate::events::{Event, EventLoop, SystemTimerCallback};
use crate::pal::{
    PalSystemApi, WifiCapabilities, WifiPal, WifiPalCallbacks, WifiPalEvent, WifiRangingEvent,
    WifiRangingParams, WifiScanEvent, WifiScanParams,
};
use crate::types::{event_type, Cookie, InstanceId, TimerHandle};

/// `AsyncResult::request_type` values for [`event_type::WIFI_ASYNC_RESULT`].
pub mod request_type {
    pub const CONFIGURE_SCAN_MONITOR: u8 = 1;
    pub const REQUEST_SCAN: u8 = 2;
    pub const RANGING: u8 = 3;
}

#[derive(Clone, Copy, Debug)]
struct ScanMonitorTransition {
    /// What the requester asked for itself.
    enable: bool,
    /// Aggregate state sent to the PAL.
    target: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum ScanPhase {
    AwaitingResponse,
    RetryScheduled,
    AwaitingResults,
}

#[derive(Clone, Debug)]
struct ScanRequest {
    params: WifiScanParams,
    phase: ScanPhase,
    retries_used: u8,
    retry_timer: TimerHandle,
}

pub struct WifiRequestManager {
    pal: Box<dyn WifiPal>,
    available: bool,
    config: WifiConfig,
    ctx: ResourceContext,

    scan_monitor_enabled: bool,
    scan_monitor_nanoapps: Vec<InstanceId>,
    scan_monitor: RequestSlot<ScanMonitorTransition>,
    scan: RequestSlot<ScanRequest>,
    ranging: RequestSlot<()>,

    scan_monitor_errors: ErrorHistogram,
    scan_errors: ErrorHistogram,
    ranging_errors: ErrorHistogram,
}

impl WifiRequestManager {
    pub fn new(pal: Box<dyn WifiPal>, config: WifiConfig, ctx: ResourceContext) -> Self {
        Self {
            pal,
            available: false,
            config,
            ctx,
            scan_monitor_enabled: false,
            scan_monitor_nanoapps: Vec::new(),
            scan_monitor: RequestSlot::default(),
            scan: RequestSlot::default(),
            ranging: RequestSlot::default(),
            scan_monitor_errors: ErrorHistogram::default(),
            scan_errors: ErrorHistogram::default(),
            ranging_errors: ErrorHistogram::default(),
        }
    }

    pub(crate) fn init(&mut self, system: &PalSystemApi, callbacks: WifiPalCallbacks) {
        self.available = self.pal.open(system, callbacks);
        if !self.available {
            tracing::error!("WiFi PAL failed to open");
        }
    }

    pub(crate) fn deinit(&mut self) {
        if self.available {
            self.pal.close();
            self.available = false;
        }
    }

    pub fn capabilities(&self) -> WifiCapabilities {
        if self.available {
            self.pal.capabilities()
        } else {
            WifiCapabilities::empty()
        }
    }

    fn post_async_result(
        event_loop: &EventLoop,
        instance_id: InstanceId,
        request_type: u8,
        error_code: ErrorCode,
        cookie: Cookie,
    ) {
        event_loop.post_event_or_die(Event::targeted(
            event_type::WIFI_ASYNC_RESULT,
            AsyncResult::new(request_type, error_code, cookie),
            instance_id,
        ));
    }

    // Scan monitor

    pub fn configure_scan_monitor(
        &mut self,
        event_loop: &mut EventLoop,
        instance_id: InstanceId,
        enable: bool,
        cookie: Cookie,
    ) -> Result<(), RequestError> {
        if !self.capabilities().contains(WifiCapabilities::SCAN_MONITORING) {
            return Err(RequestError::NotSupported("scan monitoring"));
        }
        if self.scan_monitor.is_pending() {
            return Err(RequestError::Busy("scan monitor"));
        }

        let target = enable || self.scan_monitor_nanoapps.iter().any(|id| *id != instance_id);
        if target == self.scan_monitor_enabled {
            self.apply_scan_monitor_change(event_loop, instance_id, enable);
            Self::post_async_result(
                event_loop,
                instance_id,
                request_type::CONFIGURE_SCAN_MONITOR,
                ErrorCode::None,
                cookie,
            );
            return Ok(());
        }

        if !self.pal.configure_scan_monitor(target) {
            return Err(RequestError::PalRejected("scan monitor"));
        }
        self.scan_monitor.occupy(PendingRequest {
            instance_id: Some(instance_id),
            cookie,
            requested_at_ns: self.ctx.now_ns(),
            timeout: Default::default(),
            timeout_timer: TimerHandle::INVALID,
            kind: ScanMonitorTransition { enable, target },
        });
        Ok(())
    }

    fn apply_scan_monitor_change(
        &mut self,
        event_loop: &mut EventLoop,
        instance_id: InstanceId,
        enable: bool,
    ) {
        if enable {
            if !self.scan_monitor_nanoapps.contains(&instance_id) {
                self.scan_monitor_nanoapps.push(instance_id);
            }
            event_loop.subscribe(instance_id, event_type::WIFI_SCAN_RESULT);
        } else {
            self.scan_monitor_nanoapps.retain(|id| *id != instance_id);
            event_loop.unsubscribe(instance_id, event_type::WIFI_SCAN_RESULT);
        }
    }

    fn handle_scan_monitor_status_change(
        &mut self,
        event_loop: &mut EventLoop,
        enabled: bool,
        raw_error: u8,
    ) {
        let Some(request) = self.scan_monitor.take() else {
            tracing::warn!(
                enabled,
                error_code = raw_error,
                "Unsolicited scan monitor status change"
            );
            return;
        };

        let code = self.scan_monitor_errors.record(raw_error);
        if code.is_success() {
            self.scan_monitor_enabled = enabled;
        } else {
            self.ctx.record_pal_error("wifi");
        }

        let transition = request.kind;
        let result = match code {
            ErrorCode::None if enabled == transition.target => ErrorCode::None,
            ErrorCode::None => ErrorCode::Error,
            failure => failure,
        };
        if let Some(instance_id) = request.instance_id {
            if result.is_success() {
                self.apply_scan_monitor_change(event_loop, instance_id, transition.enable);
            }
            Self::post_async_result(
                event_loop,
                instance_id,
                request_type::CONFIGURE_SCAN_MONITOR,
                result,
                request.cookie,
            );
        }
        self.reconcile_scan_monitor();
    }

    /// Brings the PAL in line with the subscriber list after subscribers left without asking.
    fn reconcile_scan_monitor(&mut self) {
        if self.scan_monitor.is_pending() {
            return;
        }
        let target = !self.scan_monitor_nanoapps.is_empty();
        if target == self.scan_monitor_enabled {
            return;
        }
        if self.pal.configure_scan_monitor(target) {
            self.scan_monitor.occupy(PendingRequest {
                instance_id: None,
                cookie: Cookie::NONE,
                requested_at_ns: self.ctx.now_ns(),
                timeout: Default::default(),
                timeout_timer: TimerHandle::INVALID,
                kind: ScanMonitorTransition {
                    enable: target,
                    target,
                },
            });
        } else {
            tracing::warn!(target, "PAL refused scan monitor reconfiguration");
        }
    }

    // On-demand scan

    pub fn request_scan(
        &mut self,
        instance_id: InstanceId,
        params: &WifiScanParams,
        cookie: Cookie,
    ) -> Result<(), RequestError> {
        if !self.capabilities().contains(WifiCapabilities::ON_DEMAND_SCAN) {
            return Err(RequestError::NotSupported("on-demand scan"));
        }
        if self.scan.is_pending() {
            tracing::warn!(%instance_id, "Scan request made while a scan is in flight");
            return Err(RequestError::Busy("scan"));
        }
        if params.ssids.len() > WifiScanParams::MAX_SSIDS {
            return Err(RequestError::InvalidArgument("scan", "too many SSIDs"));
        }
        if !self.pal.request_scan(params) {
            return Err(RequestError::PalRejected("scan"));
        }

        let timeout = self.config.scan_timeout();
        let timeout_timer = self
            .ctx
            .timer_pool
            .set_system_timer(timeout, SystemTimerCallback::WifiScanTimeout);
        self.scan.occupy(PendingRequest {
            instance_id: Some(instance_id),
            cookie,
            requested_at_ns: self.ctx.now_ns(),
            timeout,
            timeout_timer,
            kind: ScanRequest {
                params: params.clone(),
                phase: ScanPhase::AwaitingResponse,
                retries_used: 0,
                retry_timer: TimerHandle::INVALID,
            },
        });
        Ok(())
    }

    fn handle_scan_response(&mut self, event_loop: &mut EventLoop, pending: bool, raw_error: u8) {
        let Some(request) = self
            .scan
            .pending_mut()
            .filter(|request| request.kind.phase == ScanPhase::AwaitingResponse)
        else {
            tracing::warn!(
                pending,
                error_code = raw_error,
                "Scan response with no scan awaiting one"
            );
            return;
        };
        let code = self.scan_errors.record(raw_error);

        if pending && code.is_success() {
            request.kind.phase = ScanPhase::AwaitingResults;
            if let Some(instance_id) = request.instance_id {
                Self::post_async_result(
                    event_loop,
                    instance_id,
                    request_type::REQUEST_SCAN,
                    ErrorCode::None,
                    request.cookie,
                );
            }
            return;
        }

        let code = if code.is_success() { ErrorCode::Error } else { code };
        if code.is_recoverable() && request.kind.retries_used < self.config.scan_max_retries {
            request.kind.retries_used += 1;
            request.kind.phase = ScanPhase::RetryScheduled;
            request.kind.retry_timer = self.ctx.timer_pool.set_system_timer(
                self.config.scan_retry_backoff(),
                SystemTimerCallback::WifiScanRetry,
            );
            tracing::debug!(
                attempt = request.kind.retries_used,
                error = ?code,
                "Scan refused, retry scheduled"
            );
            return;
        }
        self.fail_scan(event_loop, code);
    }

    pub(crate) fn handle_scan_retry(&mut self, event_loop: &mut EventLoop, handle: TimerHandle) {
        let Some(request) = self.scan.pending_mut().filter(|request| {
            request.kind.phase == ScanPhase::RetryScheduled && request.kind.retry_timer == handle
        }) else {
            tracing::debug!(%handle, "Stale scan retry timer");
            return;
        };

        request.kind.retry_timer = TimerHandle::INVALID;
        if self.pal.request_scan(&request.kind.params) {
            request.kind.phase = ScanPhase::AwaitingResponse;
        } else {
            self.fail_scan(event_loop, ErrorCode::Error);
        }
    }

    pub(crate) fn handle_scan_timeout(&mut self, event_loop: &mut EventLoop, handle: TimerHandle) {
        if !self.scan.is_timed_by(handle) {
            tracing::debug!(%handle, "Stale scan timeout");
            return;
        }
        tracing::warn!("On-demand scan timed out");
        self.scan_errors.record(ErrorCode::Timeout.as_raw());
        self.fail_scan(event_loop, ErrorCode::Timeout);
    }

    fn vacate_scan(&mut self) -> Option<PendingRequest<ScanRequest>> {
        let request = self.scan.take()?;
        self.ctx.timer_pool.cancel_system_timer(request.timeout_timer);
        if request.kind.retry_timer.is_valid() {
            self.ctx.timer_pool.cancel_system_timer(request.kind.retry_timer);
        }
        Some(request)
    }

    fn fail_scan(&mut self, event_loop: &EventLoop, code: ErrorCode) {
        let Some(request) = self.vacate_scan() else {
            return;
        };
        self.ctx.record_pal_error("wifi");
        if let Some(instance_id) = request.instance_id {
            Self::post_async_result(
                event_loop,
                instance_id,
                request_type::REQUEST_SCAN,
                code,
                request.cookie,
            );
        }
    }

    fn handle_scan_event(&mut self, event_loop: &mut EventLoop, mut event: WifiScanEvent) {
        let awaiting = self
            .scan
            .pending()
            .is_some_and(|request| request.kind.phase == ScanPhase::AwaitingResults);
        let requester = if awaiting {
            self.vacate_scan().and_then(|request| request.instance_id)
        } else {
            None
        };
        if !awaiting && !self.scan_monitor_enabled {
            tracing::warn!("Scan event with no scan pending and monitoring off");
            return;
        }

        // Monitor subscribers get the broadcast; an on-demand requester that isn't one gets
        // its own copy.
        let requester = requester.filter(|id| !self.scan_monitor_nanoapps.contains(id));
        let broadcast = !self.scan_monitor_nanoapps.is_empty();
        if let Some(instance_id) = requester {
            let copy = if broadcast {
                event.clone()
            } else {
                std::mem::take(&mut event)
            };
            Self::post_scan_event(
                event_loop,
                Event::targeted(event_type::WIFI_SCAN_RESULT, copy, instance_id),
            );
        }
        if broadcast {
            Self::post_scan_event(
                event_loop,
                Event::broadcast(event_type::WIFI_SCAN_RESULT, event),
            );
        } else if requester.is_none() {
            tracing::debug!("Scan event has no recipients");
        }
    }

    fn post_scan_event(event_loop: &EventLoop, event: Event) {
        if !event_loop.post_event(event) {
            tracing::error!("Failed to post WiFi scan event");
        }
    }

    // Ranging

    pub fn request_ranging(
        &mut self,
        instance_id: InstanceId,
        params: &WifiRangingParams,
        cookie: Cookie,
    ) -> Result<(), RequestError> {
        if !self.capabilities().contains(WifiCapabilities::RTT_RANGING) {
            return Err(RequestError::NotSupported("ranging"));
        }
        if self.ranging.is_pending() {
            return Err(RequestError::Busy("ranging"));
        }
        if params.targets.is_empty() || params.targets.len() > WifiRangingParams::MAX_TARGETS {
            return Err(RequestError::InvalidArgument("ranging", "target count out of range"));
        }
        if !self.pal.request_ranging(params) {
            return Err(RequestError::PalRejected("ranging"));
        }

        let timeout = self.config.ranging_timeout();
        let timeout_timer = self
            .ctx
            .timer_pool
            .set_system_timer(timeout, SystemTimerCallback::WifiRangingTimeout);
        self.ranging.occupy(PendingRequest {
            instance_id: Some(instance_id),
            cookie,
            requested_at_ns: self.ctx.now_ns(),
            timeout,
            timeout_timer,
            kind: (),
        });
        Ok(())
    }

    fn handle_ranging_event(
        &mut self,
        event_loop: &mut EventLoop,
        raw_error: u8,
        event: Option<WifiRangingEvent>,
    ) {
        let Some(request) = self.ranging.take() else {
            tracing::warn!(error_code = raw_error, "Ranging result with no request pending");
            return;
        };
        let code = self.ranging_errors.record(raw_error);
        self.ctx.timer_pool.cancel_system_timer(request.timeout_timer);
        if !code.is_success() {
            self.ctx.record_pal_error("wifi");
        }

        let Some(instance_id) = request.instance_id else {
            return;
        };
        Self::post_async_result(
            event_loop,
            instance_id,
            request_type::RANGING,
            code,
            request.cookie,
        );
        if code.is_success() {
            event_loop.post_event_or_die(Event::targeted(
                event_type::WIFI_RANGING_RESULT,
                event.unwrap_or_default(),
                instance_id,
            ));
        }
    }

    pub(crate) fn handle_ranging_timeout(
        &mut self,
        event_loop: &mut EventLoop,
        handle: TimerHandle,
    ) {
        if !self.ranging.is_timed_by(handle) {
            tracing::debug!(%handle, "Stale ranging timeout");
            return;
        }
        let Some(request) = self.ranging.take() else {
            return;
        };
        tracing::warn!("Ranging request timed out");
        self.ranging_errors.record(ErrorCode::Timeout.as_raw());
        if let Some(instance_id) = request.instance_id {
            Self::post_async_result(
                event_loop,
                instance_id,
                request_type::RANGING,
                ErrorCode::Timeout,
                request.cookie,
            );
        }
    }

    pub(crate) fn handle_pal_event(&mut self, event_loop: &mut EventLoop, event: WifiPalEvent) {
        match event {
            WifiPalEvent::ScanMonitorStatusChange {
                enabled,
                error_code,
            } => self.handle_scan_monitor_status_change(event_loop, enabled, error_code),
            WifiPalEvent::ScanResponse {
                pending,
                error_code,
            } => self.handle_scan_response(event_loop, pending, error_code),
            WifiPalEvent::ScanEvent(event) => self.handle_scan_event(event_loop, event),
            WifiPalEvent::RangingEvent { error_code, event } => {
                self.handle_ranging_event(event_loop, error_code, event)
            }
        }
    }

    /// Drops every trace of `instance_id`. Hardware work already in flight is left alone.
    pub(crate) fn on_nanoapp_unloaded(&mut self, instance_id: InstanceId) {
        self.scan_monitor_nanoapps.retain(|id| *id != instance_id);
        if let Some(request) = self
            .scan_monitor
            .pending_mut()
            .filter(|request| request.instance_id == Some(instance_id))
        {
            // The PAL transition still completes and updates the aggregate state.
            request.instance_id = None;
        }
        if self.scan.is_owned_by(instance_id) {
            self.vacate_scan();
            tracing::debug!(%instance_id, "Vacated scan request of unloaded nanoapp");
        }
        if self.ranging.is_owned_by(instance_id) {
            if let Some(request) = self.ranging.take() {
                self.ctx.timer_pool.cancel_system_timer(request.timeout_timer);
            }
        }
        self.reconcile_scan_monitor();
    }

    pub fn is_scan_monitor_enabled(&self) -> bool {
        self.scan_monitor_enabled
    }

    pub fn scan_monitor_nanoapps(&self) -> &[InstanceId] {
        &self.scan_monitor_nanoapps
    }

    pub fn is_scan_monitor_transition_pending(&self) -> bool {
        self.scan_monitor.is_pending()
    }

    pub fn is_scan_pending(&self) -> bool {
        self.scan.is_pending()
    }

    pub fn is_ranging_pending(&self) -> bool {
        self.ranging.is_pending()
    }

    pub fn scan_errors(&self) -> &ErrorHistogram {
        &self.scan_errors
    }

    pub fn debug_dump(&self, out: &mut String) {
        let _ = writeln!(out, "\nWiFi:");
        let _ = writeln!(
            out,
            " Scan monitor enabled={} nanoapps={:?}",
            self.scan_monitor_enabled, self.scan_monitor_nanoapps
        );
        dump_pending("Scan monitor", &self.scan_monitor, out);
        dump_pending("Scan", &self.scan, out);
        dump_pending("Ranging", &self.ranging, out);
        let _ = writeln!(out, " API error distribution (error-code indexed):");
        self.scan_monitor_errors.dump("Scan monitor", out);
        self.scan_errors.dump("Scan", out);
        self.ranging_errors.dump("Ranging", out);
    }
}
