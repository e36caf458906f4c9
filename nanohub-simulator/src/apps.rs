//! Demo nanoapps that exercise the runtime under simulation.
//!
//! Each one writes what it observes into a [`TraceRecorder`], so its behaviour feeds the
//! simulation digest.

use std::any::Any;
use std::time::Duration;

use nanohub_core::nanoapp::NanoappHandler;
use nanohub_core::pal::{WifiCapabilities, WifiScanEvent, WifiScanParams, WwanCellInfoResult};
use nanohub_core::requests::AsyncResult;
use nanohub_core::runtime::NanoappApi;
use nanohub_core::types::{event_type, Cookie, InstanceId, TimerEvent, TimerHandle};

use crate::trace::TraceRecorder;

pub const PERIODIC_TIMER_APP_ID: u64 = 0x4e48_0000_0000_0001;
pub const WIFI_SCANNER_APP_ID: u64 = 0x4e48_0000_0000_0002;
pub const CELL_INFO_APP_ID: u64 = 0x4e48_0000_0000_0003;

/// Records every tick of one recurring timer.
pub struct PeriodicTimerApp {
    period: Duration,
    trace: TraceRecorder,
    timer: TimerHandle,
    ticks: u64,
}

impl PeriodicTimerApp {
    pub fn new(period: Duration, trace: TraceRecorder) -> Self {
        Self {
            period,
            trace,
            timer: TimerHandle::INVALID,
            ticks: 0,
        }
    }
}

impl NanoappHandler for PeriodicTimerApp {
    fn start(&mut self, api: &mut NanoappApi<'_>) -> bool {
        self.timer = api.set_timer(self.period, Cookie(1), false);
        self.timer.is_valid()
    }

    fn handle_event(
        &mut self,
        api: &mut NanoappApi<'_>,
        _sender: InstanceId,
        kind: u16,
        data: &dyn Any,
    ) {
        if kind != event_type::TIMER {
            return;
        }
        if let Some(timer) = data.downcast_ref::<TimerEvent>() {
            self.ticks += 1;
            self.trace.record(
                api.time_ns(),
                api.instance_id(),
                kind,
                &self.ticks.to_le_bytes(),
            );
            tracing::trace!(handle = %timer.handle, ticks = self.ticks, "Periodic tick");
        }
    }

    fn end(&mut self, api: &mut NanoappApi<'_>) {
        api.cancel_timer(self.timer);
    }
}

/// Requests an on-demand scan every interval and records results and failures.
pub struct WifiScannerApp {
    interval: Duration,
    trace: TraceRecorder,
    next_cookie: u64,
}

impl WifiScannerApp {
    pub fn new(interval: Duration, trace: TraceRecorder) -> Self {
        Self {
            interval,
            trace,
            next_cookie: 1,
        }
    }

    fn on_tick(&mut self, api: &mut NanoappApi<'_>) {
        let cookie = Cookie(self.next_cookie);
        self.next_cookie += 1;
        if !api.wifi_request_scan(&WifiScanParams::default(), cookie) {
            self.trace
                .record(api.time_ns(), api.instance_id(), event_type::TIMER, b"refused");
        }
    }
}

impl NanoappHandler for WifiScannerApp {
    fn start(&mut self, api: &mut NanoappApi<'_>) -> bool {
        if !api
            .wifi_capabilities()
            .contains(WifiCapabilities::ON_DEMAND_SCAN)
        {
            tracing::warn!("On-demand scan unsupported; scanner not started");
            return false;
        }
        api.set_timer(self.interval, Cookie::NONE, false).is_valid()
    }

    fn handle_event(
        &mut self,
        api: &mut NanoappApi<'_>,
        _sender: InstanceId,
        kind: u16,
        data: &dyn Any,
    ) {
        let now = api.time_ns();
        let me = api.instance_id();
        match kind {
            event_type::TIMER => self.on_tick(api),
            event_type::WIFI_ASYNC_RESULT => {
                if let Some(result) = data.downcast_ref::<AsyncResult>() {
                    let mut detail = result.cookie.0.to_le_bytes().to_vec();
                    detail.push(result.error_code.as_raw());
                    self.trace.record(now, me, kind, &detail);
                }
            }
            event_type::WIFI_SCAN_RESULT => {
                if let Some(scan) = data.downcast_ref::<WifiScanEvent>() {
                    let detail: Vec<u8> = scan
                        .results
                        .iter()
                        .flat_map(|result| result.bssid)
                        .collect();
                    self.trace.record(now, me, kind, &detail);
                }
            }
            _ => {}
        }
    }
}

/// Polls cell info every interval.
pub struct CellInfoApp {
    interval: Duration,
    trace: TraceRecorder,
}

impl CellInfoApp {
    pub fn new(interval: Duration, trace: TraceRecorder) -> Self {
        Self { interval, trace }
    }
}

impl NanoappHandler for CellInfoApp {
    fn start(&mut self, api: &mut NanoappApi<'_>) -> bool {
        api.set_timer(self.interval, Cookie::NONE, false).is_valid()
    }

    fn handle_event(
        &mut self,
        api: &mut NanoappApi<'_>,
        _sender: InstanceId,
        kind: u16,
        data: &dyn Any,
    ) {
        match kind {
            event_type::TIMER => {
                // Busy while the previous poll is outstanding.
                let cookie = Cookie(api.time_ns());
                api.wwan_get_cell_info(cookie);
            }
            event_type::WWAN_CELL_INFO_RESULT => {
                if let Some(result) = data.downcast_ref::<WwanCellInfoResult>() {
                    let mut detail = vec![result.error_code];
                    for cell in &result.cells {
                        detail.extend_from_slice(&cell.cell_id.to_le_bytes());
                    }
                    self.trace
                        .record(api.time_ns(), api.instance_id(), kind, &detail);
                }
            }
            _ => {}
        }
    }
}
