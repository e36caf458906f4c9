//! Simulated PALs.
//!
//! Each PAL comes in two modes. A scripted PAL only records requests; the test completes them
//! through the PAL's handle, from any thread. A chaotic PAL completes every request itself,
//! drawing faults and payloads from a seeded [`ChaosEngine`].
//!
//! Completions go through the runtime's PAL callbacks, so they are deferred onto the loop
//! exactly like a hardware driver's would be.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::Rng;

use nanohub_core::pal::{
    CellInfo, CellKind, GnssCapabilities, GnssDataEvent, GnssLocationEvent, GnssPal,
    GnssPalCallbacks, PalSystemApi, WifiCapabilities, WifiPal, WifiPalCallbacks,
    WifiRangingEvent, WifiRangingParams, WifiRangingResult, WifiScanEvent, WifiScanParams,
    WifiScanResult, WwanCapabilities, WwanCellInfoResult, WwanPal, WwanPalCallbacks,
};
use nanohub_core::requests::ErrorCode;
use nanohub_core::types::Cookie;

use crate::chaos::{ChaosEngine, Fault};

const CHANNELS_MHZ: [u32; 4] = [2412, 2437, 2462, 5180];

// WiFi

#[derive(Default)]
struct WifiState {
    callbacks: Option<WifiPalCallbacks>,
    system: Option<PalSystemApi>,
    refuse_requests: bool,
    monitor_requests: Vec<bool>,
    scan_requests: Vec<WifiScanParams>,
    ranging_requests: Vec<WifiRangingParams>,
    chaos: Option<ChaosEngine>,
}

pub struct SimWifiPal {
    state: Arc<Mutex<WifiState>>,
    capabilities: WifiCapabilities,
}

impl SimWifiPal {
    pub fn scripted() -> Self {
        Self {
            state: Arc::default(),
            capabilities: WifiCapabilities::all(),
        }
    }

    pub fn chaotic(chaos: ChaosEngine) -> Self {
        let pal = Self::scripted();
        pal.state.lock().chaos = Some(chaos);
        pal
    }

    pub fn with_capabilities(mut self, capabilities: WifiCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    pub fn handle(&self) -> SimWifiHandle {
        SimWifiHandle {
            state: self.state.clone(),
        }
    }
}

impl WifiPal for SimWifiPal {
    fn open(&mut self, system: &PalSystemApi, callbacks: WifiPalCallbacks) -> bool {
        let mut state = self.state.lock();
        state.callbacks = Some(callbacks);
        state.system = Some(system.clone());
        true
    }

    fn close(&mut self) {
        let mut state = self.state.lock();
        state.callbacks = None;
        state.system = None;
    }

    fn capabilities(&self) -> WifiCapabilities {
        self.capabilities
    }

    fn configure_scan_monitor(&mut self, enable: bool) -> bool {
        let mut state = self.state.lock();
        if state.refuse_requests {
            return false;
        }
        state.monitor_requests.push(enable);
        let WifiState {
            callbacks: Some(callbacks),
            chaos: Some(chaos),
            ..
        } = &mut *state
        else {
            return true;
        };
        match chaos.next_fault() {
            Fault::None => callbacks.scan_monitor_status_change(enable, ErrorCode::None.as_raw()),
            Fault::Nack(code) => callbacks.scan_monitor_status_change(!enable, code.as_raw()),
            Fault::Drop => {}
        }
        true
    }

    fn request_scan(&mut self, params: &WifiScanParams) -> bool {
        let mut state = self.state.lock();
        if state.refuse_requests {
            return false;
        }
        state.scan_requests.push(params.clone());
        let now_ns = state.system.as_ref().map_or(0, PalSystemApi::now_ns);
        let WifiState {
            callbacks: Some(callbacks),
            chaos: Some(chaos),
            ..
        } = &mut *state
        else {
            return true;
        };
        match chaos.next_fault() {
            Fault::Nack(code) => callbacks.scan_response(false, code.as_raw()),
            Fault::Drop => callbacks.scan_response(true, ErrorCode::None.as_raw()),
            Fault::None => {
                callbacks.scan_response(true, ErrorCode::None.as_raw());
                callbacks.scan_event(synthetic_scan(chaos, params, now_ns));
            }
        }
        true
    }

    fn request_ranging(&mut self, params: &WifiRangingParams) -> bool {
        let mut state = self.state.lock();
        if state.refuse_requests {
            return false;
        }
        state.ranging_requests.push(params.clone());
        let WifiState {
            callbacks: Some(callbacks),
            chaos: Some(chaos),
            ..
        } = &mut *state
        else {
            return true;
        };
        match chaos.next_fault() {
            Fault::Nack(code) => callbacks.ranging_event(code.as_raw(), None),
            Fault::Drop => {}
            Fault::None => {
                let results = params
                    .targets
                    .iter()
                    .map(|bssid| WifiRangingResult {
                        bssid: *bssid,
                        distance_mm: chaos.rng().random_range(500..50_000),
                        success: true,
                    })
                    .collect();
                callbacks.ranging_event(
                    ErrorCode::None.as_raw(),
                    Some(WifiRangingEvent { results }),
                );
            }
        }
        true
    }
}

fn synthetic_scan(chaos: &mut ChaosEngine, params: &WifiScanParams, now_ns: u64) -> WifiScanEvent {
    let rng = chaos.rng();
    let count = rng.random_range(1..=4usize);
    let results = (0..count)
        .map(|index| {
            let mut bssid = [0u8; 6];
            rng.fill(&mut bssid[..]);
            let ssid = match params.ssids.get(index % params.ssids.len().max(1)) {
                Some(ssid) => ssid.clone(),
                None => format!("sim-ap-{index}"),
            };
            WifiScanResult {
                ssid,
                bssid,
                rssi_dbm: rng.random_range(-90..=-30),
                primary_channel_mhz: CHANNELS_MHZ[rng.random_range(0..CHANNELS_MHZ.len())],
            }
        })
        .collect();
    WifiScanEvent {
        scan_type: params.scan_type,
        reference_time_ns: now_ns,
        results,
    }
}

/// Test-side view of a [`SimWifiPal`]; completion methods return `false` while it is closed.
#[derive(Clone)]
pub struct SimWifiHandle {
    state: Arc<Mutex<WifiState>>,
}

impl SimWifiHandle {
    fn callbacks(&self) -> Option<WifiPalCallbacks> {
        self.state.lock().callbacks.clone()
    }

    /// Makes every subsequent request fail synchronously.
    pub fn set_refuse_requests(&self, refuse: bool) {
        self.state.lock().refuse_requests = refuse;
    }

    pub fn is_open(&self) -> bool {
        self.state.lock().callbacks.is_some()
    }

    pub fn scan_requests(&self) -> usize {
        self.state.lock().scan_requests.len()
    }

    pub fn last_scan_params(&self) -> Option<WifiScanParams> {
        self.state.lock().scan_requests.last().cloned()
    }

    pub fn monitor_requests(&self) -> Vec<bool> {
        self.state.lock().monitor_requests.clone()
    }

    pub fn ranging_requests(&self) -> usize {
        self.state.lock().ranging_requests.len()
    }

    pub fn scan_response(&self, pending: bool, code: ErrorCode) -> bool {
        self.callbacks()
            .map(|callbacks| callbacks.scan_response(pending, code.as_raw()))
            .is_some()
    }

    pub fn scan_event(&self, event: WifiScanEvent) -> bool {
        self.callbacks()
            .map(|callbacks| callbacks.scan_event(event))
            .is_some()
    }

    pub fn scan_monitor_status(&self, enabled: bool, code: ErrorCode) -> bool {
        self.callbacks()
            .map(|callbacks| callbacks.scan_monitor_status_change(enabled, code.as_raw()))
            .is_some()
    }

    pub fn ranging_event(&self, code: ErrorCode, event: Option<WifiRangingEvent>) -> bool {
        self.callbacks()
            .map(|callbacks| callbacks.ranging_event(code.as_raw(), event))
            .is_some()
    }
}

// WWAN

#[derive(Default)]
struct WwanState {
    callbacks: Option<WwanPalCallbacks>,
    refuse_requests: bool,
    cell_info_requests: usize,
    chaos: Option<ChaosEngine>,
}

pub struct SimWwanPal {
    state: Arc<Mutex<WwanState>>,
}

impl SimWwanPal {
    pub fn scripted() -> Self {
        Self {
            state: Arc::default(),
        }
    }

    pub fn chaotic(chaos: ChaosEngine) -> Self {
        let pal = Self::scripted();
        pal.state.lock().chaos = Some(chaos);
        pal
    }

    pub fn handle(&self) -> SimWwanHandle {
        SimWwanHandle {
            state: self.state.clone(),
        }
    }
}

impl WwanPal for SimWwanPal {
    fn open(&mut self, _system: &PalSystemApi, callbacks: WwanPalCallbacks) -> bool {
        self.state.lock().callbacks = Some(callbacks);
        true
    }

    fn close(&mut self) {
        self.state.lock().callbacks = None;
    }

    fn capabilities(&self) -> WwanCapabilities {
        WwanCapabilities::GET_CELL_INFO
    }

    fn request_cell_info(&mut self) -> bool {
        let mut state = self.state.lock();
        if state.refuse_requests {
            return false;
        }
        state.cell_info_requests += 1;
        let WwanState {
            callbacks: Some(callbacks),
            chaos: Some(chaos),
            ..
        } = &mut *state
        else {
            return true;
        };
        match chaos.next_fault() {
            Fault::Drop => {}
            Fault::Nack(code) => callbacks.cell_info_result(WwanCellInfoResult {
                error_code: code.as_raw(),
                ..Default::default()
            }),
            Fault::None => {
                let rng = chaos.rng();
                let cells = (0..rng.random_range(1..=3usize))
                    .map(|index| CellInfo {
                        kind: CellKind::Lte,
                        registered: index == 0,
                        cell_id: rng.random(),
                        signal_dbm: rng.random_range(-120..=-60),
                    })
                    .collect();
                callbacks.cell_info_result(WwanCellInfoResult {
                    error_code: ErrorCode::None.as_raw(),
                    cookie: Cookie::NONE,
                    cells,
                });
            }
        }
        true
    }
}

#[derive(Clone)]
pub struct SimWwanHandle {
    state: Arc<Mutex<WwanState>>,
}

impl SimWwanHandle {
    pub fn set_refuse_requests(&self, refuse: bool) {
        self.state.lock().refuse_requests = refuse;
    }

    pub fn cell_info_requests(&self) -> usize {
        self.state.lock().cell_info_requests
    }

    pub fn cell_info_result(&self, code: ErrorCode, cells: Vec<CellInfo>) -> bool {
        let callbacks = self.state.lock().callbacks.clone();
        callbacks
            .map(|callbacks| {
                callbacks.cell_info_result(WwanCellInfoResult {
                    error_code: code.as_raw(),
                    cookie: Cookie::NONE,
                    cells,
                })
            })
            .is_some()
    }
}

// GNSS

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LocationRequest {
    pub enable: bool,
    pub min_interval: Duration,
    pub min_time_to_next_fix: Duration,
}

#[derive(Default)]
struct GnssState {
    callbacks: Option<GnssPalCallbacks>,
    refuse_requests: bool,
    location_requests: Vec<LocationRequest>,
    measurement_requests: Vec<(bool, Duration)>,
    chaos: Option<ChaosEngine>,
}

pub struct SimGnssPal {
    state: Arc<Mutex<GnssState>>,
}

impl SimGnssPal {
    pub fn scripted() -> Self {
        Self {
            state: Arc::default(),
        }
    }

    /// Acknowledges session changes on its own; fixes are still pushed through the handle.
    pub fn chaotic(chaos: ChaosEngine) -> Self {
        let pal = Self::scripted();
        pal.state.lock().chaos = Some(chaos);
        pal
    }

    pub fn handle(&self) -> SimGnssHandle {
        SimGnssHandle {
            state: self.state.clone(),
        }
    }

    fn acknowledge(state: &mut GnssState, enable: bool, report: fn(&GnssPalCallbacks, bool, u8)) {
        let GnssState {
            callbacks: Some(callbacks),
            chaos: Some(chaos),
            ..
        } = state
        else {
            return;
        };
        match chaos.next_fault() {
            Fault::None => report(callbacks, enable, ErrorCode::None.as_raw()),
            Fault::Nack(code) => report(callbacks, !enable, code.as_raw()),
            Fault::Drop => {}
        }
    }
}

impl GnssPal for SimGnssPal {
    fn open(&mut self, _system: &PalSystemApi, callbacks: GnssPalCallbacks) -> bool {
        self.state.lock().callbacks = Some(callbacks);
        true
    }

    fn close(&mut self) {
        self.state.lock().callbacks = None;
    }

    fn capabilities(&self) -> GnssCapabilities {
        GnssCapabilities::LOCATION | GnssCapabilities::MEASUREMENTS
    }

    fn control_location_session(
        &mut self,
        enable: bool,
        min_interval: Duration,
        min_time_to_next_fix: Duration,
    ) -> bool {
        let mut state = self.state.lock();
        if state.refuse_requests {
            return false;
        }
        state.location_requests.push(LocationRequest {
            enable,
            min_interval,
            min_time_to_next_fix,
        });
        Self::acknowledge(&mut state, enable, GnssPalCallbacks::location_status_change);
        true
    }

    fn control_measurement_session(&mut self, enable: bool, min_interval: Duration) -> bool {
        let mut state = self.state.lock();
        if state.refuse_requests {
            return false;
        }
        state.measurement_requests.push((enable, min_interval));
        Self::acknowledge(&mut state, enable, GnssPalCallbacks::measurement_status_change);
        true
    }
}

#[derive(Clone)]
pub struct SimGnssHandle {
    state: Arc<Mutex<GnssState>>,
}

impl SimGnssHandle {
    fn callbacks(&self) -> Option<GnssPalCallbacks> {
        self.state.lock().callbacks.clone()
    }

    pub fn set_refuse_requests(&self, refuse: bool) {
        self.state.lock().refuse_requests = refuse;
    }

    pub fn location_requests(&self) -> Vec<LocationRequest> {
        self.state.lock().location_requests.clone()
    }

    pub fn measurement_requests(&self) -> Vec<(bool, Duration)> {
        self.state.lock().measurement_requests.clone()
    }

    pub fn location_status(&self, enabled: bool, code: ErrorCode) -> bool {
        self.callbacks()
            .map(|callbacks| callbacks.location_status_change(enabled, code.as_raw()))
            .is_some()
    }

    pub fn location_event(&self, event: GnssLocationEvent) -> bool {
        self.callbacks()
            .map(|callbacks| callbacks.location_event(event))
            .is_some()
    }

    pub fn measurement_status(&self, enabled: bool, code: ErrorCode) -> bool {
        self.callbacks()
            .map(|callbacks| callbacks.measurement_status_change(enabled, code.as_raw()))
            .is_some()
    }

    pub fn measurement_event(&self, event: GnssDataEvent) -> bool {
        self.callbacks()
            .map(|callbacks| callbacks.measurement_event(event))
            .is_some()
    }
}
