use bitflags::bitflags;

use super::PalSystemApi;
use crate::events::{EventPoster, SystemCallback};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct WifiCapabilities: u32 {
        const SCAN_MONITORING = 1 << 0;
        const ON_DEMAND_SCAN = 1 << 1;
        const RADIO_CHAIN_PREF = 1 << 2;
        const RTT_RANGING = 1 << 3;
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WifiScanType {
    #[default]
    Active,
    ActivePlusPassiveDfs,
    Passive,
    NoPreference,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WifiScanParams {
    pub scan_type: WifiScanType,
    /// Cached results younger than this may be returned instead of scanning.
    pub max_scan_age_ms: u32,
    /// Empty means all supported frequencies.
    pub frequencies_mhz: Vec<u32>,
    pub ssids: Vec<String>,
}

impl WifiScanParams {
    pub const MAX_SSIDS: usize = 20;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WifiScanResult {
    pub ssid: String,
    pub bssid: [u8; 6],
    pub rssi_dbm: i8,
    pub primary_channel_mhz: u32,
}

/// Payload of [`crate::types::event_type::WIFI_SCAN_RESULT`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WifiScanEvent {
    pub scan_type: WifiScanType,
    pub reference_time_ns: u64,
    pub results: Vec<WifiScanResult>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WifiRangingParams {
    pub targets: Vec<[u8; 6]>,
}

impl WifiRangingParams {
    pub const MAX_TARGETS: usize = 10;
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WifiRangingResult {
    pub bssid: [u8; 6],
    pub distance_mm: u32,
    pub success: bool,
}

/// Payload of [`crate::types::event_type::WIFI_RANGING_RESULT`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct WifiRangingEvent {
    pub results: Vec<WifiRangingResult>,
}

pub trait WifiPal: Send {
    fn open(&mut self, system: &PalSystemApi, callbacks: WifiPalCallbacks) -> bool;
    fn close(&mut self);
    fn capabilities(&self) -> WifiCapabilities;
    fn configure_scan_monitor(&mut self, enable: bool) -> bool;
    fn request_scan(&mut self, params: &WifiScanParams) -> bool;
    fn request_ranging(&mut self, params: &WifiRangingParams) -> bool;
}

/// Completions reported by a [`WifiPal`], in raw PAL error codes.
#[derive(Debug)]
pub enum WifiPalEvent {
    ScanMonitorStatusChange { enabled: bool, error_code: u8 },
    /// Acknowledges (or refuses) an on-demand scan; results follow as a `ScanEvent`.
    ScanResponse { pending: bool, error_code: u8 },
    ScanEvent(WifiScanEvent),
    RangingEvent {
        error_code: u8,
        event: Option<WifiRangingEvent>,
    },
}

/// Handed to the PAL at open; safe to call from any thread.
#[derive(Clone)]
pub struct WifiPalCallbacks {
    poster: EventPoster,
}

impl WifiPalCallbacks {
    pub(crate) fn new(poster: EventPoster) -> Self {
        Self { poster }
    }

    fn defer(&self, event: WifiPalEvent) {
        self.poster
            .defer_callback_or_die(SystemCallback::Wifi(event));
    }

    pub fn scan_monitor_status_change(&self, enabled: bool, error_code: u8) {
        self.defer(WifiPalEvent::ScanMonitorStatusChange {
            enabled,
            error_code,
        });
    }

    pub fn scan_response(&self, pending: bool, error_code: u8) {
        self.defer(WifiPalEvent::ScanResponse {
            pending,
            error_code,
        });
    }

    pub fn scan_event(&self, event: WifiScanEvent) {
        self.defer(WifiPalEvent::ScanEvent(event));
    }

    pub fn ranging_event(&self, error_code: u8, event: Option<WifiRangingEvent>) {
        self.defer(WifiPalEvent::RangingEvent { error_code, event });
    }
}
