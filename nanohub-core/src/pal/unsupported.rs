//! PALs for platforms without the hardware: open succeeds, no capabilities, every request
//! is refused.

use std::time::Duration;

use super::{
    GnssCapabilities, GnssPal, GnssPalCallbacks, PalSystemApi, WifiCapabilities, WifiPal,
    WifiPalCallbacks, WifiRangingParams, WifiScanParams, WwanCapabilities, WwanPal,
    WwanPalCallbacks,
};

#[derive(Debug, Default)]
pub struct NoWifiPal;

impl WifiPal for NoWifiPal {
    fn open(&mut self, _: &PalSystemApi, _: WifiPalCallbacks) -> bool {
        true
    }

    fn close(&mut self) {}

    fn capabilities(&self) -> WifiCapabilities {
        WifiCapabilities::empty()
    }

    fn configure_scan_monitor(&mut self, _: bool) -> bool {
        false
    }

    fn request_scan(&mut self, _: &WifiScanParams) -> bool {
        false
    }

    fn request_ranging(&mut self, _: &WifiRangingParams) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct NoWwanPal;

impl WwanPal for NoWwanPal {
    fn open(&mut self, _: &PalSystemApi, _: WwanPalCallbacks) -> bool {
        true
    }

    fn close(&mut self) {}

    fn capabilities(&self) -> WwanCapabilities {
        WwanCapabilities::empty()
    }

    fn request_cell_info(&mut self) -> bool {
        false
    }
}

#[derive(Debug, Default)]
pub struct NoGnssPal;

impl GnssPal for NoGnssPal {
    fn open(&mut self, _: &PalSystemApi, _: GnssPalCallbacks) -> bool {
        true
    }

    fn close(&mut self) {}

    fn capabilities(&self) -> GnssCapabilities {
        GnssCapabilities::empty()
    }

    fn control_location_session(&mut self, _: bool, _: Duration, _: Duration) -> bool {
        false
    }

    fn control_measurement_session(&mut self, _: bool, _: Duration) -> bool {
        false
    }
}
