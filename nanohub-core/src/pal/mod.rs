//! ## nanohub-core::pal
//! **Asynchronous hardware interfaces**
//!
//! Each PAL is opened with a callbacks handle. Request methods return `true` when the
//! hardware accepted the request; the outcome arrives later through the callbacks, possibly
//! on a foreign thread. The callbacks never touch manager state: they defer a
//! [`crate::events::SystemCallback`] so the matching request manager handles the completion on
//! the loop thread.

use std::sync::Arc;

use crate::time::Clock;

pub mod gnss;
pub mod unsupported;
pub mod wifi;
pub mod wwan;

pub use gnss::{
    GnssCapabilities, GnssDataEvent, GnssLocationEvent, GnssMeasurement, GnssPal,
    GnssPalCallbacks, GnssPalEvent,
};
pub use wifi::{
    WifiCapabilities, WifiPal, WifiPalCallbacks, WifiPalEvent, WifiRangingEvent,
    WifiRangingParams, WifiRangingResult, WifiScanEvent, WifiScanParams, WifiScanResult,
    WifiScanType,
};
pub use unsupported::{NoGnssPal, NoWifiPal, NoWwanPal};
pub use wwan::{
    CellInfo, CellKind, WwanCapabilities, WwanCellInfoResult, WwanPal, WwanPalCallbacks,
    WwanPalEvent,
};

/// Runtime services offered to PAL implementations at open time.
#[derive(Clone)]
pub struct PalSystemApi {
    clock: Arc<dyn Clock>,
}

impl PalSystemApi {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }
}
