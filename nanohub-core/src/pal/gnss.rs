use std::time::Duration;

use bitflags::bitflags;

use super::PalSystemApi;
use crate::events::{EventPoster, SystemCallback};

bitflags! {
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct GnssCapabilities: u32 {
        const LOCATION = 1 << 0;
        const MEASUREMENTS = 1 << 1;
        const ENGINE_BASED_PASSIVE_LISTENER = 1 << 2;
    }
}

/// Payload of [`crate::types::event_type::GNSS_LOCATION`].
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct GnssLocationEvent {
    pub timestamp_ns: u64,
    pub latitude_deg_e7: i32,
    pub longitude_deg_e7: i32,
    pub accuracy_m: f32,
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GnssMeasurement {
    pub svid: i16,
    pub cn0_dbhz: f32,
}

/// Payload of [`crate::types::event_type::GNSS_DATA`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GnssDataEvent {
    pub timestamp_ns: u64,
    pub measurements: Vec<GnssMeasurement>,
}

pub trait GnssPal: Send {
    fn open(&mut self, system: &PalSystemApi, callbacks: GnssPalCallbacks) -> bool;
    fn close(&mut self);
    fn capabilities(&self) -> GnssCapabilities;
    fn control_location_session(
        &mut self,
        enable: bool,
        min_interval: Duration,
        min_time_to_next_fix: Duration,
    ) -> bool;
    fn control_measurement_session(&mut self, enable: bool, min_interval: Duration) -> bool;
}

#[derive(Debug)]
pub enum GnssPalEvent {
    LocationStatusChange { enabled: bool, error_code: u8 },
    Location(GnssLocationEvent),
    MeasurementStatusChange { enabled: bool, error_code: u8 },
    Measurement(GnssDataEvent),
}

#[derive(Clone)]
pub struct GnssPalCallbacks {
    poster: EventPoster,
}

impl GnssPalCallbacks {
    pub(crate) fn new(poster: EventPoster) -> Self {
        Self { poster }
    }

    fn defer(&self, event: GnssPalEvent) {
        self.poster.defer_callback_or_die(SystemCallback::Gnss(event));
    }

    pub fn location_status_change(&self, enabled: bool, error_code: u8) {
        self.defer(GnssPalEvent::LocationStatusChange {
            enabled,
            error_code,
        });
    }

    pub fn location_event(&self, event: GnssLocationEvent) {
        self.defer(GnssPalEvent::Location(event));
    }

    pub fn measurement_status_change(&self, enabled: bool, error_code: u8) {
        self.defer(GnssPalEvent::MeasurementStatusChange {
            enabled,
            error_code,
        });
    }

    pub fn measurement_event(&self, event: GnssDataEvent) {
        self.defer(GnssPalEvent::Measurement(event));
    }
}
