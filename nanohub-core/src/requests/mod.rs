//! ## nanohub-core::requests
//! **Request managers for asynchronous hardware resources**
//!
//! Every manager owns one [`RequestSlot`] per sub-resource. A slot holds at most one in-flight
//! PAL request; a new request while it is occupied is refused without touching the PAL. PAL
//! completions are deferred onto the loop thread, matched against the slot, posted to the
//! requester, and counted in an [`ErrorHistogram`].
//!
//! ### Key Submodules:
//! - `wifi/`: scan monitor, on-demand scan with retry, ranging
//! - `wwan/`: cell info
//! - `gnss/`: location and measurement sessions

use std::fmt::Write;
use std::sync::Arc;
use std::time::Duration;

use nanohub_telemetry::MetricsRecorder;
use thiserror::Error;

use crate::time::{Clock, TimerPool};
use crate::types::{Cookie, InstanceId, TimerHandle};

pub mod gnss;
pub mod wifi;
pub mod wwan;

pub use gnss::GnssManager;
pub use wifi::WifiRequestManager;
pub use wwan::WwanRequestManager;

/// Result codes carried by completion events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ErrorCode {
    None = 0,
    Error = 1,
    InvalidArgument = 2,
    Busy = 3,
    NoMemory = 4,
    NotSupported = 5,
    Timeout = 6,
    FunctionDisabled = 7,
    RejectedRateLimit = 8,
    FunctionRestrictedToOtherMaster = 9,
    FunctionRestrictedToOtherClient = 10,
    ObsoleteRequest = 11,
}

impl ErrorCode {
    pub const COUNT: usize = 12;

    const ALL: [ErrorCode; Self::COUNT] = [
        ErrorCode::None,
        ErrorCode::Error,
        ErrorCode::InvalidArgument,
        ErrorCode::Busy,
        ErrorCode::NoMemory,
        ErrorCode::NotSupported,
        ErrorCode::Timeout,
        ErrorCode::FunctionDisabled,
        ErrorCode::RejectedRateLimit,
        ErrorCode::FunctionRestrictedToOtherMaster,
        ErrorCode::FunctionRestrictedToOtherClient,
        ErrorCode::ObsoleteRequest,
    ];

    pub fn from_raw(raw: u8) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }

    pub fn as_raw(self) -> u8 {
        self as u8
    }

    pub fn is_success(self) -> bool {
        self == ErrorCode::None
    }

    /// Failures worth retrying after a backoff.
    pub fn is_recoverable(self) -> bool {
        matches!(self, ErrorCode::Busy | ErrorCode::RejectedRateLimit)
    }
}

/// Payload of the per-domain `*_ASYNC_RESULT` events.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AsyncResult {
    /// Domain-specific request kind, see each manager's `request_type` module.
    pub request_type: u8,
    pub success: bool,
    pub error_code: ErrorCode,
    pub cookie: Cookie,
}

impl AsyncResult {
    pub fn new(request_type: u8, error_code: ErrorCode, cookie: Cookie) -> Self {
        Self {
            request_type,
            success: error_code.is_success(),
            error_code,
            cookie,
        }
    }
}

/// Admission failures; the request never reached (or was refused by) the PAL.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RequestError {
    #[error("A {0} request is already in flight")]
    Busy(&'static str),

    #[error("PAL refused the {0} request")]
    PalRejected(&'static str),

    #[error("Invalid {0} request: {1}")]
    InvalidArgument(&'static str, &'static str),

    #[error("{0} is not supported by this platform")]
    NotSupported(&'static str),
}

/// Counts of completion codes, indexed by [`ErrorCode`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ErrorHistogram {
    counts: [u32; ErrorCode::COUNT],
}

impl ErrorHistogram {
    /// Counts a raw PAL code. Codes outside the known set are logged, not counted, and read
    /// back as [`ErrorCode::Error`].
    pub fn record(&mut self, raw: u8) -> ErrorCode {
        match ErrorCode::from_raw(raw) {
            Some(code) => {
                self.counts[code as usize] = self.counts[code as usize].saturating_add(1);
                code
            }
            None => {
                tracing::error!(error_code = raw, "Undefined error code from PAL");
                ErrorCode::Error
            }
        }
    }

    pub fn count(&self, code: ErrorCode) -> u32 {
        self.counts[code as usize]
    }

    pub fn total(&self) -> u32 {
        self.counts.iter().sum()
    }

    pub(crate) fn dump(&self, label: &str, out: &mut String) {
        let _ = write!(out, "   {label}:");
        for code in ErrorCode::ALL {
            let count = self.counts[code as usize];
            if count > 0 {
                let _ = write!(out, " {code:?}={count}");
            }
        }
        out.push('\n');
    }
}

/// Bookkeeping for the one in-flight request of a sub-resource.
#[derive(Clone, Debug)]
pub struct PendingRequest<K> {
    /// `None` for system-initiated requests, or after the requester unloaded.
    pub instance_id: Option<InstanceId>,
    pub cookie: Cookie,
    pub requested_at_ns: u64,
    pub timeout: Duration,
    /// System timer that fails the request if the PAL never answers.
    pub timeout_timer: TimerHandle,
    pub kind: K,
}

impl<K> PendingRequest<K> {
    pub fn deadline_ns(&self) -> u64 {
        self.requested_at_ns
            .saturating_add(u64::try_from(self.timeout.as_nanos()).unwrap_or(u64::MAX))
    }
}

#[derive(Debug)]
pub struct RequestSlot<K> {
    pending: Option<PendingRequest<K>>,
}

impl<K> Default for RequestSlot<K> {
    fn default() -> Self {
        Self { pending: None }
    }
}

impl<K> RequestSlot<K> {
    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn pending(&self) -> Option<&PendingRequest<K>> {
        self.pending.as_ref()
    }

    pub fn pending_mut(&mut self) -> Option<&mut PendingRequest<K>> {
        self.pending.as_mut()
    }

    /// Fills an empty slot. Callers check [`Self::is_pending`] first.
    pub fn occupy(&mut self, request: PendingRequest<K>) {
        debug_assert!(self.pending.is_none(), "request slot already occupied");
        self.pending = Some(request);
    }

    pub fn take(&mut self) -> Option<PendingRequest<K>> {
        self.pending.take()
    }

    pub fn is_owned_by(&self, instance_id: InstanceId) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|request| request.instance_id == Some(instance_id))
    }

    /// True when the slot's timeout timer is `handle`.
    pub fn is_timed_by(&self, handle: TimerHandle) -> bool {
        self.pending
            .as_ref()
            .is_some_and(|request| request.timeout_timer == handle)
    }
}

/// Runtime services shared by the request managers.
#[derive(Clone)]
pub struct ResourceContext {
    pub timer_pool: Arc<TimerPool>,
    pub clock: Arc<dyn Clock>,
    pub metrics: Option<MetricsRecorder>,
}

impl ResourceContext {
    pub(crate) fn record_pal_error(&self, resource: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_pal_error(resource);
        }
    }

    pub(crate) fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }
}

pub(crate) fn dump_pending<K: std::fmt::Debug>(
    label: &str,
    slot: &RequestSlot<K>,
    out: &mut String,
) {
    if let Some(request) = slot.pending() {
        let requester = request
            .instance_id
            .map_or_else(|| "system".to_string(), |id| id.to_string());
        let _ = writeln!(
            out,
            " {label} request pending: instance={requester} cookie={} requested_at={}ns {:?}",
            request.cookie.0, request.requested_at_ns, request.kind
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    #[test]
    fn raw_codes_round_trip_through_the_closed_set() {
        assert_eq!(ErrorCode::from_raw(0), Some(ErrorCode::None));
        assert_eq!(ErrorCode::from_raw(8), Some(ErrorCode::RejectedRateLimit));
        assert_eq!(ErrorCode::from_raw(11), Some(ErrorCode::ObsoleteRequest));
        assert_eq!(ErrorCode::from_raw(12), None);
        assert_eq!(ErrorCode::Timeout.as_raw(), 6);
    }

    #[test]
    fn only_busy_and_rate_limit_are_recoverable() {
        assert!(ErrorCode::Busy.is_recoverable());
        assert!(ErrorCode::RejectedRateLimit.is_recoverable());
        assert!(!ErrorCode::Error.is_recoverable());
        assert!(!ErrorCode::None.is_recoverable());
    }

    #[traced_test]
    #[test]
    fn histogram_ignores_undefined_codes() {
        let mut histogram = ErrorHistogram::default();
        assert_eq!(histogram.record(0), ErrorCode::None);
        assert_eq!(histogram.record(3), ErrorCode::Busy);
        assert_eq!(histogram.record(200), ErrorCode::Error);
        assert_eq!(histogram.total(), 2);
        assert_eq!(histogram.count(ErrorCode::Error), 0);
        assert!(logs_contain("Undefined error code"));

        let mut out = String::new();
        histogram.dump("Scan", &mut out);
        assert_eq!(out, "   Scan: None=1 Busy=1\n");
    }

    #[test]
    fn slot_tracks_owner_and_timer() {
        let mut slot = RequestSlot::default();
        assert!(!slot.is_pending());
        slot.occupy(PendingRequest {
            instance_id: Some(InstanceId(4)),
            cookie: Cookie(9),
            requested_at_ns: 1_000,
            timeout: Duration::from_micros(1),
            timeout_timer: TimerHandle(12),
            kind: (),
        });
        assert!(slot.is_owned_by(InstanceId(4)));
        assert!(!slot.is_owned_by(InstanceId(5)));
        assert!(slot.is_timed_by(TimerHandle(12)));
        assert_eq!(slot.pending().map(PendingRequest::deadline_ns), Some(2_000));
        assert_eq!(slot.take().map(|request| request.cookie), Some(Cookie(9)));
        assert!(!slot.is_pending());
    }
}
