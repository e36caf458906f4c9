//! GNSS location and measurement sessions.
//!
//! Each session multiplexes any number of nanoapp requests onto one PAL session running at the
//! smallest requested interval. A nanoapp whose request doesn't change the aggregate is answered
//! immediately; otherwise the PAL is reconfigured and the answer waits for its status change.

use std::fmt::Write;
use std::time::Duration;

use nanohub_config::GnssConfig;

use super::{
    dump_pending, AsyncResult, ErrorCode, ErrorHistogram, PendingRequest, RequestError,
    RequestSlot, ResourceContext,
};
use crate::events::{Event, EventLoop, SystemTimerCallback};
use crate::pal::{
    GnssCapabilities, GnssDataEvent, GnssLocationEvent, GnssPal, GnssPalCallbacks, GnssPalEvent,
    PalSystemApi,
};
use crate::types::{event_type, Cookie, InstanceId, TimerHandle};

/// `AsyncResult::request_type` values for [`event_type::GNSS_ASYNC_RESULT`].
pub mod request_type {
    pub const LOCATION_SESSION_START: u8 = 1;
    pub const LOCATION_SESSION_STOP: u8 = 2;
    pub const MEASUREMENT_SESSION_START: u8 = 3;
    pub const MEASUREMENT_SESSION_STOP: u8 = 4;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SessionKind {
    Location,
    Measurement,
}

impl SessionKind {
    fn label(self) -> &'static str {
        match self {
            SessionKind::Location => "location session",
            SessionKind::Measurement => "measurement session",
        }
    }

    fn capability(self) -> GnssCapabilities {
        match self {
            SessionKind::Location => GnssCapabilities::LOCATION,
            SessionKind::Measurement => GnssCapabilities::MEASUREMENTS,
        }
    }

    fn request_type(self, enable: bool) -> u8 {
        match (self, enable) {
            (SessionKind::Location, true) => request_type::LOCATION_SESSION_START,
            (SessionKind::Location, false) => request_type::LOCATION_SESSION_STOP,
            (SessionKind::Measurement, true) => request_type::MEASUREMENT_SESSION_START,
            (SessionKind::Measurement, false) => request_type::MEASUREMENT_SESSION_STOP,
        }
    }

    fn data_event_type(self) -> u16 {
        match self {
            SessionKind::Location => event_type::GNSS_LOCATION,
            SessionKind::Measurement => event_type::GNSS_DATA,
        }
    }

    fn timeout_callback(self) -> SystemTimerCallback {
        match self {
            SessionKind::Location => SystemTimerCallback::GnssLocationSessionTimeout,
            SessionKind::Measurement => SystemTimerCallback::GnssMeasurementSessionTimeout,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct SessionRequest {
    instance_id: InstanceId,
    min_interval: Duration,
    min_time_to_next_fix: Duration,
}

/// PAL session configuration. The default value is "off".
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
struct SessionState {
    enabled: bool,
    min_interval: Duration,
    min_time_to_next_fix: Duration,
}

impl SessionState {
    fn aggregate<'a>(requests: impl Iterator<Item = &'a SessionRequest>) -> Self {
        requests.fold(Self::default(), |state, request| {
            if state.enabled {
                Self {
                    enabled: true,
                    min_interval: state.min_interval.min(request.min_interval),
                    min_time_to_next_fix: state
                        .min_time_to_next_fix
                        .min(request.min_time_to_next_fix),
                }
            } else {
                Self {
                    enabled: true,
                    min_interval: request.min_interval,
                    min_time_to_next_fix: request.min_time_to_next_fix,
                }
            }
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct SessionTransition {
    /// The requester's own entry after the transition; `None` removes it.
    request: Option<SessionRequest>,
    target: SessionState,
}

/// PAL access and timing shared by both sessions for one call.
struct Driver<'a> {
    pal: &'a mut dyn GnssPal,
    ctx: &'a ResourceContext,
    timeout: Duration,
}

impl Driver<'_> {
    fn control(&mut self, kind: SessionKind, target: SessionState) -> bool {
        match kind {
            SessionKind::Location => self.pal.control_location_session(
                target.enabled,
                target.min_interval,
                target.min_time_to_next_fix,
            ),
            SessionKind::Measurement => self
                .pal
                .control_measurement_session(target.enabled, target.min_interval),
        }
    }
}

struct GnssSession {
    kind: SessionKind,
    requests: Vec<SessionRequest>,
    /// Last configuration the PAL confirmed.
    state: SessionState,
    transition: RequestSlot<SessionTransition>,
    errors: ErrorHistogram,
}

impl GnssSession {
    fn new(kind: SessionKind) -> Self {
        Self {
            kind,
            requests: Vec::new(),
            state: SessionState::default(),
            transition: RequestSlot::default(),
            errors: ErrorHistogram::default(),
        }
    }

    fn post_result(
        &self,
        event_loop: &EventLoop,
        instance_id: InstanceId,
        enable: bool,
        code: ErrorCode,
        cookie: Cookie,
    ) {
        event_loop.post_event_or_die(Event::targeted(
            event_type::GNSS_ASYNC_RESULT,
            AsyncResult::new(self.kind.request_type(enable), code, cookie),
            instance_id,
        ));
    }

    fn others(&self, instance_id: InstanceId) -> impl Iterator<Item = &SessionRequest> {
        self.requests
            .iter()
            .filter(move |request| request.instance_id != instance_id)
    }

    fn request(
        &mut self,
        driver: &mut Driver<'_>,
        event_loop: &mut EventLoop,
        instance_id: InstanceId,
        request: Option<SessionRequest>,
        cookie: Cookie,
    ) -> Result<(), RequestError> {
        if self.transition.is_pending() {
            tracing::warn!(%instance_id, "GNSS {} transition already in flight", self.kind.label());
            return Err(RequestError::Busy(self.kind.label()));
        }

        let target = SessionState::aggregate(self.others(instance_id).chain(request.iter()));
        if target == self.state {
            self.apply(event_loop, instance_id, request);
            self.post_result(event_loop, instance_id, request.is_some(), ErrorCode::None, cookie);
            return Ok(());
        }

        if !driver.control(self.kind, target) {
            return Err(RequestError::PalRejected(self.kind.label()));
        }
        self.occupy(driver, Some(instance_id), cookie, SessionTransition { request, target });
        Ok(())
    }

    fn occupy(
        &mut self,
        driver: &Driver<'_>,
        instance_id: Option<InstanceId>,
        cookie: Cookie,
        transition: SessionTransition,
    ) {
        let timeout_timer = driver
            .ctx
            .timer_pool
            .set_system_timer(driver.timeout, self.kind.timeout_callback());
        self.transition.occupy(PendingRequest {
            instance_id,
            cookie,
            requested_at_ns: driver.ctx.now_ns(),
            timeout: driver.timeout,
            timeout_timer,
            kind: transition,
        });
    }

    fn apply(
        &mut self,
        event_loop: &mut EventLoop,
        instance_id: InstanceId,
        request: Option<SessionRequest>,
    ) {
        self.requests.retain(|entry| entry.instance_id != instance_id);
        match request {
            Some(request) => {
                self.requests.push(request);
                event_loop.subscribe(instance_id, self.kind.data_event_type());
            }
            None => {
                event_loop.unsubscribe(instance_id, self.kind.data_event_type());
            }
        }
    }

    fn handle_status_change(
        &mut self,
        driver: &mut Driver<'_>,
        event_loop: &mut EventLoop,
        enabled: bool,
        raw_error: u8,
    ) {
        let Some(pending) = self.transition.take() else {
            tracing::warn!(
                enabled,
                error_code = raw_error,
                "GNSS {} status change with no transition pending",
                self.kind.label()
            );
            return;
        };
        driver.ctx.timer_pool.cancel_system_timer(pending.timeout_timer);
        let code = self.errors.record(raw_error);

        let transition = pending.kind;
        let result = match code {
            ErrorCode::None if enabled == transition.target.enabled => {
                self.state = transition.target;
                ErrorCode::None
            }
            ErrorCode::None => ErrorCode::Error,
            failure => failure,
        };
        if !result.is_success() {
            driver.ctx.record_pal_error("gnss");
        }

        if let Some(instance_id) = pending.instance_id {
            if result.is_success() {
                self.apply(event_loop, instance_id, transition.request);
            }
            self.post_result(
                event_loop,
                instance_id,
                transition.request.is_some(),
                result,
                pending.cookie,
            );
        }
        self.reconcile(driver);
    }

    /// Issues a system-owned transition when the confirmed state no longer matches the
    /// remaining requests.
    fn reconcile(&mut self, driver: &mut Driver<'_>) {
        if self.transition.is_pending() {
            return;
        }
        let target = SessionState::aggregate(self.requests.iter());
        if target == self.state {
            return;
        }
        if driver.control(self.kind, target) {
            tracing::debug!(?target, "Reconfiguring GNSS {}", self.kind.label());
            self.occupy(
                driver,
                None,
                Cookie::NONE,
                SessionTransition {
                    request: None,
                    target,
                },
            );
        } else {
            tracing::warn!(?target, "PAL refused GNSS {} reconfiguration", self.kind.label());
        }
    }

    fn handle_timeout(&mut self, event_loop: &EventLoop, handle: TimerHandle) {
        if !self.transition.is_timed_by(handle) {
            tracing::debug!(%handle, "Stale GNSS {} timeout", self.kind.label());
            return;
        }
        let Some(pending) = self.transition.take() else {
            return;
        };
        tracing::warn!("GNSS {} transition timed out", self.kind.label());
        self.errors.record(ErrorCode::Timeout.as_raw());
        if let Some(instance_id) = pending.instance_id {
            self.post_result(
                event_loop,
                instance_id,
                pending.kind.request.is_some(),
                ErrorCode::Timeout,
                pending.cookie,
            );
        }
    }

    fn broadcast<T: std::any::Any + Send>(&self, event_loop: &EventLoop, data: T) {
        if !self.state.enabled {
            tracing::warn!("GNSS {} data while the session is off", self.kind.label());
            return;
        }
        if self.requests.is_empty() {
            return;
        }
        if !event_loop.post_event(Event::broadcast(self.kind.data_event_type(), data)) {
            tracing::error!("Failed to post GNSS {} data", self.kind.label());
        }
    }

    fn on_nanoapp_unloaded(&mut self, driver: &mut Driver<'_>, instance_id: InstanceId) {
        self.requests.retain(|request| request.instance_id != instance_id);
        if let Some(pending) = self
            .transition
            .pending_mut()
            .filter(|pending| pending.instance_id == Some(instance_id))
        {
            pending.instance_id = None;
            pending.kind.request = None;
        }
        self.reconcile(driver);
    }

    fn dump(&self, out: &mut String) {
        let _ = writeln!(
            out,
            " {}: enabled={} interval={:?} requests={}",
            self.kind.label(),
            self.state.enabled,
            self.state.min_interval,
            self.requests.len()
        );
        for request in &self.requests {
            let _ = writeln!(
                out,
                "  instance={} interval={:?}",
                request.instance_id, request.min_interval
            );
        }
        dump_pending(self.kind.label(), &self.transition, out);
    }
}

pub struct GnssManager {
    pal: Box<dyn GnssPal>,
    available: bool,
    config: GnssConfig,
    ctx: ResourceContext,
    location: GnssSession,
    measurement: GnssSession,
}

impl GnssManager {
    pub fn new(pal: Box<dyn GnssPal>, config: GnssConfig, ctx: ResourceContext) -> Self {
        Self {
            pal,
            available: false,
            config,
            ctx,
            location: GnssSession::new(SessionKind::Location),
            measurement: GnssSession::new(SessionKind::Measurement),
        }
    }

    pub(crate) fn init(&mut self, system: &PalSystemApi, callbacks: GnssPalCallbacks) {
        self.available = self.pal.open(system, callbacks);
        if !self.available {
            tracing::error!("GNSS PAL failed to open");
        }
    }

    pub(crate) fn deinit(&mut self) {
        if self.available {
            self.pal.close();
            self.available = false;
        }
    }

    pub fn capabilities(&self) -> GnssCapabilities {
        if self.available {
            self.pal.capabilities()
        } else {
            GnssCapabilities::empty()
        }
    }

    fn session_and_driver(&mut self, kind: SessionKind) -> (&mut GnssSession, Driver<'_>) {
        let session = match kind {
            SessionKind::Location => &mut self.location,
            SessionKind::Measurement => &mut self.measurement,
        };
        let driver = Driver {
            pal: self.pal.as_mut(),
            ctx: &self.ctx,
            timeout: self.config.session_timeout(),
        };
        (session, driver)
    }

    fn control_session(
        &mut self,
        kind: SessionKind,
        event_loop: &mut EventLoop,
        instance_id: InstanceId,
        request: Option<SessionRequest>,
        cookie: Cookie,
    ) -> Result<(), RequestError> {
        if !self.capabilities().contains(kind.capability()) {
            return Err(RequestError::NotSupported(kind.label()));
        }
        let (session, mut driver) = self.session_and_driver(kind);
        session.request(&mut driver, event_loop, instance_id, request, cookie)
    }

    /// Starts, retunes or stops `instance_id`'s location request. The answer arrives as a
    /// [`event_type::GNSS_ASYNC_RESULT`]; fixes arrive as broadcast [`event_type::GNSS_LOCATION`].
    pub fn control_location_session(
        &mut self,
        event_loop: &mut EventLoop,
        instance_id: InstanceId,
        enable: bool,
        min_interval: Duration,
        min_time_to_next_fix: Duration,
        cookie: Cookie,
    ) -> Result<(), RequestError> {
        let request = enable.then_some(SessionRequest {
            instance_id,
            min_interval,
            min_time_to_next_fix,
        });
        self.control_session(SessionKind::Location, event_loop, instance_id, request, cookie)
    }

    pub fn control_measurement_session(
        &mut self,
        event_loop: &mut EventLoop,
        instance_id: InstanceId,
        enable: bool,
        min_interval: Duration,
        cookie: Cookie,
    ) -> Result<(), RequestError> {
        let request = enable.then_some(SessionRequest {
            instance_id,
            min_interval,
            min_time_to_next_fix: Duration::ZERO,
        });
        self.control_session(SessionKind::Measurement, event_loop, instance_id, request, cookie)
    }

    pub(crate) fn handle_pal_event(&mut self, event_loop: &mut EventLoop, event: GnssPalEvent) {
        match event {
            GnssPalEvent::LocationStatusChange {
                enabled,
                error_code,
            } => {
                let (session, mut driver) = self.session_and_driver(SessionKind::Location);
                session.handle_status_change(&mut driver, event_loop, enabled, error_code);
            }
            GnssPalEvent::MeasurementStatusChange {
                enabled,
                error_code,
            } => {
                let (session, mut driver) = self.session_and_driver(SessionKind::Measurement);
                session.handle_status_change(&mut driver, event_loop, enabled, error_code);
            }
            GnssPalEvent::Location(event) => {
                self.location.broadcast::<GnssLocationEvent>(event_loop, event)
            }
            GnssPalEvent::Measurement(event) => {
                self.measurement.broadcast::<GnssDataEvent>(event_loop, event)
            }
        }
    }

    pub(crate) fn handle_location_timeout(
        &mut self,
        event_loop: &mut EventLoop,
        handle: TimerHandle,
    ) {
        self.location.handle_timeout(event_loop, handle);
    }

    pub(crate) fn handle_measurement_timeout(
        &mut self,
        event_loop: &mut EventLoop,
        handle: TimerHandle,
    ) {
        self.measurement.handle_timeout(event_loop, handle);
    }

    pub(crate) fn on_nanoapp_unloaded(&mut self, instance_id: InstanceId) {
        for kind in [SessionKind::Location, SessionKind::Measurement] {
            let (session, mut driver) = self.session_and_driver(kind);
            session.on_nanoapp_unloaded(&mut driver, instance_id);
        }
    }

    pub fn is_location_session_active(&self) -> bool {
        self.location.state.enabled
    }

    pub fn location_interval(&self) -> Option<Duration> {
        self.location
            .state
            .enabled
            .then_some(self.location.state.min_interval)
    }

    pub fn is_measurement_session_active(&self) -> bool {
        self.measurement.state.enabled
    }

    pub fn is_location_transition_pending(&self) -> bool {
        self.location.transition.is_pending()
    }

    pub fn location_errors(&self) -> &ErrorHistogram {
        &self.location.errors
    }

    pub fn debug_dump(&self, out: &mut String) {
        let _ = writeln!(out, "\nGNSS:");
        self.location.dump(out);
        self.measurement.dump(out);
        let _ = writeln!(out, " API error distribution (error-code indexed):");
        self.location.errors.dump("Location", out);
        self.measurement.errors.dump("Measurement", out);
    }
}
