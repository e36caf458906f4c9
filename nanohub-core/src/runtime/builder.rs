use std::sync::Arc;

use nanohub_config::HubConfig;
use nanohub_telemetry::MetricsRecorder;

use super::{Runtime, Services};
use crate::alloc::{MemoryLimits, MemoryManager};
use crate::error::RuntimeError;
use crate::events::EventLoop;
use crate::pal::{
    GnssPal, GnssPalCallbacks, NoGnssPal, NoWifiPal, NoWwanPal, PalSystemApi, WifiPal,
    WifiPalCallbacks, WwanPal, WwanPalCallbacks,
};
use crate::requests::{GnssManager, ResourceContext, WifiRequestManager, WwanRequestManager};
use crate::time::{Clock, MonotonicClock, StdSystemTimer, SystemTimer, TimerLimits, TimerPool};

/// Assembles a [`Runtime`] from configuration plus the platform seams.
///
/// Anything not supplied falls back to the host implementation: [`MonotonicClock`],
/// [`StdSystemTimer`], and PALs that report no capabilities.
pub struct RuntimeBuilder {
    config: HubConfig,
    clock: Option<Arc<dyn Clock>>,
    system_timer: Option<Arc<dyn SystemTimer>>,
    wifi_pal: Option<Box<dyn WifiPal>>,
    wwan_pal: Option<Box<dyn WwanPal>>,
    gnss_pal: Option<Box<dyn GnssPal>>,
    metrics: Option<MetricsRecorder>,
}

impl RuntimeBuilder {
    pub fn new(config: &HubConfig) -> Self {
        Self {
            config: config.clone(),
            clock: None,
            system_timer: None,
            wifi_pal: None,
            wwan_pal: None,
            gnss_pal: None,
            metrics: None,
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn system_timer(mut self, system_timer: Arc<dyn SystemTimer>) -> Self {
        self.system_timer = Some(system_timer);
        self
    }

    pub fn wifi_pal(mut self, pal: impl WifiPal + 'static) -> Self {
        self.wifi_pal = Some(Box::new(pal));
        self
    }

    pub fn wwan_pal(mut self, pal: impl WwanPal + 'static) -> Self {
        self.wwan_pal = Some(Box::new(pal));
        self
    }

    pub fn gnss_pal(mut self, pal: impl GnssPal + 'static) -> Self {
        self.gnss_pal = Some(Box::new(pal));
        self
    }

    /// Records into `metrics` instead of a recorder created from the telemetry config.
    pub fn metrics(mut self, metrics: MetricsRecorder) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn build(self) -> Result<Runtime, RuntimeError> {
        let config = self.config;
        let event_loop = EventLoop::new(config.event_loop.queue_capacity);

        let clock = self
            .clock
            .unwrap_or_else(|| Arc::new(MonotonicClock::new()));
        let system_timer = match self.system_timer {
            Some(system_timer) => system_timer,
            None => Arc::new(StdSystemTimer::new()?),
        };
        let metrics = self
            .metrics
            .or_else(|| config.telemetry.metrics_enabled.then(MetricsRecorder::new));

        let timer_pool = Arc::new(TimerPool::new(
            TimerLimits::from(&config.timers),
            clock.clone(),
            system_timer,
            event_loop.poster(),
        ));
        let memory = Arc::new(MemoryManager::new(MemoryLimits::from(&config.memory)));
        let ctx = ResourceContext {
            timer_pool: timer_pool.clone(),
            clock: clock.clone(),
            metrics: metrics.clone(),
        };

        let system = PalSystemApi::new(clock.clone());
        let mut wifi = WifiRequestManager::new(
            self.wifi_pal.unwrap_or_else(|| Box::new(NoWifiPal)),
            config.wifi.clone(),
            ctx.clone(),
        );
        wifi.init(&system, WifiPalCallbacks::new(event_loop.poster()));
        let mut wwan = WwanRequestManager::new(
            self.wwan_pal.unwrap_or_else(|| Box::new(NoWwanPal)),
            config.wwan.clone(),
            ctx.clone(),
        );
        wwan.init(&system, WwanPalCallbacks::new(event_loop.poster()));
        let mut gnss = GnssManager::new(
            self.gnss_pal.unwrap_or_else(|| Box::new(NoGnssPal)),
            config.gnss.clone(),
            ctx,
        );
        gnss.init(&system, GnssPalCallbacks::new(event_loop.poster()));

        tracing::info!(
            queue_capacity = config.event_loop.queue_capacity,
            metrics = metrics.is_some(),
            "Runtime initialised"
        );
        Ok(Runtime {
            event_loop,
            services: Services {
                clock,
                timer_pool,
                memory,
                wifi,
                wwan,
                gnss,
                metrics,
            },
        })
    }
}
