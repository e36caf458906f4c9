//! The simulation driver: a [`Runtime`] on virtual time with simulated PALs.

use std::sync::Arc;
use std::time::Duration;

use nanohub_config::HubConfig;
use nanohub_core::nanoapp::{NanoappHandler, NanoappPermissions};
use nanohub_core::runtime::Runtime;
use nanohub_core::types::InstanceId;

use crate::chaos::{ChaosConfig, ChaosEngine};
use crate::error::SimulationError;
use crate::pal::{
    SimGnssHandle, SimGnssPal, SimWifiHandle, SimWifiPal, SimWwanHandle, SimWwanPal,
};
use crate::system_timer::SimulatedSystemTimer;
use crate::trace::TraceRecorder;
use crate::virtual_clock::VirtualClock;

/// Trace tag for a hardware timer deadline reached by the driver.
pub const TRACE_TIMER_DEADLINE: u16 = 0;

/// Snapshot reported at the end of a run.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SimulationSummary {
    pub virtual_time_ns: u64,
    pub timer_deadlines: u64,
    pub events_dispatched: u64,
    pub events_dropped: u64,
    pub callbacks_deferred: u64,
    pub trace_entries: u64,
    pub digest: String,
}

pub struct Simulation {
    runtime: Runtime,
    clock: VirtualClock,
    timer: Arc<SimulatedSystemTimer>,
    trace: TraceRecorder,
    wifi: SimWifiHandle,
    wwan: SimWwanHandle,
    gnss: SimGnssHandle,
    timer_deadlines: u64,
}

impl Simulation {
    /// PALs that only record requests; completions come from the handles.
    pub fn scripted(config: &HubConfig) -> Result<Self, SimulationError> {
        Self::build(
            config,
            SimWifiPal::scripted(),
            SimWwanPal::scripted(),
            SimGnssPal::scripted(),
        )
    }

    /// PALs that complete requests themselves, with faults and payloads drawn from `seed`.
    pub fn seeded(
        config: &HubConfig,
        seed: u64,
        chaos: ChaosConfig,
    ) -> Result<Self, SimulationError> {
        // Independent streams so one PAL's traffic never shifts another's faults.
        Self::build(
            config,
            SimWifiPal::chaotic(ChaosEngine::new(seed, chaos)),
            SimWwanPal::chaotic(ChaosEngine::new(seed.wrapping_add(1), chaos)),
            SimGnssPal::chaotic(ChaosEngine::new(seed.wrapping_add(2), chaos)),
        )
    }

    fn build(
        config: &HubConfig,
        wifi: SimWifiPal,
        wwan: SimWwanPal,
        gnss: SimGnssPal,
    ) -> Result<Self, SimulationError> {
        let clock = VirtualClock::new(0);
        let timer = Arc::new(SimulatedSystemTimer::new(clock.clone()));
        let wifi_handle = wifi.handle();
        let wwan_handle = wwan.handle();
        let gnss_handle = gnss.handle();
        let runtime = Runtime::builder(config)
            .clock(Arc::new(clock.clone()))
            .system_timer(timer.clone())
            .wifi_pal(wifi)
            .wwan_pal(wwan)
            .gnss_pal(gnss)
            .build()?;
        Ok(Self {
            runtime,
            clock,
            timer,
            trace: TraceRecorder::new(),
            wifi: wifi_handle,
            wwan: wwan_handle,
            gnss: gnss_handle,
            timer_deadlines: 0,
        })
    }

    pub fn load_nanoapp(
        &mut self,
        app_id: u64,
        permissions: NanoappPermissions,
        handler: impl NanoappHandler + 'static,
    ) -> Result<InstanceId, SimulationError> {
        Ok(self
            .runtime
            .load_nanoapp(app_id, permissions, Box::new(handler))?)
    }

    pub fn unload_nanoapp(&mut self, instance_id: InstanceId) -> Result<(), SimulationError> {
        Ok(self.runtime.unload_nanoapp(instance_id)?)
    }

    /// Processes every queued task without moving virtual time.
    pub fn run_until_idle(&mut self) -> usize {
        self.runtime.run_until_idle()
    }

    /// Moves virtual time forward by `by`, stopping at each hardware timer deadline on the
    /// way so expiries run at their own timestamps.
    pub fn advance(&mut self, by: Duration) -> usize {
        let by_ns = u64::try_from(by.as_nanos()).unwrap_or(u64::MAX);
        let until = self.clock.now_ns().saturating_add(by_ns);
        let mut processed = self.runtime.run_until_idle();

        while let Some(deadline) = self.timer.deadline_ns().filter(|at| *at <= until) {
            self.clock.advance_to(deadline);
            if self.timer.fire_if_due() {
                self.timer_deadlines += 1;
                self.trace.record(
                    self.clock.now_ns(),
                    InstanceId::SYSTEM,
                    TRACE_TIMER_DEADLINE,
                    &[],
                );
            }
            processed += self.runtime.run_until_idle();
        }

        self.clock.advance_to(until);
        processed + self.runtime.run_until_idle()
    }

    pub fn now_ns(&self) -> u64 {
        self.clock.now_ns()
    }

    pub fn clock(&self) -> &VirtualClock {
        &self.clock
    }

    pub fn runtime(&self) -> &Runtime {
        &self.runtime
    }

    pub fn runtime_mut(&mut self) -> &mut Runtime {
        &mut self.runtime
    }

    pub fn wifi(&self) -> &SimWifiHandle {
        &self.wifi
    }

    pub fn wwan(&self) -> &SimWwanHandle {
        &self.wwan
    }

    pub fn gnss(&self) -> &SimGnssHandle {
        &self.gnss
    }

    pub fn trace(&self) -> &TraceRecorder {
        &self.trace
    }

    pub fn summary(&self) -> SimulationSummary {
        let stats = self.runtime.event_loop().stats();
        SimulationSummary {
            virtual_time_ns: self.clock.now_ns(),
            timer_deadlines: self.timer_deadlines,
            events_dispatched: stats.events_dispatched(),
            events_dropped: stats.events_dropped(),
            callbacks_deferred: stats.callbacks_deferred(),
            trace_entries: self.trace.entries(),
            digest: self.trace.digest(),
        }
    }

    /// Fails unless the trace so far hashes to `expected`.
    pub fn verify_digest(&self, expected: &str) -> Result<(), SimulationError> {
        let actual = self.trace.digest();
        if actual.eq_ignore_ascii_case(expected) {
            Ok(())
        } else {
            Err(SimulationError::DigestMismatch {
                expected: expected.to_owned(),
                actual,
            })
        }
    }
}
