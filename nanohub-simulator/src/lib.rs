/*!
# nanohub Simulator

Deterministic harness for the nanohub runtime. The runtime runs unmodified on a virtual clock
and a virtual hardware timer, with simulated WiFi, WWAN and GNSS PALs standing in for
hardware.

## Key Components:
- **Virtual Clock:** simulated time with nanosecond precision, moved only by the driver.
- **Simulated Timer:** the hardware timer, fired when virtual time reaches its deadline.
- **Simulated PALs:** scripted (completed by the test) or chaotic (self-completing, seeded).
- **Chaos Engine:** seeded NACKs and dropped completions.
- **Trace:** BLAKE3 digest of everything the demo nanoapps observed.
*/

use std::time::Duration;

use nanohub_config::HubConfig;
use nanohub_core::nanoapp::NanoappPermissions;

pub mod apps;
pub mod chaos;
pub mod error;
pub mod pal;
pub mod simulation;
pub mod system_timer;
pub mod trace;
pub mod virtual_clock;

pub use chaos::{ChaosConfig, ChaosEngine, Fault};
pub use error::SimulationError;
pub use simulation::{Simulation, SimulationSummary};
pub use trace::TraceRecorder;
pub use virtual_clock::VirtualClock;

use apps::{
    CellInfoApp, PeriodicTimerApp, WifiScannerApp, CELL_INFO_APP_ID, PERIODIC_TIMER_APP_ID,
    WIFI_SCANNER_APP_ID,
};

/// Loads the demo nanoapps into a seeded simulation and runs it for `duration` of virtual time.
pub fn run_demo(
    config: &HubConfig,
    seed: u64,
    chaos: ChaosConfig,
    duration: Duration,
) -> Result<Simulation, SimulationError> {
    let mut sim = Simulation::seeded(config, seed, chaos)?;
    let trace = sim.trace().clone();

    sim.load_nanoapp(
        PERIODIC_TIMER_APP_ID,
        NanoappPermissions::empty(),
        PeriodicTimerApp::new(Duration::from_millis(100), trace.clone()),
    )?;
    sim.load_nanoapp(
        WIFI_SCANNER_APP_ID,
        NanoappPermissions::WIFI,
        WifiScannerApp::new(Duration::from_secs(5), trace.clone()),
    )?;
    sim.load_nanoapp(
        CELL_INFO_APP_ID,
        NanoappPermissions::WWAN,
        CellInfoApp::new(Duration::from_secs(2), trace),
    )?;

    sim.advance(duration);
    tracing::info!(
        seed,
        virtual_time_ns = sim.now_ns(),
        digest = %sim.trace().digest(),
        "Simulation finished"
    );
    Ok(sim)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_runs_and_records() {
        let sim = run_demo(
            &HubConfig::default(),
            42,
            ChaosConfig::moderate(),
            Duration::from_secs(10),
        )
        .unwrap();
        let summary = sim.summary();
        assert_eq!(summary.virtual_time_ns, 10_000_000_000);
        assert_eq!(summary.digest.len(), 64);
        // 100 ticks of the periodic app alone.
        assert!(summary.trace_entries >= 100);
    }
}
