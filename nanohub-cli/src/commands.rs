use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use nanohub_config::HubConfig;
use nanohub_core::nanoapp::NanoappPermissions;
use nanohub_core::runtime::Runtime;
use nanohub_simulator::apps::{PeriodicTimerApp, PERIODIC_TIMER_APP_ID};
use nanohub_simulator::{run_demo, ChaosConfig, TraceRecorder};

#[derive(Parser)]
#[command(version, about)]
pub struct Cli {
    /// Configuration file; defaults to `config/nanohub.yaml` plus `NANOHUB_*` overrides.
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run the runtime on host time until Ctrl-C
    Run(RunArgs),
    /// Run the demo nanoapps on virtual time with simulated PALs
    Simulate(SimulateArgs),
    /// Print the effective configuration as YAML
    Config,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Stop after this many seconds instead of waiting for Ctrl-C.
    #[arg(long)]
    pub duration_secs: Option<u64>,

    /// Period of the demo timer nanoapp.
    #[arg(long, default_value_t = 1000)]
    pub tick_ms: u64,
}

#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    #[arg(long, default_value_t = 0)]
    pub seed: u64,

    /// Virtual time to simulate.
    #[arg(long, default_value_t = 60_000)]
    pub duration_ms: u64,

    /// Inject seeded NACKs and dropped completions into the simulated PALs.
    #[arg(long)]
    pub chaos: bool,

    /// Fail unless the trace digest matches.
    #[arg(long)]
    pub validate_hash: Option<String>,

    /// Print the runtime state dump after the run.
    #[arg(long)]
    pub dump: bool,

    /// Print the prometheus exposition after the run.
    #[arg(long)]
    pub metrics: bool,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<HubConfig> {
    let config = match path {
        Some(path) => HubConfig::load_from_path(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => HubConfig::load().context("loading default configuration")?,
    };
    Ok(config)
}

pub fn print_config(config: &HubConfig) -> anyhow::Result<()> {
    print!("{}", config.to_yaml()?);
    Ok(())
}

pub async fn run_live(config: HubConfig, args: RunArgs) -> anyhow::Result<()> {
    let mut runtime = Runtime::builder(&config)
        .build()
        .context("building runtime")?;
    runtime.load_nanoapp(
        PERIODIC_TIMER_APP_ID,
        NanoappPermissions::empty(),
        Box::new(PeriodicTimerApp::new(
            Duration::from_millis(args.tick_ms),
            TraceRecorder::new(),
        )),
    )?;
    let poster = runtime.poster();

    let event_loop = tokio::task::spawn_blocking(move || {
        runtime.run();
        runtime.shutdown();
        runtime
    });

    match args.duration_secs {
        Some(secs) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => tracing::info!("Interrupted"),
                _ = tokio::time::sleep(Duration::from_secs(secs)) => {}
            }
        }
        None => {
            tokio::signal::ctrl_c()
                .await
                .context("waiting for Ctrl-C")?;
            tracing::info!("Interrupted");
        }
    }
    poster.stop();

    let runtime = event_loop.await.context("event loop thread panicked")?;
    if let Some(metrics) = runtime.metrics() {
        print!("{}", metrics.gather_metrics()?);
    }
    Ok(())
}

pub fn run_simulation(config: HubConfig, args: SimulateArgs) -> anyhow::Result<()> {
    let chaos = if args.chaos {
        ChaosConfig::moderate()
    } else {
        ChaosConfig::DISABLED
    };
    let sim = run_demo(
        &config,
        args.seed,
        chaos,
        Duration::from_millis(args.duration_ms),
    )?;

    let summary = sim.summary();
    println!("virtual time:       {} ns", summary.virtual_time_ns);
    println!("timer deadlines:    {}", summary.timer_deadlines);
    println!("events dispatched:  {}", summary.events_dispatched);
    println!("events dropped:     {}", summary.events_dropped);
    println!("callbacks deferred: {}", summary.callbacks_deferred);
    println!("trace entries:      {}", summary.trace_entries);
    println!("trace digest:       {}", summary.digest);
    if args.dump {
        println!("{}", sim.runtime().debug_dump());
    }
    if let Some(metrics) = sim.runtime().metrics().filter(|_| args.metrics) {
        print!("{}", metrics.gather_metrics()?);
    }

    if let Some(expected) = args.validate_hash.as_deref() {
        sim.verify_digest(expected)?;
        tracing::info!("Trace digest verified");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parses_simulate_flags() {
        let cli = Cli::parse_from([
            "nanohub",
            "simulate",
            "--seed",
            "9",
            "--duration-ms",
            "500",
            "--chaos",
        ]);
        match cli.command {
            Commands::Simulate(args) => {
                assert_eq!(args.seed, 9);
                assert_eq!(args.duration_ms, 500);
                assert!(args.chaos);
                assert!(args.validate_hash.is_none());
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn simulation_rejects_a_wrong_digest() {
        let args = SimulateArgs {
            seed: 1,
            duration_ms: 1_000,
            chaos: false,
            validate_hash: Some("00".into()),
            dump: false,
            metrics: false,
        };
        assert!(run_simulation(HubConfig::default(), args).is_err());
    }
}
