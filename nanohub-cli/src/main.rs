//! ## nanohub-cli
//! **Operator entry point for the context hub runtime**
//!
//! - `run`: the runtime on host time with the demo nanoapps, until Ctrl-C or a deadline
//! - `simulate`: a seeded run on virtual time, reporting the trace digest
//! - `config`: print the effective configuration

use clap::Parser;

mod commands;

use commands::{Cli, Commands};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = commands::load_config(cli.config.as_deref())?;
    nanohub_telemetry::EventLogger::init_with_level(&config.telemetry.log_level);

    match cli.command {
        Commands::Run(args) => commands::run_live(config, args).await,
        Commands::Simulate(args) => commands::run_simulation(config, args),
        Commands::Config => commands::print_config(&config),
    }
}
