//! Headless charge-point simulator CLI.
//!
//! ```sh
//! ocpp-simulator --config devices.yaml --simulation demo-charge
//! ```

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use ocpp_simulator::config;
use ocpp_simulator::device::ChargeOptions;
use ocpp_simulator::simulator::Simulator;

/// Runs one charge-point simulation defined in a YAML config file.
#[derive(Parser, Debug)]
#[command(name = "ocpp-simulator", version, about = "EV charge-point protocol simulator")]
struct Cli {
    /// Path to the configuration file (YAML).
    #[arg(long)]
    config: PathBuf,

    /// Simulation name (defined in the config file) to run.
    #[arg(long)]
    simulation: String,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    let raw = match config::load_yaml_document(&cli.config.to_string_lossy()) {
        Ok(raw) => raw,
        Err(err) => {
            error!(%err, "failed to load config");
            return ExitCode::FAILURE;
        }
    };

    let (device_config, simulation_config) = match config::resolve(&raw, &cli.simulation) {
        Ok(pair) => pair,
        Err(err) => {
            error!(%err);
            return ExitCode::FAILURE;
        }
    };

    let flow_options: ChargeOptions = serde_yaml::from_value(simulation_config.flow_charge_options.clone()).unwrap_or_default();

    let simulator = Simulator::new(
        device_config,
        flow_options,
        simulation_config.frequent_flow_options(),
        simulation_config.frequent_flow_enabled,
    );

    if let Err(err) = simulator.initialize().await {
        error!(%err, "initialize failed");
        return ExitCode::FAILURE;
    }

    info!("simulator running");
    simulator.lifecycle_start().await;
    simulator.end().await;
    info!("simulator ended");

    ExitCode::SUCCESS
}
