//! FleetGate Simulator
//!
//! Runs rolling-maintenance scenarios against a simulated content cluster
//! and checks every controller answer against the scenario's expectations.

use clap::Parser;
use tracing::{debug, error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fleetgate_controller::ControllerConfig;

mod controller;
mod metrics;
mod node;
mod scenario;

use controller::SimulationController;
use scenario::Scenario;

/// FleetGate Simulator CLI
#[derive(Parser, Debug)]
#[command(name = "simulator")]
#[command(about = "FleetGate rolling-maintenance simulation environment")]
struct Args {
    /// Scenario name or JSON file to run (all built-in scenarios if absent)
    #[arg(short, long)]
    scenario: Option<String>,

    /// Simulation speed multiplier
    #[arg(long, default_value = "1.0")]
    speed: f64,

    /// Random seed for reproducibility
    #[arg(long)]
    seed: Option<u64>,

    /// Emit logs as JSON
    #[arg(long)]
    json_logs: bool,

    /// List built-in scenarios and exit
    #[arg(long)]
    list: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // RUST_LOG wins over the controller's LOG_LEVEL.
    let filter = tracing_subscriber::EnvFilter::new(
        std::env::var("RUST_LOG").unwrap_or_else(|_| ControllerConfig::from_env().log_level),
    );
    if args.json_logs {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if args.list {
        for name in Scenario::BUILTIN {
            if let Ok(scenario) = Scenario::load(name) {
                println!("{:<20} {}", scenario.name, scenario.description);
            }
        }
        return Ok(());
    }

    if args.speed <= 0.0 {
        anyhow::bail!("Speed must be positive, got {}", args.speed);
    }

    info!("Starting FleetGate Simulator");
    info!("Speed: {}x", args.speed);

    let names: Vec<String> = match &args.scenario {
        Some(name) => vec![name.clone()],
        None => Scenario::BUILTIN.iter().map(|s| s.to_string()).collect(),
    };

    let mut failed = 0;
    for name in &names {
        let scenario = Scenario::load(name)?;
        let simulation = SimulationController::new(&scenario, args.speed, args.seed)?;

        let outcome = simulation.run_scenario(&scenario).await;
        if let Err(e) = &outcome {
            error!("{}", e);
            failed += 1;
        }

        let metrics = simulation.metrics().await;
        info!("Scenario {} complete", scenario.name);
        info!("Total requests: {}", metrics.total_requests);
        info!("Allowed: {}", metrics.allowed_requests);
        info!("Already set: {}", metrics.already_set_requests);
        info!("Refused: {}", metrics.refused_requests);
        info!("Unexpected: {}", metrics.unexpected_outcomes);
        info!("Heartbeats: {}", metrics.heartbeats);
        info!(
            "Average latency: {}us (p99 {}us)",
            metrics.average_latency_us(),
            metrics.p99_latency_us()
        );
        debug!("Controller metrics:\n{}", simulation.controller().metrics().to_prometheus());
    }

    if failed > 0 {
        anyhow::bail!("{} of {} scenarios failed", failed, names.len());
    }

    info!("All {} scenarios passed", names.len());
    Ok(())
}
