//! # hitoe-actor
//!
//! Heart-rate actor for hitoe sensors.
//!
//! This binary:
//! - Finds a sensor, authenticates with its pincode and streams heartrate
//! - Reconnects whenever the sensor is lost
//! - Logs a heartrate report every interval
//!
//! ## Running
//!
//! ```bash
//! # Development, against the simulated driver
//! cargo run --package hitoe-actor
//!
//! # Production logging and an explicit configuration file
//! HITOE__PRODUCTION=true ./hitoe-actor --config /etc/hitoe/config.toml
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use hitoe_actor::cli::Cli;
use hitoe_actor::config::ActorConfig;
use hitoe_actor::logging;
use hitoe_actor::report::Reporter;
use hitoe_actor::simulator::SimulatedTransport;
use hitoe_actor::state::ActorState;
use hitoe_actor::workflow::Workflow;
use hitoe_core::SessionManager;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = ActorConfig::load(cli.config.as_deref()).context("loading configuration")?;

    logging::init(config.production)?;

    info!("Starting hitoe-actor");

    // The vendor driver is not available to this binary; the simulator
    // stands in for it.
    let transport = Arc::new(SimulatedTransport::new(config.simulator.clone()));
    let manager = SessionManager::new(transport, config.core.clone());
    let state = ActorState::new();
    let workflow = Workflow::new(manager.clone(), config.clone(), state.clone());

    let reporter = tokio::spawn(Reporter::starting_now(config.report.clone()).run(state));

    tokio::select! {
        result = workflow.supervise() => match result {
            Ok(()) => info!("Workflow finished"),
            Err(e) => error!(error = %e, code = e.error_code(), "Workflow failed"),
        },
        _ = tokio::signal::ctrl_c() => info!("Shutting down"),
    }

    reporter.abort();
    manager.disconnect()?;

    Ok(())
}
