//! # sim_app - simulation driver
//!
//! The front end of the parallel DES core. One process per cluster rank.
//!
//! ## Startup sequence
//!
//! 1. Parse the command line (and fold in the model's `program_options`).
//! 2. Build the configuration graph from the model (or a checkpoint),
//!    validate it structurally, partition it, and split out this rank's
//!    share.
//! 3. Connect the rank transport (multi-rank runs), register
//!    cross-partition links with the sync manager, install signal handlers.
//! 4. Run one event loop per worker thread to the stop time, exchanging at
//!    sync horizons and writing checkpoints at their boundaries.

mod checkpoint;
mod config;
mod simulation;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use config::Config;

fn main() -> Result<()> {
    // Initialise structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sim_app=info".parse()?))
        .init();

    let config = Config::parse();
    info!(
        rank = config.my_rank,
        ranks = config.num_ranks,
        threads = config.num_threads,
        "simulation core starting"
    );

    simulation::run(config)?;

    info!("simulation core shut down");
    Ok(())
}
