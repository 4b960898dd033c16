//! # Replica Sim
//!
//! Command-line simulation of a peer replication session. Several peers run
//! in one process over loopback transports; peer 0 owns a replicated lap
//! counter, an ordered chat stream and a car transform, and pings the others
//! through the typed message router.
//!
//! ```bash
//! # Run with default configuration (creates replica_sim.toml if missing)
//! replica_sim
//!
//! # Five peers for ten seconds at the default 60 Hz
//! replica_sim --peers 5 --ticks 600
//!
//! # JSON logging
//! replica_sim --json-logs --log-level debug
//! ```

use tracing::error;

pub mod app;
pub mod cli;
pub mod config;
pub mod logging;
pub mod signals;

use app::Application;
use cli::CliArgs;
use config::SimConfig;

/// Parses arguments, sets up logging and runs the simulation to completion.
pub async fn init() -> anyhow::Result<()> {
    let args = CliArgs::parse();

    // Logging settings come from the file, so load it once up front
    let mut logging = SimConfig::load_from_file(&args.config_path)
        .await
        .map(|config| config.logging)
        .unwrap_or_default();
    if let Some(level) = &args.log_level {
        logging.level = level.clone();
    }

    if let Err(e) = logging::setup_logging(&logging, args.json_logs) {
        eprintln!("❌ Failed to setup logging: {e}");
        std::process::exit(1);
    }

    match Application::new(args).await {
        Ok(app) => {
            if let Err(e) = app.run().await {
                error!("❌ Simulation error: {:?}", e);
                std::process::exit(1);
            }
        }
        Err(e) => {
            error!("❌ Failed to start simulation: {e:?}");
            std::process::exit(1);
        }
    }

    Ok(())
}

pub use config::{LoggingSettings, SimulationSettings};
