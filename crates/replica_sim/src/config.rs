//! Configuration management for the replication simulator.
//!
//! Settings are loaded from a TOML file. A missing file is replaced by the
//! default configuration, which is written to disk so it can be edited.

use anyhow::{bail, Context, Result};
use peer_replication::ReplicationConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

fn default_peers() -> usize {
    3
}

fn default_ticks() -> u64 {
    300
}

fn default_late_join_tick() -> u64 {
    30
}

fn default_ping_interval() -> u64 {
    30
}

fn default_chat_interval() -> u64 {
    20
}

/// Simulator configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SimConfig {
    /// Replication tuning shared by every simulated peer
    #[serde(default)]
    pub replication: ReplicationConfig,
    /// Session shape and duration
    #[serde(default)]
    pub simulation: SimulationSettings,
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
}

/// Shape of the simulated session.
///
/// Peer 0 owns every replicated object. The last peer only becomes a
/// receiver at `late_join_tick`, which exercises the stream grace period and
/// late delivery of field state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulationSettings {
    /// Number of in-process peers (at least 2)
    #[serde(default = "default_peers")]
    pub peers: usize,
    /// Ticks to run before shutting down
    #[serde(default = "default_ticks")]
    pub ticks: u64,
    /// Tick at which the last peer is added as a receiver (0 = from the start)
    #[serde(default = "default_late_join_tick")]
    pub late_join_tick: u64,
    /// Ticks between two router pings from the owner
    #[serde(default = "default_ping_interval")]
    pub ping_interval: u64,
    /// Ticks between two stream messages from the owner
    #[serde(default = "default_chat_interval")]
    pub chat_interval: u64,
}

impl Default for SimulationSettings {
    fn default() -> Self {
        Self {
            peers: default_peers(),
            ticks: default_ticks(),
            late_join_tick: default_late_join_tick(),
            ping_interval: default_ping_interval(),
            chat_interval: default_chat_interval(),
        }
    }
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl SimConfig {
    /// Loads configuration from a TOML file, creating a default one if the
    /// file does not exist.
    pub async fn load_from_file(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let config: SimConfig = toml::from_str(&content)
                .with_context(|| format!("failed to parse {}", path.display()))?;
            Ok(config)
        } else {
            let default_config = SimConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)
                .context("failed to serialize default configuration")?;
            tokio::fs::write(path, toml_content)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Validates the merged configuration.
    pub fn validate(&self) -> Result<()> {
        self.replication.validate()?;

        let simulation = &self.simulation;
        if simulation.peers < 2 {
            bail!("simulation.peers must be at least 2, got {}", simulation.peers);
        }
        if simulation.ticks == 0 {
            bail!("simulation.ticks must be greater than 0");
        }
        if simulation.ping_interval == 0 || simulation.chat_interval == 0 {
            bail!("simulation ping and chat intervals must be greater than 0");
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            bail!(
                "invalid log level '{}', expected one of: {}",
                self.logging.level,
                valid_levels.join(", ")
            );
        }

        Ok(())
    }
}
