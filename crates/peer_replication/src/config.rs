/// Replication tuning parameters
use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Polls a stream replicator waits for a target to become a receiver before
/// discarding its queued messages.
pub const FRAMES_TO_DROP_MESSAGES: u32 = 60;

/// Default tick rate of the session driver.
pub const DEFAULT_TICK_RATE_HZ: f64 = 60.0;

/// Settings shared by the replicators of one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplicationConfig {
    /// Grace period, in polls, for peers that are not yet valid receivers
    #[serde(default = "default_frames_to_drop_messages")]
    pub frames_to_drop_messages: u32,
    /// How often the session driver ticks
    #[serde(default = "default_tick_rate_hz")]
    pub tick_rate_hz: f64,
}

fn default_frames_to_drop_messages() -> u32 {
    FRAMES_TO_DROP_MESSAGES
}

fn default_tick_rate_hz() -> f64 {
    DEFAULT_TICK_RATE_HZ
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            frames_to_drop_messages: default_frames_to_drop_messages(),
            tick_rate_hz: default_tick_rate_hz(),
        }
    }
}

impl ReplicationConfig {
    /// Validates the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.frames_to_drop_messages == 0 {
            return Err(ConfigError::Invalid(
                "frames_to_drop_messages must be greater than 0".to_string(),
            ));
        }

        if !self.tick_rate_hz.is_finite() || self.tick_rate_hz <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "tick_rate_hz must be a positive number, got {}",
                self.tick_rate_hz
            )));
        }

        Ok(())
    }

    /// Wall-clock time between two ticks.
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz)
    }
}
