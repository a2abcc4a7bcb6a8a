//! Configuration for quiesce bubbles
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Environment variable holding the scheduling seed
pub const ENV_SEED: &str = "QUIESCE_SEED";

/// Environment variable holding the step budget
pub const ENV_MAX_STEPS: &str = "QUIESCE_MAX_STEPS";

/// Environment variable holding the virtual time budget
pub const ENV_MAX_TIME_MS: &str = "QUIESCE_MAX_TIME_MS";

/// Configuration for a bubble
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BubbleConfig {
    /// Seed for randomized (but reproducible) run-queue order.
    /// `None` runs tasks in FIFO wake order.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Maximum number of task polls before the bubble fails
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,

    /// Maximum virtual time in milliseconds before the bubble fails
    #[serde(default = "default_max_time_ms")]
    pub max_time_ms: u64,

    /// Real time to wait for a wake from outside the bubble before reporting
    /// non-durably blocked tasks as deadlocked (milliseconds)
    #[serde(default = "default_external_wake_wait_ms")]
    pub external_wake_wait_ms: u64,

    /// Whether to record the poll order in the bubble report
    #[serde(default = "default_record_schedule")]
    pub record_schedule: bool,

    /// Wall-clock instant the virtual clock starts at (ms since Unix epoch)
    #[serde(default = "default_epoch_ms")]
    pub epoch_ms: u64,
}

fn default_max_steps() -> u64 {
    BUBBLE_STEPS_COUNT_MAX
}

fn default_max_time_ms() -> u64 {
    BUBBLE_TIME_MS_MAX
}

fn default_external_wake_wait_ms() -> u64 {
    BUBBLE_EXTERNAL_WAKE_WAIT_MS_DEFAULT
}

fn default_record_schedule() -> bool {
    true
}

fn default_epoch_ms() -> u64 {
    BUBBLE_EPOCH_MS
}

impl Default for BubbleConfig {
    fn default() -> Self {
        Self {
            seed: None,
            max_steps: default_max_steps(),
            max_time_ms: default_max_time_ms(),
            external_wake_wait_ms: default_external_wake_wait_ms(),
            record_schedule: default_record_schedule(),
            epoch_ms: default_epoch_ms(),
        }
    }
}

impl BubbleConfig {
    /// Create a config with FIFO scheduling and default budgets
    pub fn new() -> Self {
        Self::default()
    }

    /// Create config from `QUIESCE_*` environment variables
    ///
    /// Always logs the seed so a failing run can be replayed.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.seed = env_u64(ENV_SEED);
        if let Some(steps) = env_u64(ENV_MAX_STEPS) {
            config.max_steps = steps;
        }
        if let Some(ms) = env_u64(ENV_MAX_TIME_MS) {
            config.max_time_ms = ms;
        }

        match config.seed {
            Some(seed) => {
                tracing::info!(seed = seed, "bubble seed (set {}={} to replay)", ENV_SEED, seed)
            }
            None => tracing::info!("bubble scheduling is FIFO (set {} to shuffle)", ENV_SEED),
        }

        config
    }

    /// Set the scheduling seed
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Set the step budget
    pub fn with_max_steps(mut self, steps: u64) -> Self {
        self.max_steps = steps;
        self
    }

    /// Set the virtual time budget
    pub fn with_max_time_ms(mut self, ms: u64) -> Self {
        self.max_time_ms = ms;
        self
    }

    /// Set the real-time wait for wakes from outside the bubble
    pub fn with_external_wake_wait_ms(mut self, ms: u64) -> Self {
        self.external_wake_wait_ms = ms;
        self
    }

    /// Disable schedule recording
    pub fn without_schedule(mut self) -> Self {
        self.record_schedule = false;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_steps == 0 {
            return Err(Error::invalid_config("max_steps", "must be positive"));
        }
        if self.max_time_ms == 0 || self.max_time_ms > BUBBLE_TIME_MS_MAX {
            return Err(Error::invalid_config(
                "max_time_ms",
                format!("must be in 1..={}", BUBBLE_TIME_MS_MAX),
            ));
        }
        if self.external_wake_wait_ms > BUBBLE_EXTERNAL_WAKE_WAIT_MS_MAX {
            return Err(Error::invalid_config(
                "external_wake_wait_ms",
                format!("must be at most {}", BUBBLE_EXTERNAL_WAKE_WAIT_MS_MAX),
            ));
        }
        if self.epoch_ms.checked_add(self.max_time_ms).is_none() {
            return Err(Error::invalid_config(
                "epoch_ms",
                "epoch plus time budget overflows",
            ));
        }
        Ok(())
    }
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BubbleConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.seed, None);
        assert_eq!(config.epoch_ms, BUBBLE_EPOCH_MS);
    }

    #[test]
    fn test_builder_methods() {
        let config = BubbleConfig::new()
            .with_seed(42)
            .with_max_steps(100)
            .with_max_time_ms(5_000)
            .with_external_wake_wait_ms(10)
            .without_schedule();
        assert_eq!(config.seed, Some(42));
        assert_eq!(config.max_steps, 100);
        assert_eq!(config.max_time_ms, 5_000);
        assert_eq!(config.external_wake_wait_ms, 10);
        assert!(!config.record_schedule);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_zero_steps() {
        let config = BubbleConfig::new().with_max_steps(0);
        match config.validate() {
            Err(Error::InvalidConfiguration { field, .. }) => assert_eq!(field, "max_steps"),
            other => panic!("expected invalid configuration, got {:?}", other),
        }
    }

    #[test]
    fn test_validation_rejects_long_external_wait() {
        let config =
            BubbleConfig::new().with_external_wake_wait_ms(BUBBLE_EXTERNAL_WAKE_WAIT_MS_MAX + 1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_deserialize_applies_defaults() {
        let config: BubbleConfig = serde_json::from_str(r#"{ "seed": 7 }"#).unwrap();
        assert_eq!(config.seed, Some(7));
        assert_eq!(config.max_steps, BUBBLE_STEPS_COUNT_MAX);
        assert!(config.record_schedule);
    }
}
