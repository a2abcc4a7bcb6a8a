//! Logging setup for tests and tools built on quiesce
//!
//! TigerStyle: Explicit telemetry configuration.
//!
//! The harness itself only emits `tracing` events; this module installs a
//! subscriber so they become visible. `RUST_LOG` overrides the configured
//! level.

use crate::error::{Error, Result};

/// Telemetry configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    /// Service name attached to the initialization event
    pub service_name: String,
    /// Whether to write events to stdout
    pub stdout_enabled: bool,
    /// Log level filter (used when `RUST_LOG` is unset)
    pub log_level: String,
    /// Route output through the test harness capture (`with_test_writer`)
    pub test_writer: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            service_name: "quiesce".to_string(),
            stdout_enabled: true,
            log_level: "info".to_string(),
            test_writer: false,
        }
    }
}

impl TelemetryConfig {
    /// Create a new configuration with the given service name
    pub fn new(service_name: impl Into<String>) -> Self {
        Self {
            service_name: service_name.into(),
            ..Default::default()
        }
    }

    /// Configuration suited to `cargo test`: debug level, captured output
    pub fn for_tests() -> Self {
        Self {
            log_level: "debug".to_string(),
            test_writer: true,
            ..Default::default()
        }
    }

    /// Disable stdout output
    pub fn without_stdout(mut self) -> Self {
        self.stdout_enabled = false;
        self
    }

    /// Set the log level filter
    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = level.into();
        self
    }
}

/// Install a global tracing subscriber
///
/// Fails if a global subscriber is already installed; callers that may run
/// more than once (e.g. every test) should use `try_init_telemetry`.
pub fn init_telemetry(config: TelemetryConfig) -> Result<()> {
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let fmt_layer = if config.stdout_enabled {
        let layer = tracing_subscriber::fmt::layer().with_target(true);
        if config.test_writer {
            Some(layer.with_test_writer().boxed())
        } else {
            Some(layer.boxed())
        }
    } else {
        None
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| Error::internal(format!("failed to initialize tracing subscriber: {}", e)))?;

    tracing::info!(service = %config.service_name, "Telemetry initialized");
    Ok(())
}

/// Install a global subscriber unless one is already present
///
/// Returns whether this call installed it.
pub fn try_init_telemetry(config: TelemetryConfig) -> bool {
    init_telemetry(config).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_telemetry_config_builder() {
        let config = TelemetryConfig::new("harness")
            .with_log_level("trace")
            .without_stdout();
        assert_eq!(config.service_name, "harness");
        assert_eq!(config.log_level, "trace");
        assert!(!config.stdout_enabled);
    }

    #[test]
    fn test_second_init_is_rejected() {
        // Whichever call wins, the second one must fail cleanly
        let _ = try_init_telemetry(TelemetryConfig::for_tests());
        assert!(init_telemetry(TelemetryConfig::for_tests()).is_err());
    }
}
