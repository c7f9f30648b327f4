//! Configuration loading: TOML file with environment variable overrides.
//!
//! Looks for `evohub.toml` in the working directory. Every field has a
//! sensible default so the file is optional. Environment variables take
//! precedence over file values.

use std::time::Duration;

use serde::Deserialize;

use evohub_app::config::{EngineConfig, MAX_ZONES};
use evohub_domain::schema::SystemSchema;

/// Top-level configuration.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Logging settings.
    pub logging: LoggingConfig,
    /// Inference engine switches.
    pub engine: EngineConfig,
    /// Where traffic comes from.
    pub input: InputConfig,
    /// Explicit topologies, applied before any traffic.
    pub systems: Vec<SystemSchema>,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive (`RUST_LOG` syntax).
    pub filter: String,
}

/// Traffic source.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct InputConfig {
    /// JSON-lines file of decoded messages; `-` reads stdin.
    pub path: String,
    /// Seconds between two scheduler ticks.
    pub tick_secs: u64,
}

impl Config {
    /// Load configuration from `evohub.toml` (if present) then apply
    /// environment-variable overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the TOML file exists but is malformed, or if the
    /// result fails validation.
    pub fn load() -> Result<Self, ConfigError> {
        let mut config = Self::from_file("evohub.toml")?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn from_file(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => toml::from_str(&content).map_err(ConfigError::Parse),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(err) => Err(ConfigError::Io(err)),
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("EVOHUB_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("RUST_LOG") {
            self.logging.filter = val;
        }
        if let Ok(val) = std::env::var("EVOHUB_EAVESDROP")
            && let Ok(enabled) = val.parse()
        {
            self.engine.enable_eavesdrop = enabled;
        }
        if let Ok(val) = std::env::var("EVOHUB_DISCOVERY")
            && let Ok(enabled) = val.parse::<bool>()
        {
            self.engine.disable_discovery = !enabled;
        }
        if let Ok(val) = std::env::var("EVOHUB_INPUT") {
            self.input.path = val;
        }
        if let Ok(val) = std::env::var("EVOHUB_TICK_SECS")
            && let Ok(secs) = val.parse()
        {
            self.input.tick_secs = secs;
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(1..=MAX_ZONES).contains(&self.engine.max_zones) {
            return Err(ConfigError::Validation(format!(
                "max_zones must be between 1 and {MAX_ZONES}"
            )));
        }
        if self.input.tick_secs == 0 {
            return Err(ConfigError::Validation(
                "tick_secs must be non-zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Interval between scheduler ticks.
    #[must_use]
    pub fn tick_interval(&self) -> Duration {
        Duration::from_secs(self.input.tick_secs)
    }

    /// Whether traffic is read from stdin.
    #[must_use]
    pub fn reads_stdin(&self) -> bool {
        self.input.path == "-"
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: "evohubd=info,evohub_app=info".to_string(),
        }
    }
}

impl Default for InputConfig {
    fn default() -> Self {
        Self {
            path: "-".to_string(),
            tick_secs: 60,
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// TOML parse failure.
    #[error("failed to parse config file")]
    Parse(#[from] toml::de::Error),
    /// File I/O failure.
    #[error("failed to read config file")]
    Io(#[from] std::io::Error),
    /// Semantic validation failure.
    #[error("invalid configuration: {0}")]
    Validation(String),
}
