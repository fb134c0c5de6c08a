//! Worker configuration.

use marketplace_reliability::DeadLetterConfig;
use serde::{Deserialize, Serialize};

/// Consumer host settings under the `Worker` section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct WorkerConfig {
    /// Queues to consume.
    pub queues: Vec<String>,
    /// Upper bound on in-flight messages across all queues.
    pub max_concurrent_messages: usize,
    /// `tracing-subscriber` env filter directive.
    pub log_filter: String,
    /// Interval of the dead-letter retention sweep.
    pub retention_sweep_interval_seconds: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: Vec::new(),
            max_concurrent_messages: 16,
            log_filter: "info".to_string(),
            retention_sweep_interval_seconds: 3600,
        }
    }
}

/// Full configuration file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Retry and dead-letter settings.
    #[serde(rename = "DeadLetter")]
    pub dead_letter: DeadLetterConfig,
    /// Consumer host settings.
    #[serde(rename = "Worker")]
    pub worker: WorkerConfig,
}

impl AppConfig {
    /// Parses and validates a TOML document.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig =
            toml::from_str(content).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks both sections.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.dead_letter.validate()?;
        if self.worker.max_concurrent_messages == 0 {
            return Err(ConfigError::Invalid(
                "MaxConcurrentMessages must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

/// Loads configuration from a TOML file.
pub fn load_config(path: &str) -> Result<AppConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError(e.to_string()))?;
    AppConfig::from_toml_str(&content)
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error(transparent)]
    DeadLetter(#[from] marketplace_reliability::ConfigError),
}
