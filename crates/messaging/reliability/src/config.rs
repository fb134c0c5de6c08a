//! Dead-letter and retry configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Longest accepted retry delay (one day).
pub const MAX_RETRY_DELAY_LIMIT_SECONDS: f64 = 86_400.0;

/// Longest accepted dead-letter retention (ten years).
pub const MAX_DEAD_LETTER_TTL_HOURS: f64 = 87_600.0;

/// Settings under the `DeadLetter` configuration section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase", default)]
pub struct DeadLetterConfig {
    /// Use the real store. When false the no-op store is wired in.
    pub enabled: bool,
    /// Retries after the initial delivery.
    pub max_retry_attempts: u32,
    /// Delay before the first retry.
    pub initial_retry_delay_seconds: f64,
    /// Growth factor per retry.
    pub backoff_multiplier: f64,
    /// Upper bound on any single delay.
    pub max_retry_delay_seconds: f64,
    /// Retention for quarantined messages.
    pub dead_letter_ttl_hours: f64,
    /// Log every attempt at info level.
    pub enable_detailed_logging: bool,
    /// Notify operators on escalation.
    pub enable_admin_notifications: bool,
    /// Treat unclassified failures as retryable.
    pub retry_unknown_failures: bool,
    /// Recorded in each dead-letter record.
    pub environment_name: String,
    /// Recorded in each dead-letter record.
    pub application_version: String,
}

impl Default for DeadLetterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_retry_attempts: 3,
            initial_retry_delay_seconds: 2.0,
            backoff_multiplier: 2.0,
            max_retry_delay_seconds: 60.0,
            dead_letter_ttl_hours: 168.0, // 7 days
            enable_detailed_logging: false,
            enable_admin_notifications: false,
            retry_unknown_failures: false,
            environment_name: "development".to_string(),
            application_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl DeadLetterConfig {
    /// Checks value ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let in_range = |name: &str, value: f64, max: f64| {
            if value.is_finite() && (0.0..=max).contains(&value) {
                Ok(())
            } else {
                Err(ConfigError::Invalid(format!(
                    "{name} must be between 0 and {max} (got {value})"
                )))
            }
        };

        in_range(
            "InitialRetryDelaySeconds",
            self.initial_retry_delay_seconds,
            MAX_RETRY_DELAY_LIMIT_SECONDS,
        )?;
        in_range(
            "MaxRetryDelaySeconds",
            self.max_retry_delay_seconds,
            MAX_RETRY_DELAY_LIMIT_SECONDS,
        )?;
        in_range(
            "DeadLetterTtlHours",
            self.dead_letter_ttl_hours,
            MAX_DEAD_LETTER_TTL_HOURS,
        )?;

        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 1.0 {
            return Err(ConfigError::Invalid(format!(
                "BackoffMultiplier must be >= 1.0 (got {})",
                self.backoff_multiplier
            )));
        }

        if self.max_retry_delay_seconds < self.initial_retry_delay_seconds {
            return Err(ConfigError::Invalid(
                "MaxRetryDelaySeconds must not be below InitialRetryDelaySeconds".to_string(),
            ));
        }

        Ok(())
    }

    /// Initial retry delay as a duration, clamped to the accepted range.
    pub fn initial_retry_delay(&self) -> Duration {
        delay_from_secs(self.initial_retry_delay_seconds)
    }

    /// Maximum retry delay as a duration, clamped to the accepted range.
    pub fn max_retry_delay(&self) -> Duration {
        delay_from_secs(self.max_retry_delay_seconds)
    }

    /// Retention window for quarantined messages, clamped to the accepted range.
    pub fn dead_letter_ttl(&self) -> chrono::Duration {
        let hours = if self.dead_letter_ttl_hours.is_nan() {
            0.0
        } else {
            self.dead_letter_ttl_hours.clamp(0.0, MAX_DEAD_LETTER_TTL_HOURS)
        };
        chrono::Duration::try_seconds((hours * 3600.0) as i64)
            .unwrap_or_else(|| chrono::Duration::hours(MAX_DEAD_LETTER_TTL_HOURS as i64))
    }
}

fn delay_from_secs(secs: f64) -> Duration {
    let secs = if secs.is_nan() {
        0.0
    } else {
        secs.clamp(0.0, MAX_RETRY_DELAY_LIMIT_SECONDS)
    };
    Duration::try_from_secs_f64(secs)
        .unwrap_or_else(|_| Duration::from_secs_f64(MAX_RETRY_DELAY_LIMIT_SECONDS))
}

/// Configuration error.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
