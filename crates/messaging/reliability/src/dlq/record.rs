use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::classifier::FailureType;
use crate::config::DeadLetterConfig;
use crate::error::HandlerError;
use crate::message::Message;

/// One failed handler invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureAttempt {
    /// When the attempt failed.
    pub timestamp: DateTime<Utc>,
    /// Handler that failed.
    pub handler_type: String,
    /// Classification assigned to the error.
    pub failure_type: FailureType,
    /// Error type name.
    pub exception_type: String,
    /// Error message.
    pub exception_message: String,
}

impl FailureAttempt {
    /// Records a failure observed now.
    pub fn new(handler: impl Into<String>, failure_type: FailureType, error: &HandlerError) -> Self {
        Self {
            timestamp: Utc::now(),
            handler_type: handler.into(),
            failure_type,
            exception_type: error.type_name().to_string(),
            exception_message: error.to_string(),
        }
    }
}

/// Deployment provenance attached to each record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvironmentMetadata {
    /// Deployment environment (e.g. "production").
    pub environment_name: String,
    /// Version of the application that observed the failure.
    pub application_version: String,
}

impl EnvironmentMetadata {
    /// Creates metadata from explicit values.
    pub fn new(environment_name: impl Into<String>, application_version: impl Into<String>) -> Self {
        Self {
            environment_name: environment_name.into(),
            application_version: application_version.into(),
        }
    }

    /// Reads the environment name and version from configuration.
    pub fn from_config(config: &DeadLetterConfig) -> Self {
        Self::new(&config.environment_name, &config.application_version)
    }
}

/// A quarantined message with its failure history.
///
/// `attempt_count` always equals `failure_history.len()`. Fields are only
/// reachable read-only; the history grows through [`FailedMessageInfo::merge`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailedMessageInfo {
    message_id: String,
    message_type: String,
    original_message: String,
    source_queue: String,
    first_attempt_at: DateTime<Utc>,
    last_attempt_at: DateTime<Utc>,
    attempt_count: u32,
    last_failure_reason: String,
    failure_history: Vec<FailureAttempt>,
    environment: EnvironmentMetadata,
}

impl FailedMessageInfo {
    /// Builds a record from a message and its failure history.
    ///
    /// Returns `None` if the history is empty. Fails if the message cannot
    /// be serialized.
    pub fn from_failures(
        message: &Message,
        history: Vec<FailureAttempt>,
        environment: EnvironmentMetadata,
    ) -> Result<Option<Self>, serde_json::Error> {
        let (Some(first), Some(last)) = (history.first(), history.last()) else {
            return Ok(None);
        };

        Ok(Some(Self {
            message_id: message.id.clone(),
            message_type: message.message_type.clone(),
            original_message: message.to_json()?,
            source_queue: message.source_queue.clone(),
            first_attempt_at: first.timestamp,
            last_attempt_at: last.timestamp.max(first.timestamp),
            attempt_count: history.len() as u32,
            last_failure_reason: failure_reason(last),
            failure_history: history,
            environment,
        }))
    }

    /// Id of the quarantined message.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Logical type of the quarantined message.
    pub fn message_type(&self) -> &str {
        &self.message_type
    }

    /// Serialized envelope of the original message.
    pub fn original_message(&self) -> &str {
        &self.original_message
    }

    /// Queue the message was consumed from and is republished to.
    pub fn source_queue(&self) -> &str {
        &self.source_queue
    }

    /// When the first recorded attempt failed.
    pub fn first_attempt_at(&self) -> DateTime<Utc> {
        self.first_attempt_at
    }

    /// When the most recent attempt failed.
    pub fn last_attempt_at(&self) -> DateTime<Utc> {
        self.last_attempt_at
    }

    /// Number of failed attempts, equal to the history length.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Summary of the most recent failure.
    pub fn last_failure_reason(&self) -> &str {
        &self.last_failure_reason
    }

    /// Failed attempts ordered by time.
    pub fn failure_history(&self) -> &[FailureAttempt] {
        &self.failure_history
    }

    /// Provenance of the record.
    pub fn environment(&self) -> &EnvironmentMetadata {
        &self.environment
    }

    /// The most recent attempt.
    pub fn last_attempt(&self) -> Option<&FailureAttempt> {
        self.failure_history.last()
    }

    /// Restores the original message envelope.
    pub fn restore_message(&self) -> Result<Message, serde_json::Error> {
        Message::from_json(&self.original_message)
    }

    /// Combines the history of another escalation of the same message.
    ///
    /// The merged history is ordered by attempt time whichever record is
    /// older, so restoring an earlier record over a newer one keeps order.
    /// Envelope and environment come from the record with the latest attempt.
    pub fn merge(&mut self, other: FailedMessageInfo) {
        let other_is_newer = other.last_attempt_at >= self.last_attempt_at;

        self.failure_history.extend(other.failure_history);
        self.failure_history.sort_by_key(|attempt| attempt.timestamp);
        self.attempt_count = self.failure_history.len() as u32;
        self.first_attempt_at = self.first_attempt_at.min(other.first_attempt_at);
        self.last_attempt_at = self.last_attempt_at.max(other.last_attempt_at);
        if let Some(last) = self.failure_history.last() {
            self.last_failure_reason = failure_reason(last);
        }

        if other_is_newer {
            self.original_message = other.original_message;
            self.environment = other.environment;
        }
    }

    /// Checks the structural invariants. Used after deserializing records
    /// from an untrusted backend.
    pub fn is_consistent(&self) -> bool {
        !self.failure_history.is_empty()
            && self.attempt_count as usize == self.failure_history.len()
            && self.first_attempt_at <= self.last_attempt_at
    }
}

fn failure_reason(attempt: &FailureAttempt) -> String {
    format!(
        "{} failure in {}: {}",
        attempt.failure_type, attempt.handler_type, attempt.exception_message
    )
}
