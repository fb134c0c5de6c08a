use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::record::FailedMessageInfo;
use crate::classifier::FailureType;

/// Aggregate view over quarantined messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterStatistics {
    /// Total number of quarantined messages.
    pub total_messages: usize,
    /// Count per source queue.
    pub by_queue: BTreeMap<String, usize>,
    /// Count per error type of the most recent failure.
    pub by_error_type: BTreeMap<String, usize>,
    /// Count per classification of the most recent failure.
    pub by_failure_type: BTreeMap<FailureType, usize>,
    /// Average attempts per message.
    pub average_attempts: f64,
    /// Earliest first failure among quarantined messages.
    pub oldest_failure_at: Option<DateTime<Utc>>,
    /// When these statistics were computed.
    pub generated_at: DateTime<Utc>,
}

impl DeadLetterStatistics {
    /// Statistics for an empty store.
    pub fn empty() -> Self {
        Self {
            total_messages: 0,
            by_queue: BTreeMap::new(),
            by_error_type: BTreeMap::new(),
            by_failure_type: BTreeMap::new(),
            average_attempts: 0.0,
            oldest_failure_at: None,
            generated_at: Utc::now(),
        }
    }

    /// Computes statistics over a snapshot of records.
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a FailedMessageInfo>) -> Self {
        let mut stats = Self::empty();
        let mut total_attempts = 0u64;

        for record in records {
            stats.total_messages += 1;
            total_attempts += u64::from(record.attempt_count());

            *stats
                .by_queue
                .entry(record.source_queue().to_string())
                .or_insert(0) += 1;

            if let Some(last) = record.last_attempt() {
                *stats
                    .by_error_type
                    .entry(last.exception_type.clone())
                    .or_insert(0) += 1;
                *stats.by_failure_type.entry(last.failure_type).or_insert(0) += 1;
            }

            stats.oldest_failure_at = Some(match stats.oldest_failure_at {
                Some(oldest) => oldest.min(record.first_attempt_at()),
                None => record.first_attempt_at(),
            });
        }

        if stats.total_messages > 0 {
            stats.average_attempts = total_attempts as f64 / stats.total_messages as f64;
        }
        stats
    }
}

impl Default for DeadLetterStatistics {
    fn default() -> Self {
        Self::empty()
    }
}
