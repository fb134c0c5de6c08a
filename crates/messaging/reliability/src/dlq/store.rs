use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::record::FailedMessageInfo;
use super::stats::DeadLetterStatistics;
use super::storage::{DeadLetterStorage, InMemoryDeadLetterStorage};
use crate::bus::MessagePublisher;
use crate::config::DeadLetterConfig;
use crate::error::{ReliabilityError, ReliabilityResult};
use crate::headers;

/// Quarantine for messages that exhausted retries or are non-retryable.
///
/// `send_to_dead_letter` sits on the hot message path and never fails.
/// The remaining operations are operator-invoked and report errors.
#[async_trait]
pub trait DeadLetterStore: Send + Sync {
    /// Persists a record, merging into an existing record for the same message.
    async fn send_to_dead_letter(&self, record: FailedMessageInfo);

    /// Lists the records of a queue.
    async fn list_dead_letter_messages(&self, queue: &str) -> ReliabilityResult<DeadLetterListing>;

    /// Gets a single record.
    async fn get_dead_letter_message(
        &self,
        queue: &str,
        message_id: &str,
    ) -> ReliabilityResult<Option<FailedMessageInfo>>;

    /// Removes a record and republishes its original message to the source queue.
    async fn reprocess_dead_letter_message(
        &self,
        queue: &str,
        message_id: &str,
    ) -> ReliabilityResult<()>;

    /// Reprocesses every record of a queue. Returns how many were republished.
    async fn reprocess_queue(&self, queue: &str) -> ReliabilityResult<usize>;

    /// Permanently deletes a record.
    async fn purge_dead_letter_message(&self, queue: &str, message_id: &str)
        -> ReliabilityResult<()>;

    /// Deletes records whose last failure is older than the retention window.
    async fn purge_expired(&self, now: DateTime<Utc>) -> ReliabilityResult<usize>;

    /// Aggregate counts over the current contents.
    async fn get_dead_letter_statistics(&self) -> ReliabilityResult<DeadLetterStatistics>;
}

/// Finite, restartable enumeration over a queue's records.
///
/// Holds a snapshot taken when the listing was created.
#[derive(Debug, Clone, Default)]
pub struct DeadLetterListing {
    records: Vec<FailedMessageInfo>,
    cursor: usize,
}

impl DeadLetterListing {
    /// Wraps a snapshot, positioned at the first record.
    pub fn new(records: Vec<FailedMessageInfo>) -> Self {
        Self { records, cursor: 0 }
    }

    /// Rewinds to the first record.
    pub fn restart(&mut self) {
        self.cursor = 0;
    }

    /// All records of the snapshot, regardless of the cursor.
    pub fn records(&self) -> &[FailedMessageInfo] {
        &self.records
    }

    /// Number of records in the snapshot.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns true if the snapshot is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Consumes the listing, returning every record.
    pub fn into_vec(self) -> Vec<FailedMessageInfo> {
        self.records
    }
}

impl Iterator for DeadLetterListing {
    type Item = FailedMessageInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let record = self.records.get(self.cursor).cloned();
        if record.is_some() {
            self.cursor += 1;
        }
        record
    }
}

/// Dead-letter store backed by a storage backend and the message bus.
pub struct BrokerDeadLetterStore {
    storage: Arc<dyn DeadLetterStorage>,
    publisher: Arc<dyn MessagePublisher>,
    ttl: chrono::Duration,
}

impl BrokerDeadLetterStore {
    /// Creates a store with the default retention window.
    pub fn new(storage: Arc<dyn DeadLetterStorage>, publisher: Arc<dyn MessagePublisher>) -> Self {
        Self {
            storage,
            publisher,
            ttl: DeadLetterConfig::default().dead_letter_ttl(),
        }
    }

    /// Sets the retention window used by [`DeadLetterStore::purge_expired`].
    pub fn with_ttl(mut self, ttl: chrono::Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Returns the storage backend.
    pub fn storage(&self) -> &Arc<dyn DeadLetterStorage> {
        &self.storage
    }
}

#[async_trait]
impl DeadLetterStore for BrokerDeadLetterStore {
    async fn send_to_dead_letter(&self, record: FailedMessageInfo) {
        let message_id = record.message_id().to_string();
        let queue = record.source_queue().to_string();
        let attempts = record.attempt_count();
        let reason = record.last_failure_reason().to_string();

        match self.storage.upsert(record).await {
            Ok(()) => {
                tracing::warn!(
                    message_id = %message_id,
                    queue = %queue,
                    attempts,
                    reason = %reason,
                    "Message sent to dead-letter queue"
                );
            }
            Err(e) => {
                tracing::error!(
                    message_id = %message_id,
                    queue = %queue,
                    error = %e,
                    "Failed to persist dead-letter record"
                );
            }
        }
    }

    async fn list_dead_letter_messages(&self, queue: &str) -> ReliabilityResult<DeadLetterListing> {
        Ok(DeadLetterListing::new(self.storage.list(queue).await?))
    }

    async fn get_dead_letter_message(
        &self,
        queue: &str,
        message_id: &str,
    ) -> ReliabilityResult<Option<FailedMessageInfo>> {
        self.storage.get(queue, message_id).await
    }

    async fn reprocess_dead_letter_message(
        &self,
        queue: &str,
        message_id: &str,
    ) -> ReliabilityResult<()> {
        let record = self
            .storage
            .remove(queue, message_id)
            .await?
            .ok_or_else(|| not_found(queue, message_id))?;

        let mut message = match record.restore_message() {
            Ok(message) => message,
            Err(e) => {
                self.storage.upsert(record).await?;
                return Err(e.into());
            }
        };

        let reprocessed = message
            .headers
            .get(headers::REPROCESS_COUNT)
            .and_then(|count| count.parse::<u32>().ok())
            .unwrap_or(0)
            + 1;
        message
            .headers
            .insert(headers::REPROCESS_COUNT.to_string(), reprocessed.to_string());

        let routing_key = record.source_queue().to_string();
        if let Err(e) = self
            .publisher
            .publish(message, &routing_key, &CancellationToken::new())
            .await
        {
            tracing::error!(
                message_id,
                queue,
                error = %e,
                "Republish failed, restoring dead-letter record"
            );
            self.storage.upsert(record).await?;
            return Err(e);
        }

        tracing::info!(message_id, queue, "Dead letter reprocessed");
        Ok(())
    }

    async fn reprocess_queue(&self, queue: &str) -> ReliabilityResult<usize> {
        let records = self.storage.list(queue).await?;
        let mut reprocessed = 0;

        for record in records {
            match self
                .reprocess_dead_letter_message(queue, record.message_id())
                .await
            {
                Ok(()) => reprocessed += 1,
                Err(e) => {
                    tracing::warn!(
                        message_id = %record.message_id(),
                        queue,
                        error = %e,
                        "Skipping dead letter during bulk reprocess"
                    );
                }
            }
        }

        Ok(reprocessed)
    }

    async fn purge_dead_letter_message(
        &self,
        queue: &str,
        message_id: &str,
    ) -> ReliabilityResult<()> {
        self.storage
            .remove(queue, message_id)
            .await?
            .ok_or_else(|| not_found(queue, message_id))?;

        tracing::info!(message_id, queue, "Dead letter purged");
        Ok(())
    }

    async fn purge_expired(&self, now: DateTime<Utc>) -> ReliabilityResult<usize> {
        let Some(cutoff) = now.checked_sub_signed(self.ttl) else {
            tracing::debug!(
                ttl_hours = self.ttl.num_hours(),
                "Retention window exceeds the representable range, nothing expired"
            );
            return Ok(0);
        };
        let mut purged = 0;

        for record in self.storage.snapshot().await? {
            if record.last_attempt_at() < cutoff
                && self
                    .storage
                    .remove(record.source_queue(), record.message_id())
                    .await?
                    .is_some()
            {
                purged += 1;
            }
        }

        tracing::info!(purged, %cutoff, "Purged expired dead letters");
        Ok(purged)
    }

    async fn get_dead_letter_statistics(&self) -> ReliabilityResult<DeadLetterStatistics> {
        let snapshot = self.storage.snapshot().await?;
        Ok(DeadLetterStatistics::from_records(&snapshot))
    }
}

/// Store with the same contract that performs no I/O.
#[derive(Debug, Clone, Default)]
pub struct NoOpDeadLetterStore;

impl NoOpDeadLetterStore {
    /// Creates the no-op store.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl DeadLetterStore for NoOpDeadLetterStore {
    async fn send_to_dead_letter(&self, record: FailedMessageInfo) {
        tracing::info!(
            message_id = %record.message_id(),
            queue = %record.source_queue(),
            attempts = record.attempt_count(),
            "Dead-lettering disabled, dropping failed message"
        );
    }

    async fn list_dead_letter_messages(&self, _queue: &str) -> ReliabilityResult<DeadLetterListing> {
        Ok(DeadLetterListing::default())
    }

    async fn get_dead_letter_message(
        &self,
        _queue: &str,
        _message_id: &str,
    ) -> ReliabilityResult<Option<FailedMessageInfo>> {
        Ok(None)
    }

    async fn reprocess_dead_letter_message(
        &self,
        queue: &str,
        message_id: &str,
    ) -> ReliabilityResult<()> {
        tracing::info!(message_id, queue, "Dead-lettering disabled, reprocess ignored");
        Ok(())
    }

    async fn reprocess_queue(&self, queue: &str) -> ReliabilityResult<usize> {
        tracing::info!(queue, "Dead-lettering disabled, bulk reprocess ignored");
        Ok(0)
    }

    async fn purge_dead_letter_message(
        &self,
        queue: &str,
        message_id: &str,
    ) -> ReliabilityResult<()> {
        tracing::info!(message_id, queue, "Dead-lettering disabled, purge ignored");
        Ok(())
    }

    async fn purge_expired(&self, _now: DateTime<Utc>) -> ReliabilityResult<usize> {
        Ok(0)
    }

    async fn get_dead_letter_statistics(&self) -> ReliabilityResult<DeadLetterStatistics> {
        Ok(DeadLetterStatistics::empty())
    }
}

/// Picks the store implementation from the `Enabled` flag.
pub fn build_dead_letter_store(
    config: &DeadLetterConfig,
    publisher: Arc<dyn MessagePublisher>,
) -> Arc<dyn DeadLetterStore> {
    if config.enabled {
        Arc::new(
            BrokerDeadLetterStore::new(Arc::new(InMemoryDeadLetterStorage::new()), publisher)
                .with_ttl(config.dead_letter_ttl()),
        )
    } else {
        tracing::info!("Dead-letter store disabled by configuration");
        Arc::new(NoOpDeadLetterStore::new())
    }
}

fn not_found(queue: &str, message_id: &str) -> ReliabilityError {
    ReliabilityError::NotFound {
        queue: queue.to_string(),
        message_id: message_id.to_string(),
    }
}
