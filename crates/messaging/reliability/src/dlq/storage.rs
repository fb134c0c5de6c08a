use async_trait::async_trait;
use dashmap::DashMap;

use super::record::FailedMessageInfo;
use crate::ReliabilityResult;

/// Persistence backend for dead-letter records.
#[async_trait]
pub trait DeadLetterStorage: Send + Sync {
    /// Inserts a record, or merges it into the existing record with the same
    /// message id in the same queue.
    async fn upsert(&self, record: FailedMessageInfo) -> ReliabilityResult<()>;

    /// Gets a record by queue and message id.
    async fn get(&self, queue: &str, message_id: &str)
        -> ReliabilityResult<Option<FailedMessageInfo>>;

    /// Lists records of a queue in insertion order.
    async fn list(&self, queue: &str) -> ReliabilityResult<Vec<FailedMessageInfo>>;

    /// Removes and returns a record.
    async fn remove(&self, queue: &str, message_id: &str)
        -> ReliabilityResult<Option<FailedMessageInfo>>;

    /// Names of queues that currently hold records.
    async fn queues(&self) -> ReliabilityResult<Vec<String>>;

    /// Point-in-time copy of every record.
    async fn snapshot(&self) -> ReliabilityResult<Vec<FailedMessageInfo>>;
}

/// In-memory storage sharded by queue.
///
/// Writers to different queues do not contend; writers to the same queue
/// only lock that queue's shard.
pub struct InMemoryDeadLetterStorage {
    queues: DashMap<String, Vec<FailedMessageInfo>>,
}

impl InMemoryDeadLetterStorage {
    /// Creates empty storage.
    pub fn new() -> Self {
        Self {
            queues: DashMap::new(),
        }
    }

    /// Number of stored records across all queues.
    pub fn len(&self) -> usize {
        self.queues.iter().map(|entry| entry.value().len()).sum()
    }

    /// Returns true if no queue holds a record.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for InMemoryDeadLetterStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DeadLetterStorage for InMemoryDeadLetterStorage {
    async fn upsert(&self, record: FailedMessageInfo) -> ReliabilityResult<()> {
        let mut shard = self
            .queues
            .entry(record.source_queue().to_string())
            .or_default();

        match shard
            .iter_mut()
            .find(|existing| existing.message_id() == record.message_id())
        {
            Some(existing) => existing.merge(record),
            None => shard.push(record),
        }
        Ok(())
    }

    async fn get(
        &self,
        queue: &str,
        message_id: &str,
    ) -> ReliabilityResult<Option<FailedMessageInfo>> {
        Ok(self.queues.get(queue).and_then(|shard| {
            shard
                .iter()
                .find(|record| record.message_id() == message_id)
                .cloned()
        }))
    }

    async fn list(&self, queue: &str) -> ReliabilityResult<Vec<FailedMessageInfo>> {
        Ok(self
            .queues
            .get(queue)
            .map(|shard| shard.clone())
            .unwrap_or_default())
    }

    async fn remove(
        &self,
        queue: &str,
        message_id: &str,
    ) -> ReliabilityResult<Option<FailedMessageInfo>> {
        let removed = {
            let Some(mut shard) = self.queues.get_mut(queue) else {
                return Ok(None);
            };
            let position = shard
                .iter()
                .position(|record| record.message_id() == message_id);
            position.map(|index| shard.remove(index))
        };

        self.queues.remove_if(queue, |_, shard| shard.is_empty());
        Ok(removed)
    }

    async fn queues(&self) -> ReliabilityResult<Vec<String>> {
        let mut names: Vec<String> = self
            .queues
            .iter()
            .filter(|entry| !entry.value().is_empty())
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        Ok(names)
    }

    async fn snapshot(&self) -> ReliabilityResult<Vec<FailedMessageInfo>> {
        Ok(self
            .queues
            .iter()
            .flat_map(|entry| entry.value().clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::FailureType;
    use crate::dlq::record::{EnvironmentMetadata, FailureAttempt};
    use crate::{HandlerError, Message};
    use std::sync::Arc;

    fn record(queue: &str, id: &str) -> FailedMessageInfo {
        let message = Message::new("test.message", queue, serde_json::json!({})).with_id(id);
        FailedMessageInfo::from_failures(
            &message,
            vec![FailureAttempt::new(
                "handler",
                FailureType::Permanent,
                &HandlerError::Validation("bad".into()),
            )],
            EnvironmentMetadata::new("test", "0.0.0"),
        )
        .unwrap()
        .unwrap()
    }

    #[tokio::test]
    async fn test_upsert_and_get() {
        let storage = InMemoryDeadLetterStorage::new();
        storage.upsert(record("orders", "m-1")).await.unwrap();

        let found = storage.get("orders", "m-1").await.unwrap();
        assert_eq!(found.unwrap().message_id(), "m-1");
        assert!(storage.get("orders", "m-2").await.unwrap().is_none());
        assert!(storage.get("other", "m-1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_upsert_merges_same_message() {
        let storage = InMemoryDeadLetterStorage::new();
        storage.upsert(record("orders", "m-1")).await.unwrap();
        storage.upsert(record("orders", "m-1")).await.unwrap();

        let list = storage.list("orders").await.unwrap();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].attempt_count(), 2);
        assert!(list[0].is_consistent());
    }

    #[tokio::test]
    async fn test_list_keeps_insertion_order() {
        let storage = InMemoryDeadLetterStorage::new();
        for id in ["a", "b", "c"] {
            storage.upsert(record("orders", id)).await.unwrap();
        }

        let ids: Vec<String> = storage
            .list("orders")
            .await
            .unwrap()
            .iter()
            .map(|r| r.message_id().to_string())
            .collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_remove_drops_empty_queue() {
        let storage = InMemoryDeadLetterStorage::new();
        storage.upsert(record("orders", "m-1")).await.unwrap();

        let removed = storage.remove("orders", "m-1").await.unwrap();
        assert!(removed.is_some());
        assert!(storage.remove("orders", "m-1").await.unwrap().is_none());
        assert!(storage.queues().await.unwrap().is_empty());
        assert!(storage.is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_upserts() {
        let storage = Arc::new(InMemoryDeadLetterStorage::new());
        let mut tasks = Vec::new();

        for i in 0..64 {
            let storage = storage.clone();
            tasks.push(tokio::spawn(async move {
                let queue = format!("queue-{}", i % 4);
                storage.upsert(record(&queue, &format!("m-{i}"))).await
            }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }

        assert_eq!(storage.len(), 64);
        assert_eq!(storage.queues().await.unwrap().len(), 4);
        assert_eq!(storage.snapshot().await.unwrap().len(), 64);
    }
}
