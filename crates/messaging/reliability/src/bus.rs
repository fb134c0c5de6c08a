//! Message bus publish contract and an in-memory bus.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{RwLock, mpsc};
use tokio_util::sync::CancellationToken;

use crate::error::{ReliabilityError, ReliabilityResult};
use crate::message::Message;

/// Publish capability of the message broker.
#[async_trait]
pub trait MessagePublisher: Send + Sync {
    /// Publishes a message under a routing key.
    async fn publish(
        &self,
        message: Message,
        routing_key: &str,
        cancel: &CancellationToken,
    ) -> ReliabilityResult<()>;
}

/// In-process bus delivering messages to queue subscribers.
pub struct InMemoryMessageBus {
    subscribers: RwLock<HashMap<String, Vec<mpsc::UnboundedSender<Message>>>>,
    history: RwLock<Vec<Message>>,
    max_history: usize,
}

impl InMemoryMessageBus {
    /// Creates a bus keeping the last 1000 published messages.
    pub fn new() -> Self {
        Self::with_history_size(1000)
    }

    /// Creates a bus keeping at most `max_history` published messages.
    pub fn with_history_size(max_history: usize) -> Self {
        Self {
            subscribers: RwLock::new(HashMap::new()),
            history: RwLock::new(Vec::new()),
            max_history,
        }
    }

    /// Subscribes to a queue. Every message published with a routing key
    /// equal to `queue` is delivered to the returned receiver.
    pub async fn subscribe(&self, queue: &str) -> mpsc::UnboundedReceiver<Message> {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut subs = self.subscribers.write().await;
        subs.entry(queue.to_string()).or_default().push(tx);
        rx
    }

    /// Messages published so far, oldest first.
    pub async fn published(&self) -> Vec<Message> {
        self.history.read().await.clone()
    }

    async fn store_in_history(&self, message: Message) {
        if self.max_history == 0 {
            return;
        }
        let mut history = self.history.write().await;
        if history.len() >= self.max_history {
            history.remove(0);
        }
        history.push(message);
    }
}

impl Default for InMemoryMessageBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessagePublisher for InMemoryMessageBus {
    async fn publish(
        &self,
        message: Message,
        routing_key: &str,
        cancel: &CancellationToken,
    ) -> ReliabilityResult<()> {
        if cancel.is_cancelled() {
            return Err(ReliabilityError::Cancelled);
        }

        self.store_in_history(message.clone()).await;

        let mut subs = self.subscribers.write().await;
        if let Some(senders) = subs.get_mut(routing_key) {
            senders.retain(|tx| tx.send(message.clone()).is_ok());
        } else {
            tracing::debug!(routing_key, message_id = %message.id, "No subscribers for routing key");
        }
        Ok(())
    }
}
