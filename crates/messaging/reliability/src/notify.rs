//! Operator notifications on escalation.

use async_trait::async_trait;

use crate::dlq::FailedMessageInfo;

/// Receives every message escalated to the dead-letter store.
#[async_trait]
pub trait AdminNotifier: Send + Sync {
    async fn notify_escalation(&self, record: &FailedMessageInfo);
}

/// Notifier that writes an error-level log line.
#[derive(Debug, Clone, Default)]
pub struct TracingNotifier;

#[async_trait]
impl AdminNotifier for TracingNotifier {
    async fn notify_escalation(&self, record: &FailedMessageInfo) {
        tracing::error!(
            message_id = %record.message_id(),
            message_type = %record.message_type(),
            queue = %record.source_queue(),
            attempts = record.attempt_count(),
            environment = %record.environment().environment_name,
            reason = %record.last_failure_reason(),
            "Message escalated to dead-letter queue"
        );
    }
}
