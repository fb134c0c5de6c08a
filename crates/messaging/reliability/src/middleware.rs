//! Retry middleware around message handlers.
//!
//! Each invocation runs a small state machine:
//! 1. Invoke the handler.
//! 2. On success, return `Ok(true)`.
//! 3. On failure, classify and record the attempt, then either wait the
//!    backoff delay and go back to 1, or escalate the message to the
//!    dead-letter store and return `Ok(false)`.
//!
//! Cancellation of the caller's token, during the handler or during the
//! delay, returns [`Cancelled`] without recording anything.

use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::classifier::FailureType;
use crate::config::DeadLetterConfig;
use crate::dlq::{DeadLetterStore, EnvironmentMetadata, FailedMessageInfo, FailureAttempt};
use crate::error::{Cancelled, HandlerError};
use crate::handler::MessageHandler;
use crate::message::Message;
use crate::notify::{AdminNotifier, TracingNotifier};
use crate::policy::RetryPolicy;

/// Per-invocation retry state. Never persisted.
pub struct RetryContext<'a> {
    /// Message being processed.
    pub message: &'a Message,
    /// Handler invoked on each attempt.
    pub handler: &'a dyn MessageHandler,
    /// Current attempt, starting at 1.
    pub attempt: u32,
    /// Maximum handler invocations (initial delivery plus retries).
    pub max_attempts: u32,
    /// Queue the message was consumed from.
    pub source_queue: &'a str,
    /// Handler name recorded in the failure history.
    pub handler_name: &'a str,
}

impl<'a> RetryContext<'a> {
    fn new(message: &'a Message, handler: &'a dyn MessageHandler, max_retries: u32) -> Self {
        Self {
            message,
            handler,
            attempt: 1,
            max_attempts: max_retries.saturating_add(1),
            source_queue: &message.source_queue,
            handler_name: handler.name(),
        }
    }

    /// Retries consumed so far; the initial delivery is not a retry.
    fn retries_used(&self) -> u32 {
        self.attempt - 1
    }
}

/// Wraps handler execution with classification, backoff and escalation.
///
/// Holds no per-message state, so one instance can serve every worker task.
pub struct RetryMiddleware {
    policy: RetryPolicy,
    store: Arc<dyn DeadLetterStore>,
    environment: EnvironmentMetadata,
    detailed_logging: bool,
    notifier: Option<Arc<dyn AdminNotifier>>,
}

impl RetryMiddleware {
    /// Creates a middleware with the given policy and store.
    pub fn new(policy: RetryPolicy, store: Arc<dyn DeadLetterStore>) -> Self {
        Self {
            policy,
            store,
            environment: EnvironmentMetadata::from_config(&DeadLetterConfig::default()),
            detailed_logging: false,
            notifier: None,
        }
    }

    /// Creates a middleware from the `DeadLetter` configuration section.
    pub fn from_config(config: &DeadLetterConfig, store: Arc<dyn DeadLetterStore>) -> Self {
        let mut middleware = Self::new(RetryPolicy::from_config(config), store)
            .with_environment(EnvironmentMetadata::from_config(config))
            .with_detailed_logging(config.enable_detailed_logging);
        if config.enable_admin_notifications {
            middleware = middleware.with_notifier(Arc::new(TracingNotifier));
        }
        middleware
    }

    /// Sets the provenance recorded on dead letters.
    pub fn with_environment(mut self, environment: EnvironmentMetadata) -> Self {
        self.environment = environment;
        self
    }

    /// Logs every attempt at info level.
    pub fn with_detailed_logging(mut self, enabled: bool) -> Self {
        self.detailed_logging = enabled;
        self
    }

    /// Notifies operators on every escalation.
    pub fn with_notifier(mut self, notifier: Arc<dyn AdminNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Returns the retry policy.
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Returns the dead-letter store escalations go to.
    pub fn store(&self) -> &Arc<dyn DeadLetterStore> {
        &self.store
    }

    /// Runs the handler until it succeeds, the policy gives up, or `cancel` fires.
    ///
    /// Returns `Ok(true)` on success and `Ok(false)` once the message has
    /// been sent to the dead-letter store.
    pub async fn execute_with_retry(
        &self,
        message: &Message,
        handler: &dyn MessageHandler,
        cancel: &CancellationToken,
    ) -> Result<bool, Cancelled> {
        let mut ctx = RetryContext::new(message, handler, self.policy.max_retry_attempts);
        let mut history: Vec<FailureAttempt> = Vec::new();

        loop {
            let outcome = tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!(
                        message_id = %message.id,
                        handler = ctx.handler_name,
                        attempt = ctx.attempt,
                        "Cancelled during handler execution"
                    );
                    return Err(Cancelled);
                }

                result = ctx.handler.handle(ctx.message, cancel) => result,
            };

            let error = match outcome {
                Ok(()) => {
                    if ctx.attempt > 1 {
                        tracing::info!(
                            message_id = %message.id,
                            handler = ctx.handler_name,
                            attempt = ctx.attempt,
                            "Message handled after retry"
                        );
                    }
                    return Ok(true);
                }
                Err(e) if e.is_cancelled() || cancel.is_cancelled() => return Err(Cancelled),
                Err(e) => e,
            };

            let failure_type = self.policy.classify(&error);
            history.push(FailureAttempt::new(ctx.handler_name, failure_type, &error));
            self.log_failure(&ctx, failure_type, &error);

            if !self.policy.should_retry_type(failure_type, ctx.retries_used()) {
                self.escalate(&ctx, history).await;
                return Ok(false);
            }

            let delay = self.policy.calculate_retry_delay(ctx.attempt);
            if self.detailed_logging {
                tracing::info!(
                    message_id = %message.id,
                    queue = ctx.source_queue,
                    handler = ctx.handler_name,
                    attempt = ctx.attempt,
                    max_attempts = ctx.max_attempts,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling retry"
                );
            } else {
                tracing::debug!(
                    message_id = %message.id,
                    attempt = ctx.attempt,
                    delay_ms = delay.as_millis() as u64,
                    "Scheduling retry"
                );
            }

            tokio::select! {
                biased;

                _ = cancel.cancelled() => {
                    tracing::debug!(
                        message_id = %message.id,
                        attempt = ctx.attempt,
                        "Cancelled during retry delay"
                    );
                    return Err(Cancelled);
                }

                _ = tokio::time::sleep(delay) => {}
            }

            ctx.attempt += 1;
        }
    }

    fn log_failure(&self, ctx: &RetryContext<'_>, failure_type: FailureType, error: &HandlerError) {
        if self.detailed_logging {
            tracing::warn!(
                message_id = %ctx.message.id,
                message_type = %ctx.message.message_type,
                queue = ctx.source_queue,
                handler = ctx.handler_name,
                attempt = ctx.attempt,
                max_attempts = ctx.max_attempts,
                failure_type = %failure_type,
                error_type = error.type_name(),
                error = %error,
                "Handler attempt failed"
            );
        } else {
            tracing::warn!(
                message_id = %ctx.message.id,
                handler = ctx.handler_name,
                attempt = ctx.attempt,
                failure_type = %failure_type,
                error = %error,
                "Handler attempt failed"
            );
        }
    }

    async fn escalate(&self, ctx: &RetryContext<'_>, history: Vec<FailureAttempt>) {
        let record =
            match FailedMessageInfo::from_failures(ctx.message, history, self.environment.clone()) {
                Ok(Some(record)) => record,
                Ok(None) => {
                    tracing::error!(message_id = %ctx.message.id, "Escalation without failure history");
                    return;
                }
                Err(e) => {
                    tracing::error!(
                        message_id = %ctx.message.id,
                        error = %e,
                        "Failed to serialize message for dead-letter queue"
                    );
                    return;
                }
            };

        if let Some(notifier) = &self.notifier {
            notifier.notify_escalation(&record).await;
        }
        self.store.send_to_dead_letter(record).await;
    }
}
