//! End-to-end retry and dead-letter scenarios
//!
//! This test suite covers:
//! - Escalation of non-retryable failures
//! - Recovery after transient failures
//! - Exhaustion of retries
//! - Backoff timing
//! - Cancellation
//! - Reprocessing from the dead-letter queue

use async_trait::async_trait;
use marketplace_reliability::{
    BrokerDeadLetterStore, Cancelled, DeadLetterConfig, DeadLetterStorage, DeadLetterStore,
    FailedMessageInfo, FailureType, HandlerError, InMemoryDeadLetterStorage, InMemoryMessageBus,
    Message, MessageHandler, RetryMiddleware, RetryPolicy,
};
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Fails with the scripted errors in order, then succeeds.
struct FlakyHandler {
    script: Vec<HandlerError>,
    invocations: Mutex<Vec<Instant>>,
}

impl FlakyHandler {
    fn new(script: Vec<HandlerError>) -> Self {
        Self {
            script,
            invocations: Mutex::new(Vec::new()),
        }
    }

    fn always(error: HandlerError) -> Self {
        Self::new(vec![error; 100])
    }

    fn calls(&self) -> usize {
        self.invocations.lock().unwrap().len()
    }

    fn gaps(&self) -> Vec<Duration> {
        let times = self.invocations.lock().unwrap();
        times.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

#[async_trait]
impl MessageHandler for FlakyHandler {
    fn name(&self) -> &str {
        "ProviderIndexHandler"
    }

    async fn handle(&self, _message: &Message, _cancel: &CancellationToken) -> Result<(), HandlerError> {
        let call = {
            let mut invocations = self.invocations.lock().unwrap();
            invocations.push(Instant::now());
            invocations.len() - 1
        };
        match self.script.get(call) {
            Some(err) => Err(err.clone()),
            None => Ok(()),
        }
    }
}

/// Never finishes on its own.
struct HangingHandler;

#[async_trait]
impl MessageHandler for HangingHandler {
    fn name(&self) -> &str {
        "HangingHandler"
    }

    async fn handle(&self, _message: &Message, _cancel: &CancellationToken) -> Result<(), HandlerError> {
        tokio::time::sleep(Duration::from_secs(3600)).await;
        Ok(())
    }
}

struct Harness {
    middleware: RetryMiddleware,
    storage: Arc<InMemoryDeadLetterStorage>,
    store: Arc<BrokerDeadLetterStore>,
    bus: Arc<InMemoryMessageBus>,
}

fn harness() -> Harness {
    let storage = Arc::new(InMemoryDeadLetterStorage::new());
    let bus = Arc::new(InMemoryMessageBus::new());
    let store = Arc::new(BrokerDeadLetterStore::new(storage.clone(), bus.clone()));
    let policy = RetryPolicy::new()
        .max_retry_attempts(3)
        .initial_delay(Duration::from_secs(2))
        .multiplier(2.0)
        .max_delay(Duration::from_secs(60));
    Harness {
        middleware: RetryMiddleware::new(policy, store.clone()),
        storage,
        store,
        bus,
    }
}

fn provider_message() -> Message {
    Message::new(
        "provider.registered",
        "provider-search-index",
        serde_json::json!({ "providerId": "prov-42", "city": "Lyon" }),
    )
}

async fn dead_letter(h: &Harness, message: &Message) -> Option<FailedMessageInfo> {
    h.storage.get(&message.source_queue, &message.id).await.unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_permanent_failure_escalates_after_one_attempt() {
    let h = harness();
    let handler = FlakyHandler::always(HandlerError::Validation("missing city".into()));
    let message = provider_message();
    let started = Instant::now();

    let handled = h
        .middleware
        .execute_with_retry(&message, &handler, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!handled);
    assert_eq!(handler.calls(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);

    let record = dead_letter(&h, &message).await.unwrap();
    assert_eq!(record.attempt_count(), 1);
    assert_eq!(record.failure_history()[0].failure_type, FailureType::Permanent);
    assert_eq!(record.failure_history()[0].handler_type, "ProviderIndexHandler");
}

#[tokio::test(start_paused = true)]
async fn test_transient_failures_then_success() {
    let h = harness();
    let handler = FlakyHandler::new(vec![
        HandlerError::Timeout("search cluster".into()),
        HandlerError::Transport("connection reset".into()),
    ]);
    let message = provider_message();

    let handled = h
        .middleware
        .execute_with_retry(&message, &handler, &CancellationToken::new())
        .await
        .unwrap();

    assert!(handled);
    assert_eq!(handler.calls(), 3);
    assert!(dead_letter(&h, &message).await.is_none());
    assert!(h.storage.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_retries_exhausted() {
    let h = harness();
    let handler = FlakyHandler::always(HandlerError::Timeout("search cluster".into()));
    let message = provider_message();

    let handled = h
        .middleware
        .execute_with_retry(&message, &handler, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!handled);
    assert_eq!(handler.calls(), 4);

    let record = dead_letter(&h, &message).await.unwrap();
    assert_eq!(record.attempt_count(), 4);
    assert_eq!(record.failure_history().len(), 4);
    assert!(record.first_attempt_at() <= record.last_attempt_at());
    assert_eq!(record.message_type(), "provider.registered");
    assert_eq!(record.source_queue(), "provider-search-index");
    assert!(record.last_failure_reason().contains("search cluster"));
}

#[tokio::test(start_paused = true)]
async fn test_backoff_delays() {
    let h = harness();
    let handler = FlakyHandler::always(HandlerError::Timeout("slow".into()));
    let message = provider_message();

    h.middleware
        .execute_with_retry(&message, &handler, &CancellationToken::new())
        .await
        .unwrap();

    let expected = [2, 4, 8].map(Duration::from_secs);
    let gaps = handler.gaps();
    assert_eq!(gaps.len(), expected.len());
    for (gap, want) in gaps.iter().zip(expected) {
        let diff = if *gap > want { *gap - want } else { want - *gap };
        assert!(diff <= Duration::from_millis(50), "gap {gap:?}, expected {want:?}");
    }
}

#[tokio::test(start_paused = true)]
async fn test_cancellation_during_handler() {
    let h = harness();
    let message = provider_message();
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        trigger.cancel();
    });

    let result = h
        .middleware
        .execute_with_retry(&message, &HangingHandler, &cancel)
        .await;

    assert_eq!(result, Err(Cancelled));
    assert!(dead_letter(&h, &message).await.is_none());
    assert!(h.storage.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_already_cancelled_token_skips_handler() {
    let h = harness();
    let handler = FlakyHandler::new(vec![]);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let result = h
        .middleware
        .execute_with_retry(&provider_message(), &handler, &cancel)
        .await;

    assert_eq!(result, Err(Cancelled));
    assert_eq!(handler.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_reprocess_then_fail_again_merges_history() {
    let h = harness();
    let mut rx = h.bus.subscribe("provider-search-index").await;
    let handler = FlakyHandler::always(HandlerError::BusinessRule("provider suspended".into()));
    let message = provider_message();

    h.middleware
        .execute_with_retry(&message, &handler, &CancellationToken::new())
        .await
        .unwrap();
    h.store
        .reprocess_dead_letter_message(&message.source_queue, &message.id)
        .await
        .unwrap();
    assert!(dead_letter(&h, &message).await.is_none());

    let redelivered = rx.recv().await.unwrap();
    assert_eq!(redelivered.id, message.id);

    let handled = h
        .middleware
        .execute_with_retry(&redelivered, &handler, &CancellationToken::new())
        .await
        .unwrap();
    assert!(!handled);

    let record = dead_letter(&h, &message).await.unwrap();
    assert_eq!(record.attempt_count(), 2);
    assert_eq!(record.failure_history().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_statistics_over_concurrent_escalations() {
    let h = Arc::new(harness());
    let mut tasks = Vec::new();

    for i in 0..20 {
        let h = h.clone();
        tasks.push(tokio::spawn(async move {
            let queue = if i % 2 == 0 { "documents" } else { "catalogs" };
            let message = Message::new("upload", queue, serde_json::json!({ "i": i }));
            let handler = if i % 5 == 0 {
                FlakyHandler::always(HandlerError::ResourceExhausted("oom".into()))
            } else {
                FlakyHandler::always(HandlerError::MalformedInput("bad csv".into()))
            };
            h.middleware
                .execute_with_retry(&message, &handler, &CancellationToken::new())
                .await
        }));
    }
    for task in tasks {
        assert_eq!(task.await.unwrap(), Ok(false));
    }

    let stats = h.store.get_dead_letter_statistics().await.unwrap();
    assert_eq!(stats.total_messages, 20);
    assert_eq!(stats.by_queue["documents"], 10);
    assert_eq!(stats.by_queue["catalogs"], 10);
    assert_eq!(stats.by_error_type["ResourceExhaustedError"], 4);
    assert_eq!(stats.by_error_type["MalformedInputError"], 16);
    assert_eq!(stats.average_attempts, 1.0);
}

#[tokio::test(start_paused = true)]
async fn test_disabled_config_uses_noop_store() {
    let config = DeadLetterConfig {
        enabled: false,
        ..Default::default()
    };
    let store = marketplace_reliability::build_dead_letter_store(
        &config,
        Arc::new(InMemoryMessageBus::new()),
    );
    let middleware = RetryMiddleware::from_config(&config, store.clone());
    let handler = FlakyHandler::always(HandlerError::Validation("x".into()));
    let message = provider_message();

    let handled = middleware
        .execute_with_retry(&message, &handler, &CancellationToken::new())
        .await
        .unwrap();

    assert!(!handled);
    assert!(store
        .list_dead_letter_messages(&message.source_queue)
        .await
        .unwrap()
        .is_empty());
}

#[test]
fn test_record_round_trip_preserves_fields() {
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .start_paused(true)
        .build()
        .unwrap();

    rt.block_on(async {
        let h = harness();
        let handler = FlakyHandler::always(HandlerError::Timeout("x".into()));
        let message = provider_message();
        h.middleware
            .execute_with_retry(&message, &handler, &CancellationToken::new())
            .await
            .unwrap();

        let record = dead_letter(&h, &message).await.unwrap();
        let json = serde_json::to_string(&record).unwrap();
        let restored: FailedMessageInfo = serde_json::from_str(&json).unwrap();

        assert_eq!(restored.message_id(), record.message_id());
        assert_eq!(restored.message_type(), record.message_type());
        assert_eq!(restored.attempt_count(), record.attempt_count());
        assert_eq!(restored.failure_history().len(), record.failure_history().len());
        assert_eq!(restored, record);
    });
}
