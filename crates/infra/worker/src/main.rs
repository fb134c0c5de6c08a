//! Marketplace worker binary.

use async_trait::async_trait;
use marketplace_reliability::{
    HandlerError, InMemoryMessageBus, Message, MessageHandler, RetryMiddleware,
    build_dead_letter_store,
};
use marketplace_worker::{AppConfig, ConsumerHost, init_tracing, load_config, run_retention_sweep};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Acknowledges every message. Stands in until business handlers are registered.
struct AckHandler;

#[async_trait]
impl MessageHandler for AckHandler {
    fn name(&self) -> &str {
        "AckHandler"
    }

    async fn handle(&self, message: &Message, _cancel: &CancellationToken) -> Result<(), HandlerError> {
        tracing::info!(
            message_id = %message.id,
            message_type = %message.message_type,
            queue = %message.source_queue,
            "Message acknowledged"
        );
        Ok(())
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = match std::env::args().nth(1) {
        Some(path) => load_config(&path)?,
        None => AppConfig::default(),
    };

    init_tracing(&config.worker.log_filter);
    tracing::info!(
        environment = %config.dead_letter.environment_name,
        dead_letter_enabled = config.dead_letter.enabled,
        queues = config.worker.queues.len(),
        "Starting marketplace worker"
    );

    let bus = Arc::new(InMemoryMessageBus::new());
    let store = build_dead_letter_store(&config.dead_letter, bus.clone());
    let middleware = Arc::new(RetryMiddleware::from_config(&config.dead_letter, store.clone()));

    let mut host = ConsumerHost::new(bus, middleware, config.worker.max_concurrent_messages);
    let handler: Arc<dyn MessageHandler> = Arc::new(AckHandler);
    for queue in &config.worker.queues {
        host.register(queue.clone(), handler.clone());
    }

    let shutdown = CancellationToken::new();
    let sweep = tokio::spawn(run_retention_sweep(
        store,
        Duration::from_secs(config.worker.retention_sweep_interval_seconds.max(1)),
        shutdown.clone(),
    ));
    let consumer = tokio::spawn(host.run(shutdown.clone()));

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown requested");
    shutdown.cancel();

    consumer.await?;
    sweep.await?;
    Ok(())
}
