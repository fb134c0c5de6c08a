//! Consumer host: one task per in-flight message, bounded by a semaphore.

use marketplace_reliability::{InMemoryMessageBus, Message, MessageHandler, RetryMiddleware};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Semaphore, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Counters over the lifetime of a host.
#[derive(Debug, Default)]
pub struct HostStats {
    handled: AtomicU64,
    dead_lettered: AtomicU64,
    cancelled: AtomicU64,
}

/// Point-in-time copy of [`HostStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct HostStatsSnapshot {
    /// Messages handled successfully.
    pub handled: u64,
    /// Messages sent to the dead-letter store.
    pub dead_lettered: u64,
    /// Messages abandoned on shutdown.
    pub cancelled: u64,
}

impl HostStats {
    /// Reads the current counters.
    pub fn snapshot(&self) -> HostStatsSnapshot {
        HostStatsSnapshot {
            handled: self.handled.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

/// Consumes queues from the bus and runs each message through the retry middleware.
pub struct ConsumerHost {
    bus: Arc<InMemoryMessageBus>,
    middleware: Arc<RetryMiddleware>,
    handlers: HashMap<String, Arc<dyn MessageHandler>>,
    permits: Arc<Semaphore>,
    stats: Arc<HostStats>,
}

impl ConsumerHost {
    /// Creates a host allowing `max_concurrent` in-flight messages (at least one).
    pub fn new(
        bus: Arc<InMemoryMessageBus>,
        middleware: Arc<RetryMiddleware>,
        max_concurrent: usize,
    ) -> Self {
        Self {
            bus,
            middleware,
            handlers: HashMap::new(),
            permits: Arc::new(Semaphore::new(max_concurrent.max(1))),
            stats: Arc::new(HostStats::default()),
        }
    }

    /// Registers the handler for a queue, replacing any previous one.
    pub fn register(&mut self, queue: impl Into<String>, handler: Arc<dyn MessageHandler>) {
        self.handlers.insert(queue.into(), handler);
    }

    /// Shared counters, readable while the host runs.
    pub fn stats(&self) -> Arc<HostStats> {
        self.stats.clone()
    }

    /// Subscribes every registered queue and spawns the dispatchers.
    ///
    /// Messages published after this returns are consumed. The handle
    /// resolves once `shutdown` fires and in-flight messages have finished;
    /// in-flight handlers share the shutdown token, so they observe
    /// cancellation and are neither retried nor dead-lettered. Messages
    /// received but not yet dispatched count as cancelled too.
    pub async fn start(self, shutdown: CancellationToken) -> JoinHandle<HostStatsSnapshot> {
        let mut dispatchers = JoinSet::new();

        for (queue, handler) in &self.handlers {
            let rx = self.bus.subscribe(queue).await;
            info!(queue = %queue, handler = handler.name(), "Consuming queue");
            dispatchers.spawn(dispatch_queue(
                queue.clone(),
                rx,
                handler.clone(),
                self.middleware.clone(),
                self.permits.clone(),
                self.stats.clone(),
                shutdown.clone(),
            ));
        }

        let stats = self.stats.clone();
        tokio::spawn(async move {
            while let Some(result) = dispatchers.join_next().await {
                if let Err(e) = result {
                    warn!(error = %e, "Queue dispatcher panicked");
                }
            }

            let snapshot = stats.snapshot();
            info!(
                handled = snapshot.handled,
                dead_lettered = snapshot.dead_lettered,
                cancelled = snapshot.cancelled,
                "Consumer host stopped"
            );
            snapshot
        })
    }

    /// Runs until `shutdown` fires, then waits for in-flight messages.
    pub async fn run(self, shutdown: CancellationToken) -> HostStatsSnapshot {
        let stats = self.stats.clone();
        match self.start(shutdown).await.await {
            Ok(snapshot) => snapshot,
            Err(e) => {
                warn!(error = %e, "Consumer host task failed");
                stats.snapshot()
            }
        }
    }
}

async fn dispatch_queue(
    queue: String,
    mut rx: mpsc::UnboundedReceiver<Message>,
    handler: Arc<dyn MessageHandler>,
    middleware: Arc<RetryMiddleware>,
    permits: Arc<Semaphore>,
    stats: Arc<HostStats>,
    shutdown: CancellationToken,
) {
    let mut in_flight = JoinSet::new();

    loop {
        let message = tokio::select! {
            biased;

            _ = shutdown.cancelled() => break,

            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let permit = tokio::select! {
            biased;

            _ = shutdown.cancelled() => {
                abandon(&queue, &message, &stats);
                break;
            }

            permit = permits.clone().acquire_owned() => match permit {
                Ok(permit) => permit,
                Err(_) => {
                    abandon(&queue, &message, &stats);
                    break;
                }
            },
        };

        let handler = handler.clone();
        let middleware = middleware.clone();
        let stats = stats.clone();
        let cancel = shutdown.clone();
        in_flight.spawn(async move {
            let _permit = permit;
            match middleware
                .execute_with_retry(&message, handler.as_ref(), &cancel)
                .await
            {
                Ok(true) => stats.handled.fetch_add(1, Ordering::Relaxed),
                Ok(false) => stats.dead_lettered.fetch_add(1, Ordering::Relaxed),
                Err(_) => {
                    debug!(message_id = %message.id, "Message abandoned on shutdown");
                    stats.cancelled.fetch_add(1, Ordering::Relaxed)
                }
            };
        });

        // Reap finished tasks so the set does not grow unbounded
        while in_flight.try_join_next().is_some() {}
    }

    // Undispatched messages are abandoned, like in-flight ones
    rx.close();
    while let Ok(message) = rx.try_recv() {
        abandon(&queue, &message, &stats);
    }

    while in_flight.join_next().await.is_some() {}
    debug!(queue = %queue, "Queue dispatcher stopped");
}

fn abandon(queue: &str, message: &Message, stats: &HostStats) {
    debug!(queue, message_id = %message.id, "Message not dispatched before shutdown");
    stats.cancelled.fetch_add(1, Ordering::Relaxed);
}
