//! # Marketplace Reliability
//!
//! Message delivery reliability layer for the marketplace consumers:
//! - Failure classification (transient, permanent, critical, unknown)
//! - Retry policy with bounded exponential backoff
//! - Retry middleware with cooperative cancellation
//! - Dead-letter store with list, reprocess, purge, and statistics
//!
//! ## Example
//!
//! ```rust,ignore
//! use marketplace_reliability::{
//!     DeadLetterConfig, InMemoryMessageBus, Message, RetryMiddleware, build_dead_letter_store,
//! };
//! use tokio_util::sync::CancellationToken;
//!
//! let config = DeadLetterConfig::default();
//! let bus = Arc::new(InMemoryMessageBus::new());
//! let store = build_dead_letter_store(&config, bus);
//! let middleware = RetryMiddleware::from_config(&config, store);
//!
//! let message = Message::new("provider.registered", "providers", payload);
//! let handled = middleware
//!     .execute_with_retry(&message, &handler, &CancellationToken::new())
//!     .await?;
//! ```

mod bus;
mod classifier;
mod config;
mod error;
mod handler;
mod message;
mod middleware;
mod notify;
mod policy;
pub mod dlq;

pub use bus::{InMemoryMessageBus, MessagePublisher};
pub use classifier::{FailureClassifier, FailureType};
pub use config::{
    ConfigError, DeadLetterConfig, MAX_DEAD_LETTER_TTL_HOURS, MAX_RETRY_DELAY_LIMIT_SECONDS,
};
pub use error::{Cancelled, ErrorKind, HandlerError, ReliabilityError, ReliabilityResult};
pub use handler::{FnHandler, HandlerFuture, MessageHandler};
pub use message::Message;
pub use middleware::{RetryContext, RetryMiddleware};
pub use notify::{AdminNotifier, TracingNotifier};
pub use policy::RetryPolicy;
pub use dlq::{
    BrokerDeadLetterStore, DeadLetterListing, DeadLetterStatistics, DeadLetterStorage,
    DeadLetterStore, EnvironmentMetadata, FailedMessageInfo, FailureAttempt,
    InMemoryDeadLetterStorage, NoOpDeadLetterStore, build_dead_letter_store,
};

/// Header names set on republished messages.
pub mod headers {
    /// Number of times the message was reprocessed from the dead-letter queue.
    pub const REPROCESS_COUNT: &str = "x-reprocess-count";
}
