//! Dead Letter Queue for Failed Messages
//!
//! Quarantines messages that exhausted their retries:
//! - Failure records with full attempt history
//! - Listing, reprocessing, and purging
//! - Retention sweep
//! - Statistics by queue and error type

mod record;
mod stats;
mod storage;
mod store;

pub use record::{EnvironmentMetadata, FailedMessageInfo, FailureAttempt};
pub use stats::DeadLetterStatistics;
pub use storage::{DeadLetterStorage, InMemoryDeadLetterStorage};
pub use store::{
    BrokerDeadLetterStore, DeadLetterListing, DeadLetterStore, NoOpDeadLetterStore,
    build_dead_letter_store,
};
