//! Error types for message handling and dead-letter management.

use thiserror::Error;

/// Result type for dead-letter and publish operations.
pub type ReliabilityResult<T> = Result<T, ReliabilityError>;

/// Error category used by the failure classifier.
///
/// Categories are coarser than [`HandlerError`] variants so that new
/// variants can reuse an existing classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Operation did not finish in time.
    Timeout,
    /// Network or broker transport failure.
    Transport,
    /// A downstream service is temporarily unavailable.
    DependencyUnavailable,
    /// Payload could not be decoded.
    MalformedInput,
    /// Payload decoded but failed validation.
    Validation,
    /// A business rule rejected the message.
    BusinessRule,
    /// Memory, disk, or quota exhaustion.
    ResourceExhausted,
    /// Anything without a dedicated category.
    Other,
}

/// Error returned by a message handler.
#[derive(Debug, Clone, Error)]
pub enum HandlerError {
    /// Handler timed out.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Transport-level failure.
    #[error("Transport error: {0}")]
    Transport(String),

    /// External dependency temporarily unavailable.
    #[error("Dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// Payload could not be deserialized.
    #[error("Malformed message: {0}")]
    MalformedInput(String),

    /// Payload failed validation.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Business rule violation.
    #[error("Business rule violated: {0}")]
    BusinessRule(String),

    /// Out of memory, disk, or quota.
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Error from a handler-specific source.
    #[error("{type_name}: {message}")]
    Other {
        /// Type name reported in the failure history.
        type_name: String,
        /// Human-readable message.
        message: String,
    },

    /// The handler observed cancellation and stopped.
    #[error("Handler cancelled")]
    Cancelled,
}

impl HandlerError {
    /// Creates an error with a custom type name.
    pub fn other(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        HandlerError::Other {
            type_name: type_name.into(),
            message: message.into(),
        }
    }

    /// Returns the classifier category of this error.
    ///
    /// Cancellation maps to [`ErrorKind::Other`] but is never passed to the
    /// classifier by the middleware.
    pub fn kind(&self) -> ErrorKind {
        match self {
            HandlerError::Timeout(_) => ErrorKind::Timeout,
            HandlerError::Transport(_) => ErrorKind::Transport,
            HandlerError::DependencyUnavailable(_) => ErrorKind::DependencyUnavailable,
            HandlerError::MalformedInput(_) => ErrorKind::MalformedInput,
            HandlerError::Validation(_) => ErrorKind::Validation,
            HandlerError::BusinessRule(_) => ErrorKind::BusinessRule,
            HandlerError::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            HandlerError::Other { .. } | HandlerError::Cancelled => ErrorKind::Other,
        }
    }

    /// Stable type name recorded as `exceptionType` in the failure history.
    pub fn type_name(&self) -> &str {
        match self {
            HandlerError::Timeout(_) => "TimeoutError",
            HandlerError::Transport(_) => "TransportError",
            HandlerError::DependencyUnavailable(_) => "DependencyUnavailableError",
            HandlerError::MalformedInput(_) => "MalformedInputError",
            HandlerError::Validation(_) => "ValidationError",
            HandlerError::BusinessRule(_) => "BusinessRuleError",
            HandlerError::ResourceExhausted(_) => "ResourceExhaustedError",
            HandlerError::Other { type_name, .. } => type_name,
            HandlerError::Cancelled => "Cancelled",
        }
    }

    /// Returns true if this error signals cancellation rather than failure.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, HandlerError::Cancelled)
    }
}

impl From<serde_json::Error> for HandlerError {
    fn from(err: serde_json::Error) -> Self {
        HandlerError::MalformedInput(err.to_string())
    }
}

/// Returned by the retry middleware when the caller's token fired.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("Message processing cancelled")]
pub struct Cancelled;

/// Error type for dead-letter administration and publishing.
#[derive(Debug, Error)]
pub enum ReliabilityError {
    /// No dead-letter record with this id in the queue.
    #[error("Dead letter {message_id} not found in queue {queue}")]
    NotFound {
        /// Queue that was searched.
        queue: String,
        /// Message id that was requested.
        message_id: String,
    },

    /// Republishing to the bus failed.
    #[error("Publish failed: {0}")]
    Publish(String),

    /// Storage backend failure.
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization/deserialization failure.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Publishing was cancelled.
    #[error("Operation cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for ReliabilityError {
    fn from(err: serde_json::Error) -> Self {
        ReliabilityError::Serialization(err.to_string())
    }
}

impl From<Cancelled> for ReliabilityError {
    fn from(_: Cancelled) -> Self {
        ReliabilityError::Cancelled
    }
}
