//! Message handler trait and adapters.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::error::HandlerError;
use crate::message::Message;

/// Boxed future returned by function handlers.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send>>;

/// Trait for business message handlers.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Name recorded as `handlerType` in the failure history.
    fn name(&self) -> &str {
        "anonymous"
    }

    /// Handles a message. Long-running handlers should watch `cancel`
    /// and return [`HandlerError::Cancelled`] when it fires.
    async fn handle(&self, message: &Message, cancel: &CancellationToken)
        -> Result<(), HandlerError>;
}

/// Wrapper for function-based handlers.
pub struct FnHandler<F>
where
    F: Fn(Message, CancellationToken) -> HandlerFuture + Send + Sync,
{
    name: String,
    handler: F,
}

impl<F> FnHandler<F>
where
    F: Fn(Message, CancellationToken) -> HandlerFuture + Send + Sync,
{
    /// Creates a new function handler.
    pub fn new(name: impl Into<String>, handler: F) -> Self {
        Self {
            name: name.into(),
            handler,
        }
    }
}

#[async_trait]
impl<F> MessageHandler for FnHandler<F>
where
    F: Fn(Message, CancellationToken) -> HandlerFuture + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        (self.handler)(message.clone(), cancel.clone()).await
    }
}

#[async_trait]
impl<H: MessageHandler + ?Sized> MessageHandler for Arc<H> {
    fn name(&self) -> &str {
        (**self).name()
    }

    async fn handle(
        &self,
        message: &Message,
        cancel: &CancellationToken,
    ) -> Result<(), HandlerError> {
        (**self).handle(message, cancel).await
    }
}
