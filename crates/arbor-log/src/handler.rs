//! The consumer of committed messages.

use arbor_core::{Message, MessageId, Signature};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

/// A handler refused a committed message. The message stays in the log.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{reason}")]
pub struct ApplyError {
    pub reason: String,
}

impl ApplyError {
    pub fn new(reason: impl Into<String>) -> Self {
        ApplyError { reason: reason.into() }
    }
}

/// Receives every committed message exactly once per log instance, parents
/// before children, while the log's write lock is held.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    type Output: Send;

    async fn apply(
        &self,
        id: &MessageId,
        signature: Option<&Signature>,
        message: &Message,
    ) -> Result<Self::Output, ApplyError>;

    /// A message was held because some of its parents are missing.
    fn queued(&self, _id: &MessageId) {}
}

#[async_trait]
impl<H: MessageHandler> MessageHandler for Arc<H> {
    type Output = H::Output;

    async fn apply(
        &self,
        id: &MessageId,
        signature: Option<&Signature>,
        message: &Message,
    ) -> Result<Self::Output, ApplyError> {
        (**self).apply(id, signature, message).await
    }

    fn queued(&self, id: &MessageId) {
        (**self).queued(id)
    }
}

/// Accepts every message and produces nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopHandler;

#[async_trait]
impl MessageHandler for NoopHandler {
    type Output = ();

    async fn apply(&self, _: &MessageId, _: Option<&Signature>, _: &Message) -> Result<(), ApplyError> {
        Ok(())
    }
}
