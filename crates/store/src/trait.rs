//! The outbox store contract: operations, health probe, and error kinds.

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

use courier_core::{MessageId, OutboxMessage};

/// Store liveness.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Health {
    Up,
    Down,
}

impl Health {
    pub fn is_up(&self) -> bool {
        matches!(self, Health::Up)
    }
}

/// Outbox store operation error.
///
/// These are **infrastructure errors**. Malformed messages are a producer
/// concern and are assumed validated before `save` is called.
#[derive(Debug, Error)]
pub enum OutboxStoreError {
    /// A single backend failed the operation.
    #[error("store backend error: {0}")]
    Backend(String),

    /// Every backend in a composite was cooling down or failed.
    ///
    /// Callers of `save` must treat this as "the write did not durably land
    /// anywhere", not as an ignorable hiccup.
    #[error("no outbox store available")]
    NoStoreAvailable,
}

impl OutboxStoreError {
    pub fn backend(msg: impl Into<String>) -> Self {
        Self::Backend(msg.into())
    }

    pub fn is_no_store_available(&self) -> bool {
        matches!(self, Self::NoStoreAvailable)
    }
}

/// Durable holding area for notifications awaiting delivery.
///
/// ## Claim semantics
///
/// `poll_next_due` / `poll_batch` claim **and remove** due messages: a polled
/// message is owned by the caller and is no longer visible to other pollers.
/// Implementations must guarantee at-most-one active claim per message id —
/// two concurrent pollers never receive the same message. The processor
/// re-`save`s a message on delivery failure and `delete`s on success (a
/// no-op for stores that already removed at claim time, kept for backends
/// that claim without removal).
///
/// ## Ordering
///
/// No ordering is guaranteed across different messages beyond "due time has
/// passed". Batches return fewer than requested when fewer are due and never
/// block waiting for more to become due.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Upsert a message by id. Must not lose a message that was already due.
    async fn save(&self, msg: OutboxMessage) -> Result<(), OutboxStoreError>;

    /// Remove a message. Deleting an absent id is a no-op, not an error.
    async fn delete(&self, id: MessageId) -> Result<(), OutboxStoreError>;

    /// Claim and remove one due message, if any.
    async fn poll_next_due(&self) -> Result<Option<OutboxMessage>, OutboxStoreError>;

    /// Claim and remove up to `batch_size` due messages.
    async fn poll_batch(&self, batch_size: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError>;

    /// Cheap liveness probe. `Down` must not block and never errors.
    async fn health(&self) -> Health;
}

#[async_trait]
impl<S> OutboxStore for Arc<S>
where
    S: OutboxStore + ?Sized,
{
    async fn save(&self, msg: OutboxMessage) -> Result<(), OutboxStoreError> {
        (**self).save(msg).await
    }

    async fn delete(&self, id: MessageId) -> Result<(), OutboxStoreError> {
        (**self).delete(id).await
    }

    async fn poll_next_due(&self) -> Result<Option<OutboxMessage>, OutboxStoreError> {
        (**self).poll_next_due().await
    }

    async fn poll_batch(&self, batch_size: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        (**self).poll_batch(batch_size).await
    }

    async fn health(&self) -> Health {
        (**self).health().await
    }
}
