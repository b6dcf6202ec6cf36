//! Notification sender port.
//!
//! The transport (SMTP client, SMS gateway, push service) lives outside this
//! core; the processor only sees this trait.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::message::{Channel, OutboxMessage};

/// A single delivery request handed to the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub channel: Channel,
    pub to: String,
    pub subject: String,
    pub message: String,
}

impl From<&OutboxMessage> for NotificationRequest {
    fn from(msg: &OutboxMessage) -> Self {
        Self {
            channel: msg.channel,
            to: msg.recipient.clone(),
            subject: msg.subject.clone(),
            message: msg.body.clone(),
        }
    }
}

/// Outcome of a delivery attempt that completed without a transport error.
///
/// `NotDelivered` is the provider's structured "accepted the call, did not
/// deliver" signal (e.g. a rejected recipient). It is distinct from
/// `SenderError`, which represents the call itself failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    NotDelivered,
}

/// Transport-level failure from the sender.
#[derive(Debug, Error)]
pub enum SenderError {
    /// The provider was unreachable or errored mid-call.
    #[error("provider error: {0}")]
    Provider(String),

    /// The request could not be handed to the provider at all.
    #[error("transport error: {0}")]
    Transport(#[source] anyhow::Error),
}

impl SenderError {
    pub fn provider(msg: impl Into<String>) -> Self {
        Self::Provider(msg.into())
    }
}

/// Channel-specific delivery transport.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(&self, request: NotificationRequest) -> Result<DeliveryOutcome, SenderError>;
}

#[async_trait]
impl<S> NotificationSender for std::sync::Arc<S>
where
    S: NotificationSender + ?Sized,
{
    async fn send(&self, request: NotificationRequest) -> Result<DeliveryOutcome, SenderError> {
        (**self).send(request).await
    }
}
