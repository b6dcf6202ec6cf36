//! The outbox message: the durable unit of deferred delivery work.

use core::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of an outbox message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Create a new identifier.
    ///
    /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
    /// for determinism.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Display for MessageId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

impl From<Uuid> for MessageId {
    fn from(value: Uuid) -> Self {
        Self(value)
    }
}

impl From<MessageId> for Uuid {
    fn from(value: MessageId) -> Self {
        value.0
    }
}

impl FromStr for MessageId {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uuid = Uuid::from_str(s)
            .map_err(|e| DomainError::invalid_id(format!("MessageId: {e}")))?;
        Ok(Self(uuid))
    }
}

/// Delivery channel. Closed set; not extensible at runtime.
///
/// Recipient semantics are owned by the channel: an email address for
/// `Email`, a phone number for `Sms`, a device token for `Push`.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    Email,
    Sms,
    Push,
}

impl Channel {
    pub fn as_str(&self) -> &'static str {
        match self {
            Channel::Email => "email",
            Channel::Sms => "sms",
            Channel::Push => "push",
        }
    }
}

impl core::fmt::Display for Channel {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification waiting to be delivered.
///
/// Lifecycle: created by a producer, saved into a store, becomes due at
/// `next_attempt_at`, polled by the processor, then either deleted (delivery
/// succeeded) or nacked — `attempts + 1`, `next_attempt_at` pushed out by the
/// backoff policy — and re-saved. The cycle repeats until the message is
/// deleted; no attempt ceiling is enforced here.
///
/// Invariants:
/// - `attempts` increases by exactly 1 per nack and never decreases.
/// - `next_attempt_at` is monotonically non-decreasing across nacks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    /// Unique message ID, generated at creation.
    pub id: MessageId,
    /// Destination address; opaque to this core.
    pub recipient: String,
    /// Subject line (channel-dependent; may be empty for SMS).
    pub subject: String,
    /// Message content.
    pub body: String,
    /// Delivery channel.
    pub channel: Channel,
    /// Count of prior delivery failures. Starts at 0.
    pub attempts: u32,
    /// The message must not be redelivered before this instant. Due/sort key.
    pub next_attempt_at: DateTime<Utc>,
}

impl OutboxMessage {
    /// Create a message that is due immediately.
    pub fn new(
        channel: Channel,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: MessageId::new(),
            recipient: recipient.into(),
            subject: subject.into(),
            body: body.into(),
            channel,
            attempts: 0,
            next_attempt_at: now,
        }
    }

    /// Defer the first delivery attempt to a later instant.
    pub fn due_at(mut self, at: DateTime<Utc>) -> Self {
        self.next_attempt_at = at;
        self
    }

    /// Whether the message is eligible for a delivery attempt.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at <= now
    }
}
