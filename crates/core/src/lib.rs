//! `courier-core` — domain foundation for deferred notification delivery.
//!
//! This crate contains **pure domain** primitives (no storage or transport
//! concerns): the outbox message itself, the backoff policy applied on each
//! failed delivery, and the ports (clock, notification sender) the delivery
//! pipeline consumes.

pub mod backoff;
pub mod clock;
pub mod error;
pub mod message;
pub mod sender;

pub use backoff::BackoffPolicy;
pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use message::{Channel, MessageId, OutboxMessage};
pub use sender::{DeliveryOutcome, NotificationRequest, NotificationSender, SenderError};
