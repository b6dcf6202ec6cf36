//! `courier-store` — persistence backends for the outbox.
//!
//! Three implementations of one contract:
//!
//! - [`InMemoryOutboxStore`]: process-local, due-times indexed by a min-heap.
//!   No durability across restart; a fallback tier or low-stakes option.
//! - [`PostgresOutboxStore`]: crash-durable, claim-exclusive across processes
//!   via row locking.
//! - [`ResilientOutboxStore`]: priority-ordered failover composite with a
//!   per-backend cooldown breaker.

pub mod breaker;
pub mod in_memory;
pub mod postgres;
pub mod resilient;
mod r#trait;

pub use breaker::CooldownBreaker;
pub use in_memory::{InMemoryOutboxStore, InMemoryStoreConfig};
pub use postgres::PostgresOutboxStore;
pub use resilient::{ResilientOutboxStore, ResilientStoreConfig};
pub use r#trait::{Health, OutboxStore, OutboxStoreError};
