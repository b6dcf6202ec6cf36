//! `courier-processor` — the consumer side of the outbox.
//!
//! [`OutboxProcessor`] drives one store → sender → store cycle per
//! invocation; [`ProcessorRunner`] wraps it in a periodic tokio task for
//! deployments without an external scheduler.

pub mod processor;
pub mod runner;

pub use processor::OutboxProcessor;
pub use runner::{ProcessorConfig, ProcessorHandle, ProcessorRunner, ProcessorStats};
