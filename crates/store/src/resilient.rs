//! Failover composite over an ordered list of stores.
//!
//! Storage-tier outages are treated as expected, not exceptional: every
//! operation walks the backends in priority order, skips any backend inside
//! its cooldown window, and fails over on error. A failing backend is put on
//! cooldown so a known-bad dependency is not hammered, and self-heals once
//! the window passes — no external health-check loop required.

use std::future::Future;
use std::pin::Pin;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use courier_core::{MessageId, OutboxMessage};

use super::breaker::CooldownBreaker;
use super::r#trait::{Health, OutboxStore, OutboxStoreError};

/// Configuration for the failover composite.
#[derive(Debug, Clone)]
pub struct ResilientStoreConfig {
    /// How long a failing backend stays ineligible.
    pub cooldown: Duration,
}

impl Default for ResilientStoreConfig {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(30),
        }
    }
}

struct Backend {
    name: String,
    store: Box<dyn OutboxStore>,
    breaker: CooldownBreaker,
}

impl std::fmt::Debug for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Backend")
            .field("name", &self.name)
            .field("breaker", &self.breaker)
            .finish_non_exhaustive()
    }
}

type OpFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, OutboxStoreError>> + Send + 'a>>;

/// One `OutboxStore` facade over an ordered, prioritized list of stores
/// (typically durable-first, volatile-fallback).
///
/// Priority is construction order: the first backend added is tried first.
/// Cooldown state is owned by this instance — composing two resilient stores
/// over the same backends gives each its own view of backend health.
#[derive(Debug)]
pub struct ResilientOutboxStore {
    config: ResilientStoreConfig,
    backends: Vec<Backend>,
}

impl ResilientOutboxStore {
    pub fn new(config: ResilientStoreConfig) -> Self {
        Self {
            config,
            backends: Vec::new(),
        }
    }

    /// Append a backend at the lowest priority so far.
    pub fn with_backend(mut self, name: impl Into<String>, store: impl OutboxStore + 'static) -> Self {
        self.backends.push(Backend {
            name: name.into(),
            store: Box::new(store),
            breaker: CooldownBreaker::new(self.config.cooldown),
        });
        self
    }

    pub fn backend_names(&self) -> Vec<&str> {
        self.backends.iter().map(|b| b.name.as_str()).collect()
    }

    /// Walk the backends in priority order, skipping cooled-down ones and
    /// failing over on error. Exhausting the list is `NoStoreAvailable`.
    async fn run_over_backends<T, F>(
        &self,
        operation: &'static str,
        f: F,
    ) -> Result<T, OutboxStoreError>
    where
        F: for<'a> Fn(&'a dyn OutboxStore) -> OpFuture<'a, T>,
    {
        for backend in &self.backends {
            if !backend.breaker.try_acquire() {
                debug!(backend = %backend.name, operation, "skipping backend in cooldown");
                metrics::counter!(
                    "courier.store.skipped",
                    "backend" => backend.name.clone(),
                    "operation" => operation
                )
                .increment(1);
                continue;
            }

            let started = Instant::now();
            let result = f(backend.store.as_ref()).await;
            metrics::histogram!(
                "courier.store.duration_seconds",
                "backend" => backend.name.clone(),
                "operation" => operation
            )
            .record(started.elapsed().as_secs_f64());

            match result {
                Ok(value) => {
                    backend.breaker.reset();
                    metrics::counter!(
                        "courier.store.calls",
                        "backend" => backend.name.clone(),
                        "operation" => operation,
                        "outcome" => "ok"
                    )
                    .increment(1);
                    return Ok(value);
                }
                Err(e) => {
                    warn!(backend = %backend.name, operation, error = %e, "backend failed, failing over");
                    metrics::counter!(
                        "courier.store.calls",
                        "backend" => backend.name.clone(),
                        "operation" => operation,
                        "outcome" => "error"
                    )
                    .increment(1);
                    backend.breaker.trip(&backend.name);
                }
            }
        }

        Err(OutboxStoreError::NoStoreAvailable)
    }
}

#[async_trait]
impl OutboxStore for ResilientOutboxStore {
    async fn save(&self, msg: OutboxMessage) -> Result<(), OutboxStoreError> {
        self.run_over_backends("save", |store| {
            let msg = msg.clone();
            Box::pin(async move { store.save(msg).await })
        })
        .await
    }

    async fn delete(&self, id: MessageId) -> Result<(), OutboxStoreError> {
        self.run_over_backends("delete", move |store| {
            Box::pin(async move { store.delete(id).await })
        })
        .await
    }

    async fn poll_next_due(&self) -> Result<Option<OutboxMessage>, OutboxStoreError> {
        self.run_over_backends("poll_next_due", |store| {
            Box::pin(async move { store.poll_next_due().await })
        })
        .await
    }

    async fn poll_batch(&self, batch_size: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        self.run_over_backends("poll_batch", move |store| {
            Box::pin(async move { store.poll_batch(batch_size).await })
        })
        .await
    }

    /// Up while at least one backend is up — the failover intent is that the
    /// system still functions on a degraded path. Breaker state does not
    /// mask the probe.
    async fn health(&self) -> Health {
        for backend in &self.backends {
            if backend.store.health().await.is_up() {
                return Health::Up;
            }
        }
        Health::Down
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::in_memory::{InMemoryOutboxStore, InMemoryStoreConfig};
    use chrono::Utc;
    use courier_core::Channel;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Backend that fails every call and counts how often it was reached.
    #[derive(Debug, Default)]
    struct FailingStore {
        calls: AtomicUsize,
    }

    impl FailingStore {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }

        fn fail<T>(&self) -> Result<T, OutboxStoreError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(OutboxStoreError::backend("simulated outage"))
        }
    }

    #[async_trait]
    impl OutboxStore for FailingStore {
        async fn save(&self, _msg: OutboxMessage) -> Result<(), OutboxStoreError> {
            self.fail()
        }

        async fn delete(&self, _id: MessageId) -> Result<(), OutboxStoreError> {
            self.fail()
        }

        async fn poll_next_due(&self) -> Result<Option<OutboxMessage>, OutboxStoreError> {
            self.fail()
        }

        async fn poll_batch(&self, _n: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
            self.fail()
        }

        async fn health(&self) -> Health {
            Health::Down
        }
    }

    fn message() -> OutboxMessage {
        OutboxMessage::new(Channel::Email, "a@b.test", "s", "b", Utc::now())
    }

    fn composite(
        cooldown: Duration,
        primary: Arc<FailingStore>,
    ) -> (ResilientOutboxStore, Arc<InMemoryOutboxStore>) {
        let fallback = Arc::new(InMemoryOutboxStore::new(InMemoryStoreConfig::default()));
        let store = ResilientOutboxStore::new(ResilientStoreConfig { cooldown })
            .with_backend("primary", primary)
            .with_backend("fallback", fallback.clone());
        (store, fallback)
    }

    #[tokio::test]
    async fn fails_over_to_next_backend() {
        let primary = Arc::new(FailingStore::default());
        let (store, _fallback) = composite(Duration::from_secs(60), primary.clone());

        let msg = message();
        let id = msg.id;
        store.save(msg).await.unwrap();

        let polled = store.poll_next_due().await.unwrap().unwrap();
        assert_eq!(polled.id, id);
    }

    #[tokio::test]
    async fn failing_backend_is_not_retried_during_cooldown() {
        let primary = Arc::new(FailingStore::default());
        let (store, _fallback) = composite(Duration::from_secs(60), primary.clone());

        store.save(message()).await.unwrap();
        assert_eq!(primary.calls(), 1);

        // Cooling down: subsequent operations must go straight to the fallback.
        store.save(message()).await.unwrap();
        store.poll_next_due().await.unwrap();
        assert_eq!(primary.calls(), 1);
    }

    #[tokio::test]
    async fn backend_becomes_eligible_after_cooldown() {
        let primary = Arc::new(FailingStore::default());
        let (store, _fallback) = composite(Duration::from_millis(20), primary.clone());

        store.save(message()).await.unwrap();
        assert_eq!(primary.calls(), 1);

        tokio::time::sleep(Duration::from_millis(30)).await;
        store.save(message()).await.unwrap();
        assert_eq!(primary.calls(), 2);
    }

    #[tokio::test]
    async fn all_backends_failing_is_no_store_available() {
        let store = ResilientOutboxStore::new(ResilientStoreConfig::default())
            .with_backend("a", Arc::new(FailingStore::default()))
            .with_backend("b", Arc::new(FailingStore::default()));

        let err = store.save(message()).await.unwrap_err();
        assert!(err.is_no_store_available());

        // And while both are cooling down the answer is the same.
        let err = store.poll_next_due().await.unwrap_err();
        assert!(err.is_no_store_available());
    }

    #[tokio::test]
    async fn empty_composite_is_no_store_available() {
        let store = ResilientOutboxStore::new(ResilientStoreConfig::default());
        let err = store.delete(MessageId::new()).await.unwrap_err();
        assert!(err.is_no_store_available());
    }

    #[tokio::test]
    async fn health_is_up_while_any_backend_is_up() {
        let primary = Arc::new(FailingStore::default());
        let (store, _fallback) = composite(Duration::from_secs(60), primary);
        assert_eq!(store.health().await, Health::Up);

        let all_down = ResilientOutboxStore::new(ResilientStoreConfig::default())
            .with_backend("a", Arc::new(FailingStore::default()));
        assert_eq!(all_down.health().await, Health::Down);
    }

    #[tokio::test]
    async fn saved_message_survives_primary_outage_and_recovery() {
        let primary = Arc::new(FailingStore::default());
        let (store, fallback) = composite(Duration::from_secs(60), primary);

        let msg = message();
        let id = msg.id;
        store.save(msg).await.unwrap();

        // The write landed on the fallback tier.
        assert_eq!(fallback.len(), 1);
        assert_eq!(store.poll_next_due().await.unwrap().unwrap().id, id);
        assert!(store.poll_next_due().await.unwrap().is_none());
    }
}
