//! In-memory outbox store.
//!
//! Messages live in a map keyed by id; due times are indexed by a min-heap
//! polled directly against the injected clock. Heap entries are invalidated
//! lazily: an entry is stale when its message is gone or has been re-saved
//! with a different due time, and stale entries are discarded as they surface.
//! No timer thread, and `delete` only removes — draining due work is solely
//! `poll_next_due`'s job.
//!
//! Not durable across restart. Suitable as a fallback tier behind a durable
//! store, or for low-stakes notifications.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use courier_core::{Clock, MessageId, OutboxMessage, SystemClock};

use super::r#trait::{Health, OutboxStore, OutboxStoreError};

const STORE_NAME: &str = "in_memory";

/// Configuration for the in-memory tier.
#[derive(Debug, Clone)]
pub struct InMemoryStoreConfig {
    /// Maximum number of messages held. At capacity, saving a new id keeps
    /// whichever candidate set has the soonest due times: the furthest-due
    /// of the stored entries and the newcomer is the one shed.
    pub capacity: usize,
    /// Emit a warning when a poll observes more due messages than this
    /// (signal of a stalled consumer).
    pub due_warn_threshold: usize,
}

impl Default for InMemoryStoreConfig {
    fn default() -> Self {
        Self {
            capacity: 10_000,
            due_warn_threshold: 1_000,
        }
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct DueKey {
    at: DateTime<Utc>,
    id: MessageId,
}

#[derive(Debug, Default)]
struct Inner {
    messages: HashMap<MessageId, OutboxMessage>,
    due_index: BinaryHeap<Reverse<DueKey>>,
}

impl Inner {
    /// Whether a heap entry still describes the live message.
    fn is_current(&self, key: &DueKey) -> bool {
        self.messages
            .get(&key.id)
            .is_some_and(|m| m.next_attempt_at == key.at)
    }

    fn due_backlog(&self, now: DateTime<Utc>) -> usize {
        self.messages.values().filter(|m| m.is_due(now)).count()
    }
}

/// Process-local outbox store.
#[derive(Debug)]
pub struct InMemoryOutboxStore<C: Clock = SystemClock> {
    config: InMemoryStoreConfig,
    clock: C,
    inner: RwLock<Inner>,
}

impl InMemoryOutboxStore<SystemClock> {
    pub fn new(config: InMemoryStoreConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl Default for InMemoryOutboxStore<SystemClock> {
    fn default() -> Self {
        Self::new(InMemoryStoreConfig::default())
    }
}

impl<C: Clock> InMemoryOutboxStore<C> {
    pub fn with_clock(config: InMemoryStoreConfig, clock: C) -> Self {
        Self {
            config,
            clock,
            inner: RwLock::new(Inner::default()),
        }
    }

    /// Number of messages currently held (due or not).
    pub fn len(&self) -> usize {
        self.inner.read().expect("store lock poisoned").messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn record_pending_gauge(count: usize) {
        metrics::gauge!("courier.store.pending", "store" => STORE_NAME).set(count as f64);
    }

    /// Make room for an incoming message, keeping the soonest deliverable
    /// work. The incoming message competes in the furthest-due comparison:
    /// if it loses, it is dropped and nothing stored is evicted, so a full
    /// store never sheds already-due work for a far-future newcomer.
    ///
    /// Returns whether the incoming message may be inserted. An evicted
    /// entry's heap entry is left behind and discarded lazily.
    fn make_room(inner: &mut Inner, incoming: &OutboxMessage) -> bool {
        let victim = inner
            .messages
            .values()
            .max_by_key(|m| (m.next_attempt_at, m.id))
            .map(|m| (m.next_attempt_at, m.id));

        match victim {
            Some((at, id)) if (incoming.next_attempt_at, incoming.id) < (at, id) => {
                inner.messages.remove(&id);
                warn!(message_id = %id, capacity = inner.messages.len() + 1, "in-memory store full, evicted furthest-due message");
                true
            }
            Some(_) => {
                warn!(message_id = %incoming.id, capacity = inner.messages.len(), "in-memory store full, dropped incoming furthest-due message");
                false
            }
            None => true,
        }
    }

    fn pop_due(inner: &mut Inner, now: DateTime<Utc>) -> Option<OutboxMessage> {
        while let Some(Reverse(key)) = inner.due_index.peek() {
            if !inner.is_current(key) {
                inner.due_index.pop();
                continue;
            }
            if key.at > now {
                return None;
            }
            let Some(Reverse(key)) = inner.due_index.pop() else {
                return None;
            };
            if let Some(msg) = inner.messages.remove(&key.id) {
                return Some(msg);
            }
        }
        None
    }
}

#[async_trait]
impl<C: Clock> OutboxStore for InMemoryOutboxStore<C> {
    async fn save(&self, msg: OutboxMessage) -> Result<(), OutboxStoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| OutboxStoreError::backend("store lock poisoned"))?;

        let is_new = !inner.messages.contains_key(&msg.id);
        if is_new
            && inner.messages.len() >= self.config.capacity
            && !Self::make_room(&mut inner, &msg)
        {
            Self::record_pending_gauge(inner.messages.len());
            return Ok(());
        }

        inner.due_index.push(Reverse(DueKey {
            at: msg.next_attempt_at,
            id: msg.id,
        }));
        inner.messages.insert(msg.id, msg);

        Self::record_pending_gauge(inner.messages.len());
        Ok(())
    }

    async fn delete(&self, id: MessageId) -> Result<(), OutboxStoreError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|_| OutboxStoreError::backend("store lock poisoned"))?;

        // Idempotent: absent ids are a no-op. The stale heap entry, if any,
        // is discarded the next time it reaches the heap head.
        inner.messages.remove(&id);

        Self::record_pending_gauge(inner.messages.len());
        Ok(())
    }

    async fn poll_next_due(&self) -> Result<Option<OutboxMessage>, OutboxStoreError> {
        Ok(self.poll_batch(1).await?.pop())
    }

    async fn poll_batch(&self, batch_size: usize) -> Result<Vec<OutboxMessage>, OutboxStoreError> {
        if batch_size == 0 {
            return Ok(Vec::new());
        }

        let now = self.clock.now();
        let mut inner = self
            .inner
            .write()
            .map_err(|_| OutboxStoreError::backend("store lock poisoned"))?;

        let mut claimed = Vec::new();
        while claimed.len() < batch_size {
            match Self::pop_due(&mut inner, now) {
                Some(msg) => claimed.push(msg),
                None => break,
            }
        }

        if !claimed.is_empty() {
            debug!(count = claimed.len(), "claimed due messages");

            // The backlog scan is O(n); skip it on idle polls so the common
            // empty case stays cheap.
            let backlog = inner.due_backlog(now);
            if backlog > self.config.due_warn_threshold {
                warn!(
                    backlog,
                    threshold = self.config.due_warn_threshold,
                    "due backlog above threshold, consumer may be stalled"
                );
            }
        }
        Self::record_pending_gauge(inner.messages.len());
        Ok(claimed)
    }

    async fn health(&self) -> Health {
        // Only a poisoned lock can take this store down.
        match self.inner.read() {
            Ok(_) => Health::Up,
            Err(_) => Health::Down,
        }
    }
}
