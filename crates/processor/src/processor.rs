//! Batch delivery processing.

use tracing::{debug, error, warn};

use courier_core::{
    BackoffPolicy, Clock, DeliveryOutcome, NotificationRequest, NotificationSender, OutboxMessage,
    SystemClock,
};
use courier_store::{OutboxStore, OutboxStoreError};

/// Pulls due messages from the store, dispatches them through the sender
/// port, and acknowledges or requeues each one.
///
/// The invocation cadence is the caller's concern (a scheduler, or
/// [`ProcessorRunner`](crate::ProcessorRunner)). One invocation handles at
/// most one batch. Concurrent invocations are safe as long as the store's
/// claim exclusivity holds — each message is claimed by exactly one of them.
pub struct OutboxProcessor<S, N, C = SystemClock> {
    store: S,
    sender: N,
    backoff: BackoffPolicy,
    clock: C,
}

impl<S, N> OutboxProcessor<S, N, SystemClock>
where
    S: OutboxStore,
    N: NotificationSender,
{
    pub fn new(store: S, sender: N, backoff: BackoffPolicy) -> Self {
        Self::with_clock(store, sender, backoff, SystemClock)
    }
}

impl<S, N, C> OutboxProcessor<S, N, C>
where
    S: OutboxStore,
    N: NotificationSender,
    C: Clock,
{
    pub fn with_clock(store: S, sender: N, backoff: BackoffPolicy, clock: C) -> Self {
        Self {
            store,
            sender,
            backoff,
            clock,
        }
    }

    /// Process one batch of due messages.
    ///
    /// Returns the number of messages taken off the due queue, counting both
    /// delivered and requeued ones. Per-message failures never abort the
    /// rest of the batch; the only escalated errors are the store's —
    /// polling failing outright, or a nacked message that could not be
    /// re-saved anywhere (its durability is no longer guaranteed).
    pub async fn process_batch(&self, batch_size: usize) -> Result<usize, OutboxStoreError> {
        let batch = self.store.poll_batch(batch_size).await?;
        if batch.is_empty() {
            // The common idle case: cheap and silent.
            return Ok(0);
        }

        let handled = batch.len();
        debug!(count = handled, "processing due messages");

        let mut requeue_lost = false;
        for msg in batch {
            if let Err(e) = self.process_one(msg).await {
                if e.is_no_store_available() {
                    requeue_lost = true;
                }
            }
        }

        if requeue_lost {
            return Err(OutboxStoreError::NoStoreAvailable);
        }
        Ok(handled)
    }

    /// Deliver one claimed message and settle it with the store.
    ///
    /// Returns an error only when a nacked message could not be re-saved.
    async fn process_one(&self, mut msg: OutboxMessage) -> Result<(), OutboxStoreError> {
        let request = NotificationRequest::from(&msg);
        let channel = msg.channel.as_str();

        match self.sender.send(request).await {
            Ok(DeliveryOutcome::Delivered) => {
                // Claimed messages are already removed; delete covers
                // backends that claim without removal, and is idempotent.
                if let Err(e) = self.store.delete(msg.id).await {
                    warn!(message_id = %msg.id, error = %e, "failed to delete delivered message");
                    metrics::counter!("courier.processor.store_errors", "operation" => "delete")
                        .increment(1);
                }
                metrics::counter!("courier.processor.delivered", "channel" => channel)
                    .increment(1);
                debug!(message_id = %msg.id, channel, "notification delivered");
                Ok(())
            }
            Ok(DeliveryOutcome::NotDelivered) => {
                debug!(message_id = %msg.id, channel, "provider reported not delivered, requeueing");
                self.requeue(&mut msg).await
            }
            Err(e) => {
                warn!(message_id = %msg.id, channel, error = %e, "delivery attempt failed, requeueing");
                // Failure is additional signal on top of the requeue count.
                metrics::counter!("courier.processor.send_failures", "channel" => channel)
                    .increment(1);
                self.requeue(&mut msg).await
            }
        }
    }

    async fn requeue(&self, msg: &mut OutboxMessage) -> Result<(), OutboxStoreError> {
        self.backoff.nack(msg, self.clock.now());
        metrics::counter!("courier.processor.requeued", "channel" => msg.channel.as_str())
            .increment(1);

        if let Err(e) = self.store.save(msg.clone()).await {
            error!(
                message_id = %msg.id,
                attempts = msg.attempts,
                error = %e,
                "failed to requeue message"
            );
            metrics::counter!("courier.processor.store_errors", "operation" => "save")
                .increment(1);
            return Err(e);
        }

        debug!(
            message_id = %msg.id,
            attempts = msg.attempts,
            next_attempt_at = %msg.next_attempt_at,
            "message requeued with backoff"
        );
        Ok(())
    }
}
