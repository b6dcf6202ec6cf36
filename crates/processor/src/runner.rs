//! Periodic runner for the processor.
//!
//! The processing contract leaves cadence to an external scheduler; this
//! module is that scheduler for deployments that want one in-process. It
//! polls on a fixed interval inside a tokio task, keeps running through
//! processing errors, and supports graceful shutdown.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use courier_core::{Clock, NotificationSender};
use courier_store::OutboxStore;

use super::processor::OutboxProcessor;

/// Runner configuration.
#[derive(Debug, Clone)]
pub struct ProcessorConfig {
    /// How often to poll for due messages.
    pub poll_interval: Duration,
    /// Messages claimed per poll.
    pub batch_size: usize,
    /// Name for logging.
    pub name: String,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
            batch_size: 50,
            name: "outbox-processor".to_string(),
        }
    }
}

impl ProcessorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = batch_size;
        self
    }
}

/// Runner runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ProcessorStats {
    /// Polls that found at least one due message.
    pub batches: u64,
    /// Messages taken off the due queue.
    pub messages: u64,
    /// Polls that ended in a store error.
    pub store_errors: u64,
    pub last_error: Option<String>,
}

/// Handle to a running processor loop.
#[derive(Debug)]
pub struct ProcessorHandle {
    shutdown: Option<oneshot::Sender<()>>,
    join: Option<JoinHandle<()>>,
    stats: Arc<Mutex<ProcessorStats>>,
}

impl ProcessorHandle {
    /// Request graceful shutdown and wait for the loop to finish.
    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
        if let Some(join) = self.join.take() {
            let _ = join.await;
        }
    }

    /// Snapshot of the runner's statistics.
    pub fn stats(&self) -> ProcessorStats {
        self.stats.lock().expect("stats lock poisoned").clone()
    }
}

/// Spawns [`OutboxProcessor`] loops.
pub struct ProcessorRunner;

impl ProcessorRunner {
    pub fn spawn<S, N, C>(
        processor: OutboxProcessor<S, N, C>,
        config: ProcessorConfig,
    ) -> ProcessorHandle
    where
        S: OutboxStore + 'static,
        N: NotificationSender + 'static,
        C: Clock + 'static,
    {
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let stats = Arc::new(Mutex::new(ProcessorStats::default()));
        let stats_clone = stats.clone();

        let join = tokio::spawn(async move {
            run_loop(processor, config, shutdown_rx, stats_clone).await;
        });

        ProcessorHandle {
            shutdown: Some(shutdown_tx),
            join: Some(join),
            stats,
        }
    }
}

async fn run_loop<S, N, C>(
    processor: OutboxProcessor<S, N, C>,
    config: ProcessorConfig,
    mut shutdown_rx: oneshot::Receiver<()>,
    stats: Arc<Mutex<ProcessorStats>>,
) where
    S: OutboxStore,
    N: NotificationSender,
    C: Clock,
{
    info!(runner = %config.name, interval_ms = config.poll_interval.as_millis() as u64, "outbox processor started");

    loop {
        match processor.process_batch(config.batch_size).await {
            Ok(0) => {}
            Ok(handled) => {
                let mut s = stats.lock().expect("stats lock poisoned");
                s.batches += 1;
                s.messages += handled as u64;
                debug!(runner = %config.name, handled, "batch processed");
            }
            Err(e) => {
                // The loop outlives store outages; the resilient tier and
                // backoff bookkeeping make the next poll worth trying.
                warn!(runner = %config.name, error = %e, "batch processing failed");
                let mut s = stats.lock().expect("stats lock poisoned");
                s.store_errors += 1;
                s.last_error = Some(e.to_string());
            }
        }

        tokio::select! {
            _ = &mut shutdown_rx => break,
            _ = tokio::time::sleep(config.poll_interval) => {}
        }
    }

    info!(runner = %config.name, "outbox processor stopped");
}
