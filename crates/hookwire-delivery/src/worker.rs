//! Delivery worker task.
//!
//! Each worker polls the in-process queue for due deliveries and runs one
//! dispatch attempt per claimed entry. Workers stop when the cancellation
//! token fires, finishing the batch in hand first.

use std::sync::Arc;

use hookwire_core::Clock;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error};

use crate::{
    dispatcher::{AttemptOutcome, Dispatcher},
    engine::{EngineConfig, EngineStats},
    error::Result,
    queue::InProcessQueue,
};

/// A single supervised delivery worker.
pub struct DeliveryWorker {
    id: usize,
    queue: Arc<InProcessQueue>,
    dispatcher: Arc<Dispatcher>,
    config: EngineConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl DeliveryWorker {
    /// Creates a worker with the given identity and collaborators.
    pub fn new(
        id: usize,
        queue: Arc<InProcessQueue>,
        dispatcher: Arc<Dispatcher>,
        config: EngineConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, queue, dispatcher, config, stats, cancellation_token, clock }
    }

    /// Runs the worker loop until cancellation.
    pub async fn run(self) -> Result<()> {
        loop {
            tokio::select! {
                () = self.cancellation_token.cancelled() => {
                    debug!(worker_id = self.id, "worker received shutdown signal");
                    return Ok(());
                }
                () = self.clock.sleep(self.config.poll_interval) => {
                    self.process_batch().await;
                }
            }
        }
    }

    async fn process_batch(&self) {
        let due = self.queue.claim_due(self.clock.now_utc(), self.config.batch_size).await;
        if due.is_empty() {
            return;
        }

        debug!(worker_id = self.id, claimed = due.len(), "processing due deliveries");

        for delivery_id in due {
            match self.dispatcher.attempt(delivery_id).await {
                Ok(outcome) => self.record_outcome(outcome).await,
                Err(err) => {
                    // Storage failed mid-attempt. The durable record is the
                    // source of truth, so the attempt surfaces again on the
                    // next schedule; do not crash the worker over it.
                    error!(
                        worker_id = self.id,
                        delivery_id = %delivery_id,
                        error = %err,
                        "delivery attempt aborted"
                    );
                    let mut stats = self.stats.write().await;
                    stats.aborted_attempts += 1;
                },
            }
        }
    }

    async fn record_outcome(&self, outcome: AttemptOutcome) {
        let mut stats = self.stats.write().await;
        stats.attempts_processed += 1;
        match outcome {
            AttemptOutcome::Delivered => stats.successful_deliveries += 1,
            AttemptOutcome::Captured => stats.captured_to_inbox += 1,
            AttemptOutcome::RetryScheduled => stats.retries_scheduled += 1,
            AttemptOutcome::Failed => stats.permanent_failures += 1,
            AttemptOutcome::Skipped => stats.skipped_attempts += 1,
        }
    }
}
