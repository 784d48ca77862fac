//! Worker pool supervision.
//!
//! Spawns the configured number of delivery workers, tracks their join
//! handles, and drives graceful shutdown: cancel, then wait for each worker
//! to finish its batch, bounded by a timeout. Dropping a pool without
//! shutting it down cancels the workers so no tasks are orphaned.

use std::{sync::Arc, time::Duration};

use hookwire_core::Clock;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    dispatcher::Dispatcher,
    engine::{EngineConfig, EngineStats},
    error::{DeliveryError, Result},
    queue::InProcessQueue,
    worker::DeliveryWorker,
};

/// Supervises delivery worker tasks.
pub struct WorkerPool {
    queue: Arc<InProcessQueue>,
    dispatcher: Arc<Dispatcher>,
    config: EngineConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    /// Creates a pool; no workers run until `spawn_workers`.
    pub fn new(
        queue: Arc<InProcessQueue>,
        dispatcher: Arc<Dispatcher>,
        config: EngineConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            queue,
            dispatcher,
            config,
            stats,
            cancellation_token,
            worker_handles: Vec::new(),
            clock,
        }
    }

    /// Spawns all configured workers and returns immediately.
    pub async fn spawn_workers(&mut self) {
        info!(worker_count = self.config.worker_count, "spawning delivery workers");

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = self.config.worker_count;
        }

        for worker_id in 0..self.config.worker_count {
            let worker = DeliveryWorker::new(
                worker_id,
                self.queue.clone(),
                self.dispatcher.clone(),
                self.config.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
                self.clock.clone(),
            );

            let handle = tokio::spawn(async move {
                info!(worker_id, "delivery worker starting");
                let result = worker.run().await;
                if let Err(ref error) = result {
                    error!(worker_id, error = %error, "delivery worker terminated with error");
                } else {
                    info!(worker_id, "delivery worker stopped gracefully");
                }
                result
            });

            self.worker_handles.push(handle);
        }
    }

    /// Cancels all workers and waits for them to finish, bounded by
    /// `timeout`.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let handles = std::mem::take(&mut self.worker_handles);
        let stats = self.stats.clone();

        let shutdown_future = async {
            let mut panics = 0usize;
            for (worker_id, handle) in handles.into_iter().enumerate() {
                match handle.await {
                    Ok(Ok(())) => {},
                    Ok(Err(error)) => {
                        warn!(worker_id, error = %error, "worker completed with error during shutdown");
                    },
                    Err(join_error) => {
                        error!(worker_id, error = %join_error, "worker task panicked");
                        panics += 1;
                    },
                }
            }

            stats.write().await.active_workers = 0;
            panics
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(panics) => {
                if panics > 0 {
                    warn!(panics, "some workers panicked before shutdown");
                }
                info!("worker pool shutdown completed");
                Ok(())
            },
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Returns true while any worker task is still running.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if self.worker_handles.is_empty() {
            return;
        }

        let active = self.worker_handles.iter().filter(|h| !h.is_finished()).count();
        if active > 0 && !self.cancellation_token.is_cancelled() {
            error!(
                active_workers = active,
                "worker pool dropped with active workers, forcing cancellation"
            );
            self.cancellation_token.cancel();
        }
    }
}
