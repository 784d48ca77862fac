//! Engine assembly and lifecycle.
//!
//! `DeliveryEngine` wires the collaborators together: durable store, queue,
//! dispatcher, fan-out, endpoint and inbox managers, and the worker pool.
//! Hosts embed one engine, trigger events through it, and shut it down
//! gracefully on exit.

use std::{sync::Arc, time::Duration};

use hookwire_core::{
    Clock, InstrumentationSink, NoOpSink, RealClock, SharedConfig, Storage, WebhookConfig,
};
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    client::DeliveryClient,
    dispatcher::Dispatcher,
    endpoints::EndpointManager,
    error::Result,
    fanout::{EventFanout, EventRegistry, Eventable, TriggerOutcome},
    inbox::InboxManager,
    queue::InProcessQueue,
    url_guard::{DestinationPolicy, UrlGuard},
    worker_pool::WorkerPool,
};

/// Worker pool sizing and timing.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// Maximum due deliveries a worker claims per poll.
    pub batch_size: usize,

    /// How often workers poll the queue.
    pub poll_interval: Duration,

    /// Maximum time to wait for workers during shutdown.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            batch_size: crate::DEFAULT_BATCH_SIZE,
            poll_interval: Duration::from_millis(500),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// Counters for engine monitoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct EngineStats {
    /// Workers currently running.
    pub active_workers: usize,
    /// Attempts that ran to a recorded outcome.
    pub attempts_processed: u64,
    /// Attempts ending in terminal success.
    pub successful_deliveries: u64,
    /// Attempts captured to the inbox.
    pub captured_to_inbox: u64,
    /// Attempts that scheduled a retry.
    pub retries_scheduled: u64,
    /// Attempts ending in terminal failure.
    pub permanent_failures: u64,
    /// Attempts skipped for a missing or already terminal record.
    pub skipped_attempts: u64,
    /// Attempts aborted by a storage error.
    pub aborted_attempts: u64,
}

/// The assembled webhook delivery engine.
pub struct DeliveryEngine {
    config: EngineConfig,
    queue: Arc<InProcessQueue>,
    dispatcher: Arc<Dispatcher>,
    fanout: EventFanout,
    endpoints: EndpointManager,
    inbox: InboxManager,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
    clock: Arc<dyn Clock>,
}

impl DeliveryEngine {
    /// Assembles an engine from explicit collaborators.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the HTTP client cannot be
    /// built.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        storage: Arc<dyn Storage>,
        registry: Arc<EventRegistry>,
        config: EngineConfig,
        shared: SharedConfig,
        destination_policy: Arc<dyn DestinationPolicy>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn InstrumentationSink>,
    ) -> Result<Self> {
        let queue = Arc::new(InProcessQueue::new());
        let client = DeliveryClient::new(shared.clone())?;

        let dispatcher = Arc::new(Dispatcher::new(
            storage.clone(),
            queue.clone(),
            client.clone(),
            destination_policy.clone(),
            shared,
            clock.clone(),
            sink.clone(),
        ));

        let fanout = EventFanout::new(
            storage.clone(),
            queue.clone(),
            registry,
            clock.clone(),
            sink,
        );

        let endpoints =
            EndpointManager::new(storage.clone(), destination_policy.clone(), clock.clone());
        let inbox = InboxManager::new(storage, client, destination_policy, clock.clone());

        Ok(Self {
            config,
            queue,
            dispatcher,
            fanout,
            endpoints,
            inbox,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
            clock,
        })
    }

    /// Assembles a production engine: real clock, system DNS, full SSRF
    /// rules, no instrumentation sink.
    pub fn with_defaults(
        storage: Arc<dyn Storage>,
        registry: Arc<EventRegistry>,
        settings: WebhookConfig,
    ) -> Result<Self> {
        Self::new(
            storage,
            registry,
            EngineConfig::default(),
            SharedConfig::new(settings),
            Arc::new(UrlGuard::new()),
            Arc::new(RealClock::new()),
            Arc::new(NoOpSink),
        )
    }

    /// Starts the worker pool. Returns immediately after spawning.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            worker_count = self.config.worker_count,
            batch_size = self.config.batch_size,
            "starting webhook delivery engine"
        );

        let mut pool = WorkerPool::new(
            self.queue.clone(),
            self.dispatcher.clone(),
            self.config.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.clock.clone(),
        );
        pool.spawn_workers().await;
        self.worker_pool = Some(pool);

        Ok(())
    }

    /// Gracefully stops the worker pool.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down webhook delivery engine");
        if let Some(pool) = self.worker_pool.take() {
            pool.shutdown_graceful(self.config.shutdown_timeout).await?;
        }
        Ok(())
    }

    /// Triggers an event for an entity and fans it out.
    pub async fn trigger(
        &self,
        entity: &dyn Eventable,
        event_type: &str,
        custom_payload: Option<serde_json::Value>,
    ) -> Result<TriggerOutcome> {
        self.fanout.trigger(entity, event_type, custom_payload).await
    }

    /// Runs one dispatch attempt directly, bypassing the queue.
    ///
    /// Intended for hosts that consume an external job system instead of
    /// the in-process workers.
    pub async fn dispatch(
        &self,
        delivery_id: hookwire_core::DeliveryId,
    ) -> Result<crate::dispatcher::AttemptOutcome> {
        self.dispatcher.attempt(delivery_id).await
    }

    /// Endpoint registration and lifecycle operations.
    pub fn endpoints(&self) -> &EndpointManager {
        &self.endpoints
    }

    /// Inbox browsing and replay operations.
    pub fn inbox(&self) -> &InboxManager {
        &self.inbox
    }

    /// Returns a snapshot of engine counters.
    pub async fn stats(&self) -> EngineStats {
        *self.stats.read().await
    }

    /// Returns true while any worker is running.
    pub fn is_running(&self) -> bool {
        self.worker_pool.as_ref().is_some_and(WorkerPool::has_active_workers)
    }
}
