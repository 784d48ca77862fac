//! Deterministic test environment for the delivery engine.
//!
//! Bundles in-memory storage, a controllable clock, a capturing
//! instrumentation sink, and permissive or scripted security policies so
//! tests can assemble dispatchers and fan-outs without real DNS, real time,
//! or a database.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use std::{
    collections::HashMap,
    future::Future,
    net::IpAddr,
    pin::Pin,
    sync::{Arc, Mutex},
};

use hookwire_core::{
    instrument::{InstrumentationSink, Record},
    Clock, Delivery, DeliveryId, Endpoint, EndpointId, Event, EventId, MemoryStorage, SharedConfig,
    Storage, TestClock, WebhookConfig,
};
use hookwire_delivery::{
    client::DeliveryClient, queue::InProcessQueue, url_guard::HostResolver, DeliveryError,
    DestinationPolicy, Dispatcher, EndpointManager, EventFanout, EventRegistry, InboxManager,
};
use uuid::Uuid;

/// Installs a tracing subscriber for test output, honoring `RUST_LOG`.
///
/// Safe to call from every test; only the first call installs anything.
pub fn init_tracing() {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn"));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .try_init();
    });
}

/// Instrumentation sink that records every emitted record.
#[derive(Debug, Default)]
pub struct CaptureSink {
    records: Mutex<Vec<Record>>,
}

impl CaptureSink {
    /// Creates an empty capture sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all captured records in emission order.
    pub fn records(&self) -> Vec<Record> {
        self.records.lock().expect("sink lock poisoned").clone()
    }

    /// Returns captured records with the given name.
    pub fn records_named(&self, name: &str) -> Vec<Record> {
        self.records().into_iter().filter(|r| r.name == name).collect()
    }
}

impl InstrumentationSink for CaptureSink {
    fn emit(&self, record: Record) {
        self.records.lock().expect("sink lock poisoned").push(record);
    }
}

/// Destination policy that accepts every URL.
///
/// For tests of dispatch mechanics, where destinations are local mock
/// servers that the real SSRF rules would reject.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAllPolicy;

impl DestinationPolicy for AllowAllPolicy {
    fn check(
        &self,
        _url: &str,
    ) -> Pin<Box<dyn Future<Output = hookwire_delivery::Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }
}

/// Destination policy that rejects every URL.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenyAllPolicy;

impl DestinationPolicy for DenyAllPolicy {
    fn check(
        &self,
        _url: &str,
    ) -> Pin<Box<dyn Future<Output = hookwire_delivery::Result<()>> + Send + '_>> {
        Box::pin(async { Err(DeliveryError::security_blocked("denied by test policy")) })
    }
}

/// Host resolver answering from a fixed table.
///
/// Unknown hostnames fail resolution, which the URL guard treats as a
/// rejection.
#[derive(Debug, Default)]
pub struct StaticResolver {
    entries: HashMap<String, Vec<IpAddr>>,
}

impl StaticResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Maps a hostname to fixed addresses.
    #[must_use]
    pub fn with_host(mut self, host: impl Into<String>, addrs: Vec<IpAddr>) -> Self {
        self.entries.insert(host.into(), addrs);
        self
    }
}

impl HostResolver for StaticResolver {
    fn resolve(
        &self,
        host: &str,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<Vec<IpAddr>>> + Send + '_>> {
        let result = self
            .entries
            .get(host)
            .cloned()
            .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::NotFound, "no such host"));
        Box::pin(async move { result })
    }
}

/// Everything a dispatch test needs, pre-wired.
pub struct TestEnv {
    /// In-memory durable store.
    pub storage: Arc<MemoryStorage>,
    /// Controllable clock shared by all components.
    pub clock: Arc<TestClock>,
    /// Live configuration handle.
    pub config: SharedConfig,
    /// In-process delayed queue.
    pub queue: Arc<InProcessQueue>,
    /// Capturing instrumentation sink.
    pub sink: Arc<CaptureSink>,
}

impl Default for TestEnv {
    fn default() -> Self {
        Self::new()
    }
}

impl TestEnv {
    /// Creates a fresh environment with default configuration.
    pub fn new() -> Self {
        Self::with_config(WebhookConfig::default())
    }

    /// Creates a fresh environment with the given configuration.
    pub fn with_config(config: WebhookConfig) -> Self {
        init_tracing();
        Self {
            storage: Arc::new(MemoryStorage::new()),
            clock: Arc::new(TestClock::new()),
            config: SharedConfig::new(config),
            queue: Arc::new(InProcessQueue::new()),
            sink: Arc::new(CaptureSink::new()),
        }
    }

    /// Builds a dispatcher that skips destination validation.
    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher_with_policy(Arc::new(AllowAllPolicy))
    }

    /// Builds a dispatcher with an explicit destination policy.
    pub fn dispatcher_with_policy(&self, policy: Arc<dyn DestinationPolicy>) -> Dispatcher {
        Dispatcher::new(
            self.storage.clone(),
            self.queue.clone(),
            self.client(),
            policy,
            self.config.clone(),
            self.clock.clone(),
            self.sink.clone(),
        )
    }

    /// Builds a fan-out over the environment's storage and queue.
    pub fn fanout(&self, registry: Arc<EventRegistry>) -> EventFanout {
        EventFanout::new(
            self.storage.clone(),
            self.queue.clone(),
            registry,
            self.clock.clone(),
            self.sink.clone(),
        )
    }

    /// Builds an endpoint manager that skips destination validation.
    pub fn endpoint_manager(&self) -> EndpointManager {
        EndpointManager::new(self.storage.clone(), Arc::new(AllowAllPolicy), self.clock.clone())
    }

    /// Builds an inbox manager that skips destination validation.
    pub fn inbox_manager(&self) -> InboxManager {
        InboxManager::new(
            self.storage.clone(),
            self.client(),
            Arc::new(AllowAllPolicy),
            self.clock.clone(),
        )
    }

    /// Builds an HTTP client bound to this environment's configuration.
    pub fn client(&self) -> DeliveryClient {
        DeliveryClient::new(self.config.clone()).expect("client construction cannot fail in tests")
    }

    /// Inserts an enabled endpoint subscribed to the given events.
    pub async fn create_endpoint(&self, url: &str, events: &[&str]) -> Endpoint {
        let endpoint = Endpoint {
            id: EndpointId::new(),
            name: format!("endpoint-{}", &Uuid::new_v4().to_string()[..8]),
            url: url.to_string(),
            secret: "test-signing-secret".to_string(),
            events: events.iter().map(|s| (*s).to_string()).collect(),
            enabled: true,
            created_at: self.clock.now_utc(),
        };
        self.storage
            .create_endpoint(endpoint.clone())
            .await
            .expect("endpoint fixture insert failed");
        endpoint
    }

    /// Inserts an event with the given payload.
    pub async fn create_event(
        &self,
        entity_kind: &str,
        event_type: &str,
        payload: serde_json::Value,
    ) -> Event {
        let event = Event {
            id: EventId::new(),
            event_type: event_type.to_string(),
            entity_kind: entity_kind.to_string(),
            entity_id: "1".to_string(),
            payload,
            idempotency_key: Uuid::new_v4().to_string(),
            created_at: self.clock.now_utc(),
        };
        self.storage.create_event(event.clone()).await.expect("event fixture insert failed");
        event
    }

    /// Inserts a pending delivery for an (event, endpoint) pair.
    pub async fn create_delivery(&self, event_id: EventId, endpoint_id: EndpointId) -> Delivery {
        let delivery = Delivery::new(event_id, endpoint_id, self.clock.now_utc());
        self.storage
            .create_deliveries(vec![delivery.clone()])
            .await
            .expect("delivery fixture insert failed");
        delivery
    }

    /// Reloads a delivery, panicking if it vanished.
    pub async fn delivery(&self, delivery_id: DeliveryId) -> Delivery {
        self.storage
            .find_delivery(delivery_id)
            .await
            .expect("storage read failed")
            .expect("delivery not found")
    }

    /// Advances the environment clock.
    pub fn advance(&self, duration: std::time::Duration) {
        self.clock.advance(duration);
    }
}
