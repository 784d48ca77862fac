//! Event creation and fan-out to subscribed endpoints.
//!
//! Host entities declare their event types up front in an `EventRegistry`;
//! triggering an undeclared type is a caller error, caught before anything
//! is persisted. A successful trigger creates exactly one immutable event,
//! one pending delivery per subscribed enabled endpoint, and enqueues each
//! delivery for immediate dispatch.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use hookwire_core::{
    instrument::{self, InstrumentationSink, Record},
    Clock, Delivery, DeliveryId, Event, EventId, Storage,
};
use tracing::{debug, info};
use uuid::Uuid;

use crate::{
    error::{DeliveryError, Result},
    queue::DeliveryQueue,
};

/// Something that can emit webhook events.
///
/// Implemented by host application entities. The engine never inspects the
/// entity beyond these three accessors.
pub trait Eventable {
    /// Kind of the entity, e.g. `"order"`. Forms the first half of the
    /// full event name.
    fn entity_kind(&self) -> &str;

    /// Opaque identifier of this entity instance.
    fn entity_id(&self) -> String;

    /// Payload sent when the trigger does not supply a custom one.
    fn default_payload(&self) -> serde_json::Value;
}

/// Declared event types per entity kind.
///
/// Built once at startup. Declaring is additive; the same kind can be
/// declared in several places.
#[derive(Debug, Clone, Default)]
pub struct EventRegistry {
    declared: HashMap<String, HashSet<String>>,
}

impl EventRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares event types for an entity kind.
    pub fn declare(&mut self, entity_kind: impl Into<String>, event_types: &[&str]) {
        let entry = self.declared.entry(entity_kind.into()).or_default();
        for event_type in event_types {
            entry.insert((*event_type).to_string());
        }
    }

    /// Returns true if the event type was declared for the entity kind.
    pub fn is_declared(&self, entity_kind: &str, event_type: &str) -> bool {
        self.declared.get(entity_kind).is_some_and(|types| types.contains(event_type))
    }

    /// Lists declared event types for an entity kind, sorted.
    pub fn declared_events(&self, entity_kind: &str) -> Vec<String> {
        let mut events: Vec<String> =
            self.declared.get(entity_kind).map(|t| t.iter().cloned().collect()).unwrap_or_default();
        events.sort();
        events
    }
}

/// Result of a successful trigger.
#[derive(Debug, Clone)]
pub struct TriggerOutcome {
    /// The created event.
    pub event_id: EventId,
    /// The unique token receivers use to deduplicate.
    pub idempotency_key: String,
    /// Deliveries created, one per subscribed enabled endpoint. Empty when
    /// nothing is subscribed; the event still exists.
    pub delivery_ids: Vec<DeliveryId>,
}

/// Creates events and fans them out to subscribed endpoints.
pub struct EventFanout {
    storage: Arc<dyn Storage>,
    queue: Arc<dyn DeliveryQueue>,
    registry: Arc<EventRegistry>,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn InstrumentationSink>,
}

impl EventFanout {
    /// Creates a fan-out over the given collaborators.
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: Arc<dyn DeliveryQueue>,
        registry: Arc<EventRegistry>,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn InstrumentationSink>,
    ) -> Self {
        Self { storage, queue, registry, clock, sink }
    }

    /// Triggers an event for an entity.
    ///
    /// `custom_payload` overrides the entity's default payload. Fails with
    /// `UnknownEventType` when the type was never declared for this entity
    /// kind; nothing is persisted in that case. An event with no subscribers
    /// is still created, just with zero deliveries.
    pub async fn trigger(
        &self,
        entity: &dyn Eventable,
        event_type: &str,
        custom_payload: Option<serde_json::Value>,
    ) -> Result<TriggerOutcome> {
        let entity_kind = entity.entity_kind().to_string();
        let full_event_name = format!("{entity_kind}.{event_type}");

        if !self.registry.is_declared(&entity_kind, event_type) {
            return Err(DeliveryError::unknown_event_type(full_event_name));
        }

        let now = self.clock.now_utc();
        let event = Event {
            id: EventId::new(),
            event_type: event_type.to_string(),
            entity_kind: entity_kind.clone(),
            entity_id: entity.entity_id(),
            payload: custom_payload.unwrap_or_else(|| entity.default_payload()),
            idempotency_key: Uuid::new_v4().to_string(),
            created_at: now,
        };
        let event_id = event.id;
        let idempotency_key = event.idempotency_key.clone();
        self.storage.create_event(event).await?;

        let endpoints = self.storage.endpoints_subscribed_to(full_event_name.clone()).await?;

        // One batch insert, all deliveries stamped with the same time.
        let deliveries: Vec<Delivery> =
            endpoints.iter().map(|e| Delivery::new(event_id, e.id, now)).collect();
        let delivery_ids: Vec<DeliveryId> = deliveries.iter().map(|d| d.id).collect();

        if deliveries.is_empty() {
            debug!(event = %full_event_name, "no subscribed endpoints, event recorded without deliveries");
        } else {
            self.storage.create_deliveries(deliveries).await?;
            for delivery_id in &delivery_ids {
                self.queue.enqueue(*delivery_id, now).await?;
            }
        }

        info!(
            event = %full_event_name,
            event_id = %event_id,
            deliveries = delivery_ids.len(),
            "webhook event triggered"
        );

        self.sink.emit(
            Record::new(instrument::TRIGGERED)
                .field("event_type", event_type)
                .field("entity_kind", entity_kind)
                .field("entity_id", entity.entity_id())
                .field("deliveries_count", delivery_ids.len() as u64),
        );

        Ok(TriggerOutcome { event_id, idempotency_key, delivery_ids })
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use hookwire_core::{
        DeliveryStatus, Endpoint, EndpointId, MemoryStorage, NoOpSink, TestClock,
    };

    use super::*;
    use crate::queue::InProcessQueue;

    struct Order {
        id: u64,
    }

    impl Eventable for Order {
        fn entity_kind(&self) -> &str {
            "order"
        }

        fn entity_id(&self) -> String {
            self.id.to_string()
        }

        fn default_payload(&self) -> serde_json::Value {
            serde_json::json!({"order_id": self.id})
        }
    }

    fn registry() -> Arc<EventRegistry> {
        let mut registry = EventRegistry::new();
        registry.declare("order", &["completed", "cancelled"]);
        Arc::new(registry)
    }

    fn endpoint(events: &[&str], enabled: bool) -> Endpoint {
        Endpoint {
            id: EndpointId::new(),
            name: "test".to_string(),
            url: "https://hooks.example.com/x".to_string(),
            secret: "secret".to_string(),
            events: events.iter().map(|s| s.to_string()).collect(),
            enabled,
            created_at: Utc::now(),
        }
    }

    fn fanout(storage: Arc<MemoryStorage>, queue: Arc<InProcessQueue>) -> EventFanout {
        EventFanout::new(
            storage,
            queue,
            registry(),
            Arc::new(TestClock::new()),
            Arc::new(NoOpSink),
        )
    }

    #[tokio::test]
    async fn trigger_creates_event_and_deliveries() {
        let storage = Arc::new(MemoryStorage::new());
        let queue = Arc::new(InProcessQueue::new());

        let subscribed = endpoint(&["order.completed"], true);
        let other = endpoint(&["invoice.paid"], true);
        let disabled = endpoint(&["order.completed"], false);
        storage.create_endpoint(subscribed.clone()).await.unwrap();
        storage.create_endpoint(other).await.unwrap();
        storage.create_endpoint(disabled).await.unwrap();

        let fanout = fanout(storage.clone(), queue.clone());
        let outcome = fanout.trigger(&Order { id: 42 }, "completed", None).await.unwrap();

        assert_eq!(outcome.delivery_ids.len(), 1);

        let event = storage.find_event(outcome.event_id).await.unwrap();
        assert_eq!(event.full_event_name(), "order.completed");
        assert_eq!(event.payload, serde_json::json!({"order_id": 42}));
        assert!(!event.idempotency_key.is_empty());

        let deliveries = storage.deliveries_for_event(outcome.event_id).await.unwrap();
        assert_eq!(deliveries.len(), 1);
        assert_eq!(deliveries[0].endpoint_id, subscribed.id);
        assert_eq!(deliveries[0].status, DeliveryStatus::Pending);
        assert_eq!(deliveries[0].attempt_count, 0);

        // Deliveries are immediately eligible for dispatch.
        assert_eq!(queue.len().await, 1);
    }

    #[tokio::test]
    async fn undeclared_event_type_is_rejected_without_side_effects() {
        let storage = Arc::new(MemoryStorage::new());
        let queue = Arc::new(InProcessQueue::new());
        storage.create_endpoint(endpoint(&["order.shipped"], true)).await.unwrap();

        let fanout = fanout(storage.clone(), queue.clone());
        let result = fanout.trigger(&Order { id: 1 }, "shipped", None).await;

        assert!(matches!(result, Err(DeliveryError::UnknownEventType { .. })));
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn custom_payload_overrides_default() {
        let storage = Arc::new(MemoryStorage::new());
        let queue = Arc::new(InProcessQueue::new());

        let fanout = fanout(storage.clone(), queue.clone());
        let custom = serde_json::json!({"override": true});
        let outcome =
            fanout.trigger(&Order { id: 7 }, "cancelled", Some(custom.clone())).await.unwrap();

        let event = storage.find_event(outcome.event_id).await.unwrap();
        assert_eq!(event.payload, custom);
    }

    #[tokio::test]
    async fn event_without_subscribers_is_still_recorded() {
        let storage = Arc::new(MemoryStorage::new());
        let queue = Arc::new(InProcessQueue::new());

        let fanout = fanout(storage.clone(), queue.clone());
        let outcome = fanout.trigger(&Order { id: 9 }, "completed", None).await.unwrap();

        assert!(outcome.delivery_ids.is_empty());
        assert!(storage.find_event(outcome.event_id).await.is_ok());
        assert!(queue.is_empty().await);
    }

    #[tokio::test]
    async fn two_triggers_produce_distinct_idempotency_keys() {
        let storage = Arc::new(MemoryStorage::new());
        let queue = Arc::new(InProcessQueue::new());
        let fanout = fanout(storage, queue);

        let first = fanout.trigger(&Order { id: 1 }, "completed", None).await.unwrap();
        let second = fanout.trigger(&Order { id: 1 }, "completed", None).await.unwrap();

        assert_ne!(first.idempotency_key, second.idempotency_key);
    }

    #[test]
    fn registry_declarations_are_additive() {
        let mut registry = EventRegistry::new();
        registry.declare("order", &["completed"]);
        registry.declare("order", &["cancelled"]);

        assert!(registry.is_declared("order", "completed"));
        assert!(registry.is_declared("order", "cancelled"));
        assert!(!registry.is_declared("order", "shipped"));
        assert!(!registry.is_declared("invoice", "completed"));
        assert_eq!(registry.declared_events("order"), vec!["cancelled", "completed"]);
    }
}
