//! Durable-store contract for the delivery engine.
//!
//! The engine never talks to a database directly; every persistence
//! operation goes through the `Storage` trait so hosts can back it with
//! their own store. `MemoryStorage` is the bundled implementation used by
//! tests and by embedded deployments that do not need durability.

use std::{
    collections::{HashMap, HashSet},
    future::Future,
    pin::Pin,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use crate::{
    error::{CoreError, Result},
    models::{
        Delivery, DeliveryId, DeliveryStatus, Endpoint, EndpointId, Event, EventId, InboxEntry,
        InboxEntryId,
    },
};

/// Failure details recorded against a delivery after an unsuccessful
/// attempt.
///
/// HTTP failures carry the response; network and security failures carry
/// only the error message.
#[derive(Debug, Clone, Default)]
pub struct AttemptFailure {
    /// Human-readable description of what went wrong.
    pub error_message: String,
    /// HTTP status of the response, when one was received.
    pub response_code: Option<u16>,
    /// Response body, truncated by the caller.
    pub response_body: Option<String>,
    /// Response headers, when a response was received.
    pub response_headers: HashMap<String, String>,
}

/// Persistence operations required by the delivery engine.
///
/// Mutation methods on deliveries must be atomic per delivery: concurrent
/// dispatch of the same delivery must not interleave partial updates.
/// Methods taking an ID return `CoreError::NotFound` when no such record
/// exists, except `find_delivery` and `find_inbox_entry` which return `None`
/// so callers can treat a vanished record as a no-op.
pub trait Storage: Send + Sync + 'static {
    /// Persists a newly registered endpoint.
    fn create_endpoint(
        &self,
        endpoint: Endpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Loads an endpoint by ID.
    fn find_endpoint(
        &self,
        endpoint_id: EndpointId,
    ) -> Pin<Box<dyn Future<Output = Result<Endpoint>> + Send + '_>>;

    /// Lists every registered endpoint.
    fn list_endpoints(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Endpoint>>> + Send + '_>>;

    /// Enables or disables an endpoint.
    ///
    /// Disabling affects only future fan-out; deliveries already created
    /// keep running their attempt series.
    fn set_endpoint_enabled(
        &self,
        endpoint_id: EndpointId,
        enabled: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Returns enabled endpoints subscribed to the given full event name.
    ///
    /// Matching is exact string membership against each endpoint's
    /// subscription list.
    fn endpoints_subscribed_to(
        &self,
        event_name: String,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Endpoint>>> + Send + '_>>;

    /// Persists a new event.
    ///
    /// Fails with `CoreError::ConstraintViolation` when the event's
    /// idempotency key is already taken.
    fn create_event(&self, event: Event) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Loads an event by ID.
    fn find_event(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Event>> + Send + '_>>;

    /// Persists a batch of freshly fanned-out deliveries.
    fn create_deliveries(
        &self,
        deliveries: Vec<Delivery>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Loads a delivery by ID, or `None` if it no longer exists.
    fn find_delivery(
        &self,
        delivery_id: DeliveryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>>> + Send + '_>>;

    /// Increments a delivery's attempt counter and stamps the attempt time.
    ///
    /// Returns the post-increment count. The increment is persisted before
    /// the network call so a crash mid-attempt still consumes the attempt.
    fn increment_attempt(
        &self,
        delivery_id: DeliveryId,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>>;

    /// Transitions a delivery to terminal success.
    ///
    /// Records the response and clears any scheduled retry and prior error
    /// message.
    fn mark_delivery_success(
        &self,
        delivery_id: DeliveryId,
        response_code: u16,
        response_body: Option<String>,
        response_headers: HashMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Keeps a delivery pending and schedules its next retry.
    fn schedule_delivery_retry(
        &self,
        delivery_id: DeliveryId,
        next_retry_at: DateTime<Utc>,
        failure: AttemptFailure,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Transitions a delivery to terminal failure.
    fn mark_delivery_failed(
        &self,
        delivery_id: DeliveryId,
        failure: AttemptFailure,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Lists deliveries created for an event.
    fn deliveries_for_event(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Delivery>>> + Send + '_>>;

    /// Lists deliveries targeting an endpoint.
    fn deliveries_for_endpoint(
        &self,
        endpoint_id: EndpointId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Delivery>>> + Send + '_>>;

    /// Persists a captured inbox entry.
    fn create_inbox_entry(
        &self,
        entry: InboxEntry,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Loads an inbox entry by ID, or `None` if it no longer exists.
    fn find_inbox_entry(
        &self,
        entry_id: InboxEntryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<InboxEntry>>> + Send + '_>>;

    /// Records the outcome of replaying an inbox entry.
    fn record_inbox_replay(
        &self,
        entry_id: InboxEntryId,
        replayed_at: DateTime<Utc>,
        response_code: Option<u16>,
        response_body: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;

    /// Lists inbox entries, newest first.
    fn list_inbox_entries(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<InboxEntry>>> + Send + '_>>;

    /// Deletes every inbox entry, returning how many were removed.
    fn clear_inbox(&self) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>>;
}

/// In-memory storage backed by `tokio::sync::RwLock` maps.
///
/// All operations are atomic per record under the write lock, matching the
/// contract a transactional backend would provide.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    endpoints: Arc<RwLock<HashMap<EndpointId, Endpoint>>>,
    events: Arc<RwLock<HashMap<EventId, Event>>>,
    idempotency_keys: Arc<RwLock<HashSet<String>>>,
    deliveries: Arc<RwLock<HashMap<DeliveryId, Delivery>>>,
    inbox: Arc<RwLock<HashMap<InboxEntryId, InboxEntry>>>,
}

impl MemoryStorage {
    /// Creates empty in-memory storage.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Storage for MemoryStorage {
    fn create_endpoint(
        &self,
        endpoint: Endpoint,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let endpoints = self.endpoints.clone();
        Box::pin(async move {
            endpoints.write().await.insert(endpoint.id, endpoint);
            Ok(())
        })
    }

    fn find_endpoint(
        &self,
        endpoint_id: EndpointId,
    ) -> Pin<Box<dyn Future<Output = Result<Endpoint>> + Send + '_>> {
        let endpoints = self.endpoints.clone();
        Box::pin(async move {
            endpoints
                .read()
                .await
                .get(&endpoint_id)
                .cloned()
                .ok_or_else(|| CoreError::not_found(format!("endpoint {endpoint_id}")))
        })
    }

    fn list_endpoints(&self) -> Pin<Box<dyn Future<Output = Result<Vec<Endpoint>>> + Send + '_>> {
        let endpoints = self.endpoints.clone();
        Box::pin(async move {
            let mut all: Vec<Endpoint> = endpoints.read().await.values().cloned().collect();
            all.sort_by_key(|e| e.created_at);
            Ok(all)
        })
    }

    fn set_endpoint_enabled(
        &self,
        endpoint_id: EndpointId,
        enabled: bool,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let endpoints = self.endpoints.clone();
        Box::pin(async move {
            let mut endpoints = endpoints.write().await;
            let endpoint = endpoints
                .get_mut(&endpoint_id)
                .ok_or_else(|| CoreError::not_found(format!("endpoint {endpoint_id}")))?;
            endpoint.enabled = enabled;
            Ok(())
        })
    }

    fn endpoints_subscribed_to(
        &self,
        event_name: String,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Endpoint>>> + Send + '_>> {
        let endpoints = self.endpoints.clone();
        Box::pin(async move {
            let mut matching: Vec<Endpoint> = endpoints
                .read()
                .await
                .values()
                .filter(|e| e.enabled && e.subscribed_to(&event_name))
                .cloned()
                .collect();
            matching.sort_by_key(|e| e.created_at);
            Ok(matching)
        })
    }

    fn create_event(&self, event: Event) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let events = self.events.clone();
        let idempotency_keys = self.idempotency_keys.clone();
        Box::pin(async move {
            let mut keys = idempotency_keys.write().await;
            if !keys.insert(event.idempotency_key.clone()) {
                return Err(CoreError::constraint(format!(
                    "idempotency key {} already exists",
                    event.idempotency_key
                )));
            }
            events.write().await.insert(event.id, event);
            Ok(())
        })
    }

    fn find_event(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Event>> + Send + '_>> {
        let events = self.events.clone();
        Box::pin(async move {
            events
                .read()
                .await
                .get(&event_id)
                .cloned()
                .ok_or_else(|| CoreError::not_found(format!("event {event_id}")))
        })
    }

    fn create_deliveries(
        &self,
        new_deliveries: Vec<Delivery>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let deliveries = self.deliveries.clone();
        Box::pin(async move {
            let mut deliveries = deliveries.write().await;
            for delivery in new_deliveries {
                deliveries.insert(delivery.id, delivery);
            }
            Ok(())
        })
    }

    fn find_delivery(
        &self,
        delivery_id: DeliveryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Delivery>>> + Send + '_>> {
        let deliveries = self.deliveries.clone();
        Box::pin(async move { Ok(deliveries.read().await.get(&delivery_id).cloned()) })
    }

    fn increment_attempt(
        &self,
        delivery_id: DeliveryId,
        at: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<u32>> + Send + '_>> {
        let deliveries = self.deliveries.clone();
        Box::pin(async move {
            let mut deliveries = deliveries.write().await;
            let delivery = deliveries
                .get_mut(&delivery_id)
                .ok_or_else(|| CoreError::not_found(format!("delivery {delivery_id}")))?;
            delivery.attempt_count += 1;
            delivery.last_attempt_at = Some(at);
            Ok(delivery.attempt_count)
        })
    }

    fn mark_delivery_success(
        &self,
        delivery_id: DeliveryId,
        response_code: u16,
        response_body: Option<String>,
        response_headers: HashMap<String, String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let deliveries = self.deliveries.clone();
        Box::pin(async move {
            let mut deliveries = deliveries.write().await;
            let delivery = deliveries
                .get_mut(&delivery_id)
                .ok_or_else(|| CoreError::not_found(format!("delivery {delivery_id}")))?;
            delivery.status = DeliveryStatus::Success;
            delivery.response_code = Some(response_code);
            delivery.response_body = response_body;
            delivery.response_headers = response_headers;
            delivery.next_retry_at = None;
            delivery.error_message = None;
            Ok(())
        })
    }

    fn schedule_delivery_retry(
        &self,
        delivery_id: DeliveryId,
        next_retry_at: DateTime<Utc>,
        failure: AttemptFailure,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let deliveries = self.deliveries.clone();
        Box::pin(async move {
            let mut deliveries = deliveries.write().await;
            let delivery = deliveries
                .get_mut(&delivery_id)
                .ok_or_else(|| CoreError::not_found(format!("delivery {delivery_id}")))?;
            delivery.status = DeliveryStatus::Pending;
            delivery.next_retry_at = Some(next_retry_at);
            delivery.error_message = Some(failure.error_message);
            delivery.response_code = failure.response_code;
            delivery.response_body = failure.response_body;
            delivery.response_headers = failure.response_headers;
            Ok(())
        })
    }

    fn mark_delivery_failed(
        &self,
        delivery_id: DeliveryId,
        failure: AttemptFailure,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let deliveries = self.deliveries.clone();
        Box::pin(async move {
            let mut deliveries = deliveries.write().await;
            let delivery = deliveries
                .get_mut(&delivery_id)
                .ok_or_else(|| CoreError::not_found(format!("delivery {delivery_id}")))?;
            delivery.status = DeliveryStatus::Failed;
            delivery.next_retry_at = None;
            delivery.error_message = Some(failure.error_message);
            delivery.response_code = failure.response_code;
            delivery.response_body = failure.response_body;
            delivery.response_headers = failure.response_headers;
            Ok(())
        })
    }

    fn deliveries_for_event(
        &self,
        event_id: EventId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Delivery>>> + Send + '_>> {
        let deliveries = self.deliveries.clone();
        Box::pin(async move {
            let mut matching: Vec<Delivery> = deliveries
                .read()
                .await
                .values()
                .filter(|d| d.event_id == event_id)
                .cloned()
                .collect();
            matching.sort_by_key(|d| d.created_at);
            Ok(matching)
        })
    }

    fn deliveries_for_endpoint(
        &self,
        endpoint_id: EndpointId,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<Delivery>>> + Send + '_>> {
        let deliveries = self.deliveries.clone();
        Box::pin(async move {
            let mut matching: Vec<Delivery> = deliveries
                .read()
                .await
                .values()
                .filter(|d| d.endpoint_id == endpoint_id)
                .cloned()
                .collect();
            matching.sort_by_key(|d| d.created_at);
            Ok(matching)
        })
    }

    fn create_inbox_entry(
        &self,
        entry: InboxEntry,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let inbox = self.inbox.clone();
        Box::pin(async move {
            inbox.write().await.insert(entry.id, entry);
            Ok(())
        })
    }

    fn find_inbox_entry(
        &self,
        entry_id: InboxEntryId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<InboxEntry>>> + Send + '_>> {
        let inbox = self.inbox.clone();
        Box::pin(async move { Ok(inbox.read().await.get(&entry_id).cloned()) })
    }

    fn record_inbox_replay(
        &self,
        entry_id: InboxEntryId,
        replayed_at: DateTime<Utc>,
        response_code: Option<u16>,
        response_body: Option<String>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let inbox = self.inbox.clone();
        Box::pin(async move {
            let mut inbox = inbox.write().await;
            let entry = inbox
                .get_mut(&entry_id)
                .ok_or_else(|| CoreError::not_found(format!("inbox entry {entry_id}")))?;
            entry.replayed_at = Some(replayed_at);
            entry.replay_response_code = response_code;
            entry.replay_response_body = response_body;
            Ok(())
        })
    }

    fn list_inbox_entries(
        &self,
    ) -> Pin<Box<dyn Future<Output = Result<Vec<InboxEntry>>> + Send + '_>> {
        let inbox = self.inbox.clone();
        Box::pin(async move {
            let mut entries: Vec<InboxEntry> = inbox.read().await.values().cloned().collect();
            entries.sort_by(|a, b| b.created_at.cmp(&a.created_at));
            Ok(entries)
        })
    }

    fn clear_inbox(&self) -> Pin<Box<dyn Future<Output = Result<u64>> + Send + '_>> {
        let inbox = self.inbox.clone();
        Box::pin(async move {
            let mut inbox = inbox.write().await;
            let removed = inbox.len() as u64;
            inbox.clear();
            Ok(removed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(events: &[&str], enabled: bool) -> Endpoint {
        Endpoint {
            id: EndpointId::new(),
            name: "test".to_string(),
            url: "https://example.com/hook".to_string(),
            secret: "secret".to_string(),
            events: events.iter().map(|s| s.to_string()).collect(),
            enabled,
            created_at: Utc::now(),
        }
    }

    fn event(key: &str) -> Event {
        Event {
            id: EventId::new(),
            event_type: "completed".to_string(),
            entity_kind: "order".to_string(),
            entity_id: "1".to_string(),
            payload: serde_json::json!({}),
            idempotency_key: key.to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn duplicate_idempotency_key_is_rejected() {
        let storage = MemoryStorage::new();
        storage.create_event(event("key-1")).await.unwrap();

        let result = storage.create_event(event("key-1")).await;
        assert!(matches!(result, Err(CoreError::ConstraintViolation(_))));

        storage.create_event(event("key-2")).await.unwrap();
    }

    #[tokio::test]
    async fn subscription_query_filters_disabled_and_unsubscribed() {
        let storage = MemoryStorage::new();
        let subscribed = endpoint(&["order.completed"], true);
        let disabled = endpoint(&["order.completed"], false);
        let other = endpoint(&["invoice.paid"], true);

        let subscribed_id = subscribed.id;
        storage.create_endpoint(subscribed).await.unwrap();
        storage.create_endpoint(disabled).await.unwrap();
        storage.create_endpoint(other).await.unwrap();

        let matched = storage
            .endpoints_subscribed_to("order.completed".to_string())
            .await
            .unwrap();
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].id, subscribed_id);
    }

    #[tokio::test]
    async fn increment_attempt_returns_new_count() {
        let storage = MemoryStorage::new();
        let delivery = Delivery::new(EventId::new(), EndpointId::new(), Utc::now());
        let delivery_id = delivery.id;
        storage.create_deliveries(vec![delivery]).await.unwrap();

        let now = Utc::now();
        assert_eq!(storage.increment_attempt(delivery_id, now).await.unwrap(), 1);
        assert_eq!(storage.increment_attempt(delivery_id, now).await.unwrap(), 2);

        let stored = storage.find_delivery(delivery_id).await.unwrap().unwrap();
        assert_eq!(stored.attempt_count, 2);
        assert_eq!(stored.last_attempt_at, Some(now));
    }

    #[tokio::test]
    async fn success_clears_retry_state_and_error() {
        let storage = MemoryStorage::new();
        let delivery = Delivery::new(EventId::new(), EndpointId::new(), Utc::now());
        let delivery_id = delivery.id;
        storage.create_deliveries(vec![delivery]).await.unwrap();

        let failure = AttemptFailure {
            error_message: "HTTP 503: Service Unavailable".to_string(),
            response_code: Some(503),
            ..Default::default()
        };
        storage
            .schedule_delivery_retry(delivery_id, Utc::now(), failure)
            .await
            .unwrap();

        storage
            .mark_delivery_success(delivery_id, 200, Some("ok".to_string()), HashMap::new())
            .await
            .unwrap();

        let stored = storage.find_delivery(delivery_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Success);
        assert_eq!(stored.response_code, Some(200));
        assert!(stored.next_retry_at.is_none());
        assert!(stored.error_message.is_none());
    }

    #[tokio::test]
    async fn failed_delivery_has_no_scheduled_retry() {
        let storage = MemoryStorage::new();
        let delivery = Delivery::new(EventId::new(), EndpointId::new(), Utc::now());
        let delivery_id = delivery.id;
        storage.create_deliveries(vec![delivery]).await.unwrap();

        let failure = AttemptFailure {
            error_message: "connection refused".to_string(),
            ..Default::default()
        };
        storage.mark_delivery_failed(delivery_id, failure).await.unwrap();

        let stored = storage.find_delivery(delivery_id).await.unwrap().unwrap();
        assert_eq!(stored.status, DeliveryStatus::Failed);
        assert!(stored.next_retry_at.is_none());
        assert_eq!(stored.error_message.as_deref(), Some("connection refused"));
    }

    #[tokio::test]
    async fn clear_inbox_reports_removed_count() {
        let storage = MemoryStorage::new();
        for _ in 0..3 {
            let entry = InboxEntry {
                id: InboxEntryId::new(),
                delivery_id: None,
                url: "https://example.com".to_string(),
                payload: serde_json::json!({}),
                headers: HashMap::new(),
                replayed_at: None,
                replay_response_code: None,
                replay_response_body: None,
                created_at: Utc::now(),
            };
            storage.create_inbox_entry(entry).await.unwrap();
        }

        assert_eq!(storage.clear_inbox().await.unwrap(), 3);
        assert!(storage.list_inbox_entries().await.unwrap().is_empty());
    }
}
