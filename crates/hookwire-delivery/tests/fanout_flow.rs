//! Trigger-to-delivery flow: fan-out, queue claiming, and dispatch.

use std::sync::Arc;

use hookwire_core::{Clock, DeliveryStatus, Storage};
use hookwire_delivery::{AttemptOutcome, EventRegistry, Eventable};
use hookwire_testing::TestEnv;
use wiremock::{
    matchers::{method, path},
    Mock, MockServer, ResponseTemplate,
};

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
    registry.declare("order", &["completed"]);
    Arc::new(registry)
}

#[tokio::test]
async fn trigger_fans_out_to_every_subscribed_endpoint() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/billing"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/analytics"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let env = TestEnv::new();
    env.create_endpoint(&format!("{}/billing", server.uri()), &["order.completed"]).await;
    env.create_endpoint(&format!("{}/analytics", server.uri()), &["order.completed"]).await;
    // Subscribed elsewhere; must not receive anything.
    env.create_endpoint(&format!("{}/other", server.uri()), &["invoice.paid"]).await;

    let fanout = env.fanout(registry());
    let outcome = fanout.trigger(&Order { id: 42 }, "completed", None).await.unwrap();
    assert_eq!(outcome.delivery_ids.len(), 2);

    // Workers would claim exactly what fan-out enqueued.
    let due = env.queue.claim_due(env.clock.now_utc(), 10).await;
    assert_eq!(due.len(), 2);

    let dispatcher = env.dispatcher();
    for delivery_id in due {
        assert_eq!(dispatcher.attempt(delivery_id).await.unwrap(), AttemptOutcome::Delivered);
    }

    for delivery_id in &outcome.delivery_ids {
        assert_eq!(env.delivery(*delivery_id).await.status, DeliveryStatus::Success);
    }

    let triggered = env.sink.records_named("webhook.triggered");
    assert_eq!(triggered.len(), 1);
    assert_eq!(triggered[0].fields["deliveries_count"], serde_json::json!(2));
}

#[tokio::test]
async fn failed_delivery_recovers_through_the_queue() {
    let server = MockServer::start().await;
    // First attempt fails, the retry lands on the healthy handler.
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let env = TestEnv::new();
    env.create_endpoint(&server.uri(), &["order.completed"]).await;

    let fanout = env.fanout(registry());
    let outcome = fanout.trigger(&Order { id: 1 }, "completed", None).await.unwrap();
    let delivery_id = outcome.delivery_ids[0];

    let dispatcher = env.dispatcher();

    let due = env.queue.claim_due(env.clock.now_utc(), 10).await;
    assert_eq!(due, vec![delivery_id]);
    assert_eq!(dispatcher.attempt(delivery_id).await.unwrap(), AttemptOutcome::RetryScheduled);

    // Not due again until the backoff elapses.
    assert!(env.queue.claim_due(env.clock.now_utc(), 10).await.is_empty());
    env.advance(std::time::Duration::from_secs(120));

    let due = env.queue.claim_due(env.clock.now_utc(), 10).await;
    assert_eq!(due, vec![delivery_id]);
    assert_eq!(dispatcher.attempt(delivery_id).await.unwrap(), AttemptOutcome::Delivered);

    let delivery = env.delivery(delivery_id).await;
    assert_eq!(delivery.status, DeliveryStatus::Success);
    assert_eq!(delivery.attempt_count, 2);
}

#[tokio::test]
async fn disabled_endpoint_is_skipped_by_fanout() {
    let env = TestEnv::new();
    let endpoint = env.create_endpoint("https://hooks.example.com/x", &["order.completed"]).await;
    env.endpoint_manager().disable(endpoint.id).await.unwrap();

    let fanout = env.fanout(registry());
    let outcome = fanout.trigger(&Order { id: 5 }, "completed", None).await.unwrap();

    // The event exists; no deliveries were created for it.
    assert!(outcome.delivery_ids.is_empty());
    assert!(env.storage.find_event(outcome.event_id).await.is_ok());
    assert!(env.queue.is_empty().await);
}
