//! Delivery attempt state machine.
//!
//! One `attempt` call drives one delivery through a complete attempt: load
//! and terminal-state check, inbox capture when enabled, attempt counter
//! increment, destination re-validation, signed HTTP send, and the
//! success / retry / terminal-failure transition. The attempt counter is
//! persisted before the network call, so a crash mid-send still consumes
//! the attempt.

use std::{collections::HashMap, sync::Arc};

use bytes::Bytes;
use chrono::{DateTime, Utc};
use hookwire_core::{
    instrument::{self, InstrumentationSink, Record},
    signature, AttemptFailure, Clock, CoreError, Delivery, DeliveryId, Endpoint, Event,
    InboxEntry, InboxEntryId, SharedConfig, Storage, WebhookConfig,
};
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::{
    client::{DeliveryClient, WireRequest, WireResponse},
    error::{DeliveryError, Result},
    queue::DeliveryQueue,
    retry::RetryPolicy,
    url_guard::DestinationPolicy,
};

/// Outcome of one dispatch attempt, for stats and logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Endpoint acknowledged with 2xx.
    Delivered,
    /// Request captured into the inbox instead of being sent.
    Captured,
    /// Attempt failed; a retry is scheduled.
    RetryScheduled,
    /// Attempt failed terminally.
    Failed,
    /// Nothing to do: record missing or already terminal.
    Skipped,
}

/// Drives individual delivery attempts.
pub struct Dispatcher {
    storage: Arc<dyn Storage>,
    queue: Arc<dyn DeliveryQueue>,
    client: DeliveryClient,
    destination_policy: Arc<dyn DestinationPolicy>,
    config: SharedConfig,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn InstrumentationSink>,
}

impl Dispatcher {
    /// Creates a dispatcher over the given collaborators.
    pub fn new(
        storage: Arc<dyn Storage>,
        queue: Arc<dyn DeliveryQueue>,
        client: DeliveryClient,
        destination_policy: Arc<dyn DestinationPolicy>,
        config: SharedConfig,
        clock: Arc<dyn Clock>,
        sink: Arc<dyn InstrumentationSink>,
    ) -> Self {
        Self { storage, queue, client, destination_policy, config, clock, sink }
    }

    /// Runs one delivery attempt for `delivery_id`.
    ///
    /// Idempotent against stale queue entries: a missing record or a
    /// delivery already in a terminal state is a logged no-op. Returns an
    /// error only for storage failures; attempt failures are absorbed into
    /// the delivery record and the retry schedule.
    pub async fn attempt(&self, delivery_id: DeliveryId) -> Result<AttemptOutcome> {
        let Some(delivery) = self.storage.find_delivery(delivery_id).await? else {
            warn!(delivery_id = %delivery_id, "delivery record missing, skipping attempt");
            return Ok(AttemptOutcome::Skipped);
        };

        if delivery.status.is_terminal() {
            debug!(
                delivery_id = %delivery_id,
                status = %delivery.status,
                "delivery already terminal, skipping attempt"
            );
            return Ok(AttemptOutcome::Skipped);
        }

        // An event or endpoint row deleted out from under a queued delivery
        // is a stale reference, handled like a missing delivery record.
        let event = match self.storage.find_event(delivery.event_id).await {
            Ok(event) => event,
            Err(CoreError::NotFound(_)) => {
                warn!(
                    delivery_id = %delivery_id,
                    event_id = %delivery.event_id,
                    "event record missing, skipping attempt"
                );
                return Ok(AttemptOutcome::Skipped);
            },
            Err(error) => return Err(error.into()),
        };
        let endpoint = match self.storage.find_endpoint(delivery.endpoint_id).await {
            Ok(endpoint) => endpoint,
            Err(CoreError::NotFound(_)) => {
                warn!(
                    delivery_id = %delivery_id,
                    endpoint_id = %delivery.endpoint_id,
                    "endpoint record missing, skipping attempt"
                );
                return Ok(AttemptOutcome::Skipped);
            },
            Err(error) => return Err(error.into()),
        };

        // Snapshot once; a config flip mid-attempt affects only later
        // attempts.
        let config = self.config.snapshot();

        let span = info_span!(
            "webhook_dispatch",
            delivery_id = %delivery.id,
            event_id = %event.id,
            endpoint_id = %endpoint.id,
            url = %endpoint.url,
        );

        async move {
            if config.enable_inbox {
                return self.capture_to_inbox(&delivery, &event, &endpoint, &config).await;
            }

            let now = self.clock.now_utc();
            let attempt_number = self.storage.increment_attempt(delivery.id, now).await?;

            match self.send(&delivery, &event, &endpoint, &config, attempt_number, now).await {
                Ok(response) if response.is_success() => {
                    self.handle_success(&delivery, &event, &endpoint, attempt_number, &response)
                        .await
                },
                Ok(response) => {
                    let error = categorize_response(&response);
                    self.handle_failure(
                        &delivery,
                        &event,
                        &endpoint,
                        &config,
                        attempt_number,
                        &error,
                        Some(&response),
                    )
                    .await
                },
                Err(error) => {
                    self.handle_failure(
                        &delivery,
                        &event,
                        &endpoint,
                        &config,
                        attempt_number,
                        &error,
                        None,
                    )
                    .await
                },
            }
        }
        .instrument(span)
        .await
    }

    async fn send(
        &self,
        delivery: &Delivery,
        event: &Event,
        endpoint: &Endpoint,
        config: &WebhookConfig,
        attempt_number: u32,
        now: DateTime<Utc>,
    ) -> Result<WireResponse> {
        // Re-validate right before the send: DNS answers can change between
        // registration and dispatch.
        self.destination_policy.check(&endpoint.url).await?;

        let body = serialize_payload(event)?;
        let headers =
            build_request_headers(delivery, event, endpoint, config, attempt_number, now, &body)?;

        self.client.send(WireRequest { url: endpoint.url.clone(), body, headers }).await
    }

    async fn handle_success(
        &self,
        delivery: &Delivery,
        event: &Event,
        endpoint: &Endpoint,
        attempt_number: u32,
        response: &WireResponse,
    ) -> Result<AttemptOutcome> {
        self.storage
            .mark_delivery_success(
                delivery.id,
                response.status_code,
                Some(response.body.clone()),
                response.headers.clone(),
            )
            .await?;

        info!(
            status = response.status_code,
            attempt = attempt_number,
            duration_ms = response.duration.as_millis(),
            "webhook delivered"
        );

        self.emit_delivered(delivery, event, endpoint, "success", attempt_number);
        Ok(AttemptOutcome::Delivered)
    }

    async fn handle_failure(
        &self,
        delivery: &Delivery,
        event: &Event,
        endpoint: &Endpoint,
        config: &WebhookConfig,
        attempt_number: u32,
        error: &DeliveryError,
        response: Option<&WireResponse>,
    ) -> Result<AttemptOutcome> {
        let failure = failure_record(error, response);
        let policy = RetryPolicy::from_config(config);

        if error.is_retryable() && policy.should_retry(attempt_number) {
            let next_retry_at = policy.next_retry_at(self.clock.now_utc(), attempt_number);
            self.storage
                .schedule_delivery_retry(delivery.id, next_retry_at, failure)
                .await?;
            self.queue.enqueue(delivery.id, next_retry_at).await?;

            warn!(
                attempt = attempt_number,
                next_retry_at = %next_retry_at,
                error = %error,
                "webhook delivery failed, retry scheduled"
            );

            self.emit_delivered(delivery, event, endpoint, "pending", attempt_number);
            Ok(AttemptOutcome::RetryScheduled)
        } else {
            self.storage.mark_delivery_failed(delivery.id, failure).await?;

            error!(
                attempt = attempt_number,
                error = %error,
                "webhook delivery permanently failed"
            );

            self.emit_delivered(delivery, event, endpoint, "failed", attempt_number);
            Ok(AttemptOutcome::Failed)
        }
    }

    async fn capture_to_inbox(
        &self,
        delivery: &Delivery,
        event: &Event,
        endpoint: &Endpoint,
        config: &WebhookConfig,
    ) -> Result<AttemptOutcome> {
        let now = self.clock.now_utc();
        let body = serialize_payload(event)?;
        let headers = build_request_headers(
            delivery,
            event,
            endpoint,
            config,
            delivery.attempt_count,
            now,
            &body,
        )?;

        let entry = InboxEntry {
            id: InboxEntryId::new(),
            delivery_id: Some(delivery.id),
            url: endpoint.url.clone(),
            payload: event.payload.clone(),
            headers,
            replayed_at: None,
            replay_response_code: None,
            replay_response_body: None,
            created_at: now,
        };
        let entry_id = entry.id;
        self.storage.create_inbox_entry(entry).await?;

        self.storage
            .mark_delivery_success(
                delivery.id,
                200,
                Some("Stored in inbox (development mode)".to_string()),
                HashMap::new(),
            )
            .await?;

        debug!(inbox_entry_id = %entry_id, "webhook captured to inbox");

        self.sink.emit(
            Record::new(instrument::INBOX_STORED)
                .field("inbox_entry_id", entry_id.to_string())
                .field("delivery_id", delivery.id.to_string())
                .field("url", endpoint.url.clone()),
        );
        self.emit_delivered(delivery, event, endpoint, "success", delivery.attempt_count);

        Ok(AttemptOutcome::Captured)
    }

    fn emit_delivered(
        &self,
        delivery: &Delivery,
        event: &Event,
        endpoint: &Endpoint,
        status: &str,
        attempt_number: u32,
    ) {
        self.sink.emit(
            Record::new(instrument::DELIVERED)
                .field("delivery_id", delivery.id.to_string())
                .field("endpoint_id", endpoint.id.to_string())
                .field("event_type", event.event_type.clone())
                .field("status", status)
                .field("attempt_count", attempt_number),
        );
    }
}

/// Serializes the event payload to the exact bytes that get signed and
/// sent.
fn serialize_payload(event: &Event) -> Result<Bytes> {
    serde_json::to_vec(&event.payload)
        .map(Bytes::from)
        .map_err(|e| DeliveryError::internal(format!("payload serialization failed: {e}")))
}

/// Builds the full outbound header set for one attempt.
pub(crate) fn build_request_headers(
    delivery: &Delivery,
    event: &Event,
    endpoint: &Endpoint,
    config: &WebhookConfig,
    attempt_number: u32,
    now: DateTime<Utc>,
    body: &[u8],
) -> Result<HashMap<String, String>> {
    let signed = signature::sign(&endpoint.secret, body)
        .map_err(|e| DeliveryError::configuration(format!("cannot sign payload: {e}")))?;

    let mut headers = HashMap::with_capacity(8);
    headers.insert("Content-Type".to_string(), "application/json".to_string());
    headers.insert("User-Agent".to_string(), config.user_agent.clone());
    headers.insert("X-Webhook-Signature".to_string(), signed);
    headers.insert("X-Webhook-Event".to_string(), event.event_type.clone());
    headers.insert("X-Webhook-Delivery-Id".to_string(), delivery.id.to_string());
    headers.insert("X-Webhook-Attempt".to_string(), attempt_number.to_string());
    headers.insert("X-Webhook-Timestamp".to_string(), now.to_rfc3339());
    headers.insert("X-Webhook-Idempotency-Key".to_string(), event.idempotency_key.clone());
    Ok(headers)
}

/// Maps a non-2xx response to its error category.
///
/// 5xx responses are receiver trouble; everything else is the receiver
/// refusing the request. Both categories retry until the attempt budget
/// runs out. Redirects are disabled, so a 3xx counts as a refusal.
fn categorize_response(response: &WireResponse) -> DeliveryError {
    match response.status_code {
        500..=599 => DeliveryError::server_error(response.status_code, response.body.clone()),
        other => DeliveryError::client_error(other, response.body.clone()),
    }
}

/// Looks up the canonical reason phrase for an HTTP status code.
fn status_reason(status_code: u16) -> &'static str {
    reqwest::StatusCode::from_u16(status_code)
        .ok()
        .and_then(|status| status.canonical_reason())
        .unwrap_or("Unknown Status")
}

/// Converts an attempt error into the failure details stored on the
/// delivery record.
fn failure_record(error: &DeliveryError, response: Option<&WireResponse>) -> AttemptFailure {
    match error {
        DeliveryError::ClientError { status_code, body }
        | DeliveryError::ServerError { status_code, body } => AttemptFailure {
            error_message: format!("HTTP {status_code}: {}", status_reason(*status_code)),
            response_code: Some(*status_code),
            response_body: Some(body.clone()),
            response_headers: response.map(|r| r.headers.clone()).unwrap_or_default(),
        },
        other => AttemptFailure { error_message: other.to_string(), ..Default::default() },
    }
}

#[cfg(test)]
mod tests {
    use hookwire_core::{DeliveryStatus, EndpointId, EventId};

    use super::*;

    fn fixtures() -> (Delivery, Event, Endpoint) {
        let now = Utc::now();
        let endpoint = Endpoint {
            id: EndpointId::new(),
            name: "billing".to_string(),
            url: "https://hooks.example.com/billing".to_string(),
            secret: "super-secret".to_string(),
            events: vec!["order.completed".to_string()],
            enabled: true,
            created_at: now,
        };
        let event = Event {
            id: EventId::new(),
            event_type: "completed".to_string(),
            entity_kind: "order".to_string(),
            entity_id: "42".to_string(),
            payload: serde_json::json!({"order_id": 42}),
            idempotency_key: "idem-123".to_string(),
            created_at: now,
        };
        let delivery = Delivery::new(event.id, endpoint.id, now);
        (delivery, event, endpoint)
    }

    #[test]
    fn request_headers_carry_wire_contract() {
        let (delivery, event, endpoint) = fixtures();
        let config = WebhookConfig::default();
        let now = Utc::now();
        let body = serde_json::to_vec(&event.payload).unwrap();

        let headers =
            build_request_headers(&delivery, &event, &endpoint, &config, 1, now, &body).unwrap();

        assert_eq!(headers["Content-Type"], "application/json");
        assert_eq!(headers["User-Agent"], config.user_agent);
        assert!(headers["X-Webhook-Signature"].starts_with("sha256="));
        assert_eq!(headers["X-Webhook-Event"], "completed");
        assert_eq!(headers["X-Webhook-Delivery-Id"], delivery.id.to_string());
        assert_eq!(headers["X-Webhook-Attempt"], "1");
        assert_eq!(headers["X-Webhook-Timestamp"], now.to_rfc3339());
        assert_eq!(headers["X-Webhook-Idempotency-Key"], "idem-123");
    }

    #[test]
    fn signature_verifies_against_sent_body() {
        let (delivery, event, endpoint) = fixtures();
        let config = WebhookConfig::default();
        let body = serde_json::to_vec(&event.payload).unwrap();

        let headers =
            build_request_headers(&delivery, &event, &endpoint, &config, 1, Utc::now(), &body)
                .unwrap();

        let received = &headers["X-Webhook-Signature"];
        assert!(signature::verify(&endpoint.secret, &body, received).unwrap());
    }

    #[test]
    fn empty_secret_is_a_configuration_error() {
        let (delivery, event, mut endpoint) = fixtures();
        endpoint.secret = String::new();
        let config = WebhookConfig::default();

        let result = build_request_headers(
            &delivery,
            &event,
            &endpoint,
            &config,
            1,
            Utc::now(),
            b"{}",
        );
        assert!(matches!(result, Err(DeliveryError::Configuration { .. })));
    }

    #[test]
    fn http_failures_keep_response_details() {
        let error = DeliveryError::server_error(503, "unavailable");
        let failure = failure_record(&error, None);

        assert_eq!(failure.error_message, "HTTP 503: Service Unavailable");
        assert_eq!(failure.response_code, Some(503));
        assert_eq!(failure.response_body.as_deref(), Some("unavailable"));
    }

    #[test]
    fn failure_message_survives_unregistered_status_codes() {
        let error = DeliveryError::client_error(499, "client closed request");
        let failure = failure_record(&error, None);
        assert_eq!(failure.error_message, "HTTP 499: Unknown Status");
    }

    #[test]
    fn transport_failures_have_no_response_details() {
        let error = DeliveryError::network("connection refused");
        let failure = failure_record(&error, None);

        assert!(failure.error_message.contains("connection refused"));
        assert!(failure.response_code.is_none());
        assert!(failure.response_body.is_none());
    }

    #[test]
    fn fresh_delivery_is_not_terminal() {
        let (delivery, _, _) = fixtures();
        assert_eq!(delivery.status, DeliveryStatus::Pending);
        assert!(!delivery.status.is_terminal());
    }
}
