//! Core domain models and strongly-typed identifiers.
//!
//! Defines endpoints, events, deliveries, inbox entries, and newtype ID
//! wrappers for compile-time type safety. Deliveries carry the per-attempt
//! state machine driven by the dispatcher.

use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! typed_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub Uuid);

        impl $name {
            /// Creates a new random identifier.
            ///
            /// Uses UUID v4 for globally unique identifiers without
            /// coordination.
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

typed_id! {
    /// Strongly-typed endpoint identifier.
    EndpointId
}

typed_id! {
    /// Strongly-typed event identifier.
    ///
    /// Events are immutable once created, and this ID follows them through
    /// their entire lifecycle.
    EventId
}

typed_id! {
    /// Strongly-typed delivery identifier.
    ///
    /// One delivery represents the attempt series of sending one event to
    /// one endpoint.
    DeliveryId
}

typed_id! {
    /// Strongly-typed inbox entry identifier.
    InboxEntryId
}

/// A registered webhook destination.
///
/// Endpoints are created by the host application. The signing secret is
/// generated once at registration and is immutable afterwards: the same
/// secret signs every delivery for this endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Endpoint {
    /// Unique identifier for this endpoint.
    pub id: EndpointId,

    /// Human-readable name.
    pub name: String,

    /// Destination URL. Validated against SSRF criteria at registration and
    /// again before every send.
    pub url: String,

    /// Opaque signing key. Immutable after creation.
    pub secret: String,

    /// Full event names this endpoint is subscribed to, e.g.
    /// `"order.completed"`. Matching is exact string membership.
    pub events: Vec<String>,

    /// Whether deliveries are created for this endpoint. Disabled endpoints
    /// are skipped by fan-out but keep their history.
    pub enabled: bool,

    /// When the endpoint was registered.
    pub created_at: DateTime<Utc>,
}

impl Endpoint {
    /// Returns true if this endpoint subscribes to the given full event
    /// name.
    pub fn subscribed_to(&self, event_name: &str) -> bool {
        self.events.iter().any(|e| e == event_name)
    }
}

/// An immutable record of something that happened.
///
/// Created exactly once per trigger call. The idempotency key is unique
/// across all events, assigned at creation, and never reused; receivers use
/// it to deduplicate retried deliveries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    /// Unique identifier for this event.
    pub id: EventId,

    /// The declared event type, e.g. `"completed"`.
    pub event_type: String,

    /// Kind of the originating entity, e.g. `"order"`. Used only to build
    /// the full event name; the engine never dereferences the entity.
    pub entity_kind: String,

    /// Opaque identifier of the originating entity.
    pub entity_id: String,

    /// Structured payload delivered to subscribers.
    pub payload: serde_json::Value,

    /// Unique token allowing receivers to deduplicate retried deliveries.
    pub idempotency_key: String,

    /// When the event was created.
    pub created_at: DateTime<Utc>,
}

impl Event {
    /// Returns the full event name, e.g. `"order.completed"`.
    pub fn full_event_name(&self) -> String {
        format!("{}.{}", self.entity_kind, self.event_type)
    }
}

/// Delivery lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    /// Awaiting the first attempt or a scheduled retry.
    Pending,
    /// Terminal: the endpoint acknowledged with a 2xx response.
    Success,
    /// Terminal: retries exhausted or a non-retryable failure occurred.
    Failed,
}

impl DeliveryStatus {
    /// Returns true for terminal states that must never be attempted again.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Failed)
    }
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::Success => write!(f, "success"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// The persisted state machine for one (event, endpoint) attempt series.
///
/// Created by fan-out in `pending` state with `attempt_count` 0 and mutated
/// only by the dispatcher. Exactly one delivery exists per (event, endpoint)
/// pair; deliveries are never merged or deduplicated later.
///
/// Invariants maintained by the dispatcher:
/// - `attempt_count` increases by exactly 1 per attempt, before the network
///   call is issued.
/// - `Success` implies `next_retry_at` and `error_message` are `None`.
/// - `Pending` with a `next_retry_at` means a retry is scheduled.
/// - `Failed` implies `next_retry_at` is `None`; failed deliveries are never
///   retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Delivery {
    /// Unique identifier for this delivery.
    pub id: DeliveryId,

    /// The event being delivered.
    pub event_id: EventId,

    /// The destination endpoint.
    pub endpoint_id: EndpointId,

    /// Current lifecycle state.
    pub status: DeliveryStatus,

    /// Number of attempts made so far. Monotonically non-decreasing.
    pub attempt_count: u32,

    /// When the most recent attempt finished.
    pub last_attempt_at: Option<DateTime<Utc>>,

    /// When the next retry becomes eligible, if one is scheduled.
    pub next_retry_at: Option<DateTime<Utc>>,

    /// HTTP status of the most recent response, if any.
    pub response_code: Option<u16>,

    /// Body of the most recent response, truncated by the dispatcher.
    pub response_body: Option<String>,

    /// Headers of the most recent response.
    pub response_headers: HashMap<String, String>,

    /// Error description of the most recent failed attempt.
    pub error_message: Option<String>,

    /// When the delivery was created by fan-out.
    pub created_at: DateTime<Utc>,
}

impl Delivery {
    /// Creates a fresh pending delivery for one (event, endpoint) pair.
    pub fn new(event_id: EventId, endpoint_id: EndpointId, created_at: DateTime<Utc>) -> Self {
        Self {
            id: DeliveryId::new(),
            event_id,
            endpoint_id,
            status: DeliveryStatus::Pending,
            attempt_count: 0,
            last_attempt_at: None,
            next_retry_at: None,
            response_code: None,
            response_body: None,
            response_headers: HashMap::new(),
            error_message: None,
            created_at,
        }
    }
}

/// A captured outbound request, recorded instead of sent when inbox mode is
/// enabled.
///
/// Entries are independently replayable; replay re-validates the destination
/// URL because DNS answers can change between capture and replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboxEntry {
    /// Unique identifier for this entry.
    pub id: InboxEntryId,

    /// The delivery this entry was captured from, if still known.
    pub delivery_id: Option<DeliveryId>,

    /// Destination URL the request would have been sent to.
    pub url: String,

    /// Payload that would have been sent.
    pub payload: serde_json::Value,

    /// Request headers, including the signature, as they would have been
    /// sent.
    pub headers: HashMap<String, String>,

    /// When the entry was last replayed.
    pub replayed_at: Option<DateTime<Utc>>,

    /// HTTP status of the last replay response.
    pub replay_response_code: Option<u16>,

    /// Body of the last replay response.
    pub replay_response_body: Option<String>,

    /// When the entry was captured.
    pub created_at: DateTime<Utc>,
}

impl InboxEntry {
    /// Returns the event type recorded in the captured headers.
    pub fn event_type(&self) -> Option<&str> {
        self.headers.get("X-Webhook-Event").map(String::as_str)
    }

    /// Returns the signature recorded in the captured headers.
    pub fn signature(&self) -> Option<&str> {
        self.headers.get("X-Webhook-Signature").map(String::as_str)
    }
}
