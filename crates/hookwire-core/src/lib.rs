//! Core domain models and contracts for the Hookwire delivery engine.
//!
//! Provides strongly-typed domain primitives (endpoints, events, deliveries,
//! inbox entries), HMAC-SHA256 payload signing, runtime configuration, the
//! durable-store contract, and the instrumentation sink interface. All other
//! crates depend on these foundational types for type safety and consistency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod error;
pub mod instrument;
pub mod models;
pub mod signature;
pub mod storage;
pub mod time;

pub use config::{SharedConfig, WebhookConfig};
pub use error::{CoreError, Result};
pub use instrument::{InstrumentationSink, MulticastSink, NoOpSink, Record};
pub use models::{
    Delivery, DeliveryId, DeliveryStatus, Endpoint, EndpointId, Event, EventId, InboxEntry,
    InboxEntryId,
};
pub use signature::{secure_compare, sign, verify, SignatureError};
pub use storage::{AttemptFailure, MemoryStorage, Storage};
pub use time::{Clock, RealClock, TestClock};
