//! Webhook delivery engine with retry, signing, and SSRF defense.
//!
//! This crate turns domain events into signed HTTP deliveries. Host
//! entities declare their event types, endpoints subscribe to them, and
//! every trigger fans out one pending delivery per subscribed enabled
//! endpoint. A worker pool drives delivery attempts with exponential
//! backoff until success or the attempt budget runs out.
//!
//! # Architecture
//!
//! Each attempt runs a fixed state machine:
//!
//! 1. **Load and gate** - missing or terminal deliveries are no-ops
//! 2. **Inbox capture** - in development mode the request is stored, not sent
//! 3. **Consume attempt** - the counter is persisted before the network call
//! 4. **Validate destination** - SSRF rules re-checked at send time
//! 5. **Send and settle** - 2xx succeeds; failures retry with backoff or
//!    fail terminally
//!
//! Persistence and queueing are trait seams (`hookwire_core::Storage`,
//! [`queue::DeliveryQueue`]) so hosts can bring their own database and job
//! system; in-memory implementations are bundled.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hookwire_core::{MemoryStorage, WebhookConfig};
//! use hookwire_delivery::{DeliveryEngine, EventRegistry};
//!
//! # async fn example() -> hookwire_delivery::Result<()> {
//! let mut registry = EventRegistry::new();
//! registry.declare("order", &["completed"]);
//!
//! let storage = Arc::new(MemoryStorage::new());
//! let mut engine =
//!     DeliveryEngine::with_defaults(storage, Arc::new(registry), WebhookConfig::default())?;
//! engine.start().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod dispatcher;
pub mod endpoints;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod inbox;
pub mod queue;
pub mod retry;
pub mod url_guard;
mod worker;
mod worker_pool;

pub use dispatcher::{AttemptOutcome, Dispatcher};
pub use endpoints::{EndpointManager, EndpointStats};
pub use engine::{DeliveryEngine, EngineConfig, EngineStats};
pub use error::{DeliveryError, Result};
pub use fanout::{EventFanout, EventRegistry, Eventable, TriggerOutcome};
pub use inbox::InboxManager;
pub use queue::{DeliveryQueue, InProcessQueue};
pub use retry::RetryPolicy;
pub use url_guard::{DestinationPolicy, HostResolver, SystemResolver, UrlGuard};

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 3;

/// Default number of due deliveries claimed per worker poll.
pub const DEFAULT_BATCH_SIZE: usize = 10;
