//! Runtime configuration for the delivery engine.
//!
//! Configuration is shared behind a lock so the host application can change
//! settings at runtime. Each dispatch takes a snapshot at the start of the
//! attempt; a flip of `enable_inbox` mid-flight affects only subsequent
//! attempts.

use std::{
    sync::{Arc, RwLock},
    time::Duration,
};

use serde::{Deserialize, Serialize};

/// Default cap on delivery attempts per delivery.
pub const DEFAULT_MAX_RETRY_ATTEMPTS: u32 = 5;

/// Default base delay for exponential backoff.
pub const DEFAULT_INITIAL_RETRY_DELAY: Duration = Duration::from_secs(60);

/// Default ceiling on any single backoff delay.
pub const DEFAULT_MAX_RETRY_DELAY: Duration = Duration::from_secs(3600);

/// Default per-request timeout for outbound HTTP.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

/// Engine settings adjustable at runtime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    /// Maximum delivery attempts before a delivery fails terminally.
    pub max_retry_attempts: u32,

    /// Base delay for exponential backoff.
    pub initial_retry_delay: Duration,

    /// Ceiling on any single backoff delay.
    pub max_retry_delay: Duration,

    /// Per-request timeout covering connect, send, and response read.
    pub timeout: Duration,

    /// When true, outbound requests are captured into the inbox instead of
    /// being sent, and the delivery is marked successful.
    pub enable_inbox: bool,

    /// User-Agent header value on outbound requests.
    pub user_agent: String,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            max_retry_attempts: DEFAULT_MAX_RETRY_ATTEMPTS,
            initial_retry_delay: DEFAULT_INITIAL_RETRY_DELAY,
            max_retry_delay: DEFAULT_MAX_RETRY_DELAY,
            timeout: DEFAULT_TIMEOUT,
            enable_inbox: false,
            user_agent: format!("Hookwire/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// Shared handle to live configuration.
///
/// Cheap to clone. Readers take a point-in-time snapshot; writers swap
/// settings without disturbing attempts already in flight.
#[derive(Debug, Clone, Default)]
pub struct SharedConfig {
    inner: Arc<RwLock<WebhookConfig>>,
}

impl SharedConfig {
    /// Creates a shared handle from an initial configuration.
    pub fn new(config: WebhookConfig) -> Self {
        Self {
            inner: Arc::new(RwLock::new(config)),
        }
    }

    /// Returns a snapshot of the current configuration.
    pub fn snapshot(&self) -> WebhookConfig {
        match self.inner.read() {
            Ok(guard) => guard.clone(),
            // A poisoned lock still holds valid settings.
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Applies a mutation to the live configuration.
    pub fn update(&self, mutate: impl FnOnce(&mut WebhookConfig)) {
        match self.inner.write() {
            Ok(mut guard) => mutate(&mut guard),
            Err(poisoned) => mutate(&mut poisoned.into_inner()),
        }
    }

    /// Replaces the live configuration wholesale.
    pub fn replace(&self, config: WebhookConfig) {
        self.update(|current| *current = config);
    }
}
