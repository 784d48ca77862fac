//! Exponential backoff retry scheduling.
//!
//! Failed deliveries are retried with a delay of `initial_delay * 2^n`
//! capped at `max_delay`, where `n` is the number of attempts already made.
//! Once `max_attempts` attempts are consumed the delivery fails terminally.

use std::time::Duration;

use chrono::{DateTime, Utc};
use hookwire_core::WebhookConfig;
use serde::{Deserialize, Serialize};

/// Retry policy for failed deliveries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum delivery attempts, including the first.
    pub max_attempts: u32,

    /// Base delay for exponential backoff.
    pub initial_delay: Duration,

    /// Ceiling on any single backoff delay.
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_secs(60),
            max_delay: Duration::from_secs(3600),
        }
    }
}

impl RetryPolicy {
    /// Builds a policy from the live engine configuration.
    pub fn from_config(config: &WebhookConfig) -> Self {
        Self {
            max_attempts: config.max_retry_attempts,
            initial_delay: config.initial_retry_delay,
            max_delay: config.max_retry_delay,
        }
    }

    /// Returns true if another attempt is allowed after `attempts_made`
    /// attempts.
    pub fn should_retry(&self, attempts_made: u32) -> bool {
        attempts_made < self.max_attempts
    }

    /// Calculates the backoff delay after `attempts_made` attempts.
    ///
    /// With defaults: attempt 1 waits 120s, attempt 2 waits 240s, attempt 3
    /// waits 480s, attempt 4 waits 960s. The exponent is capped so large
    /// attempt counts cannot overflow the multiplication.
    pub fn backoff_delay(&self, attempts_made: u32) -> Duration {
        let exponent = attempts_made.min(20);
        let multiplier = 2_u32.saturating_pow(exponent);
        let delay = self.initial_delay.saturating_mul(multiplier);
        delay.min(self.max_delay)
    }

    /// Computes when the next retry becomes eligible.
    pub fn next_retry_at(&self, failed_at: DateTime<Utc>, attempts_made: u32) -> DateTime<Utc> {
        let delay = self.backoff_delay(attempts_made);
        failed_at
            + chrono::Duration::from_std(delay)
                .unwrap_or_else(|_| chrono::Duration::seconds(self.max_delay.as_secs() as i64))
    }
}
