//! Delayed task queue feeding delivery workers.
//!
//! Fan-out and retry scheduling enqueue delivery IDs with an eligibility
//! time; workers claim entries whose time has come and run one dispatch
//! attempt each. Hosts with an external job system implement
//! `DeliveryQueue` themselves; `InProcessQueue` is the bundled
//! implementation.

use std::{
    cmp::Reverse,
    collections::BinaryHeap,
    future::Future,
    pin::Pin,
    sync::Arc,
};

use chrono::{DateTime, Utc};
use hookwire_core::DeliveryId;
use tokio::sync::Mutex;

use crate::error::Result;

/// Destination for scheduled delivery attempts.
pub trait DeliveryQueue: Send + Sync + std::fmt::Debug + 'static {
    /// Enqueues a delivery attempt that becomes eligible at `not_before`.
    ///
    /// Enqueueing the same delivery twice is harmless; the dispatcher's
    /// terminal-state check makes extra attempts no-ops.
    fn enqueue(
        &self,
        delivery_id: DeliveryId,
        not_before: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

#[derive(Debug, PartialEq, Eq)]
struct QueueEntry {
    not_before: DateTime<Utc>,
    delivery_id: DeliveryId,
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.not_before
            .cmp(&other.not_before)
            .then_with(|| self.delivery_id.0.cmp(&other.delivery_id.0))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// In-process delayed queue ordered by eligibility time.
#[derive(Debug, Default)]
pub struct InProcessQueue {
    heap: Arc<Mutex<BinaryHeap<Reverse<QueueEntry>>>>,
}

impl InProcessQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims up to `limit` entries eligible at `now`, earliest first.
    ///
    /// Claimed entries are removed; a crashed worker loses them, which is
    /// acceptable because the durable delivery record is the source of
    /// truth, not the queue.
    pub async fn claim_due(&self, now: DateTime<Utc>, limit: usize) -> Vec<DeliveryId> {
        let mut heap = self.heap.lock().await;
        let mut claimed = Vec::new();

        while claimed.len() < limit {
            match heap.peek() {
                Some(Reverse(entry)) if entry.not_before <= now => {
                    let Some(Reverse(entry)) = heap.pop() else { break };
                    claimed.push(entry.delivery_id);
                },
                _ => break,
            }
        }

        claimed
    }

    /// Returns the number of queued entries, due or not.
    pub async fn len(&self) -> usize {
        self.heap.lock().await.len()
    }

    /// Returns true when no entries are queued.
    pub async fn is_empty(&self) -> bool {
        self.heap.lock().await.is_empty()
    }
}

impl DeliveryQueue for InProcessQueue {
    fn enqueue(
        &self,
        delivery_id: DeliveryId,
        not_before: DateTime<Utc>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let heap = self.heap.clone();
        Box::pin(async move {
            heap.lock().await.push(Reverse(QueueEntry { not_before, delivery_id }));
            Ok(())
        })
    }
}
