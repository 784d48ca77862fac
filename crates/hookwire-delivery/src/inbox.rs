//! Inspection and replay of captured webhook requests.
//!
//! When inbox mode is enabled the dispatcher stores requests instead of
//! sending them. `InboxManager` lets developers browse what was captured,
//! replay individual entries against the original destination, and empty
//! the inbox. Replay re-validates the destination URL first: a hostname
//! that was safe at capture time may resolve somewhere hostile now.

use std::sync::Arc;

use bytes::Bytes;
use hookwire_core::{Clock, CoreError, InboxEntry, InboxEntryId, Storage};
use tracing::info;

use crate::{
    client::{DeliveryClient, WireRequest, WireResponse},
    error::Result,
    url_guard::DestinationPolicy,
};

/// Browses and replays captured inbox entries.
pub struct InboxManager {
    storage: Arc<dyn Storage>,
    client: DeliveryClient,
    destination_policy: Arc<dyn DestinationPolicy>,
    clock: Arc<dyn Clock>,
}

impl InboxManager {
    /// Creates a manager over the given collaborators.
    pub fn new(
        storage: Arc<dyn Storage>,
        client: DeliveryClient,
        destination_policy: Arc<dyn DestinationPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { storage, client, destination_policy, clock }
    }

    /// Lists captured entries, newest first.
    pub async fn list(&self) -> Result<Vec<InboxEntry>> {
        Ok(self.storage.list_inbox_entries().await?)
    }

    /// Lists captured entries for one event type, newest first.
    pub async fn for_event(&self, event_type: &str) -> Result<Vec<InboxEntry>> {
        let entries = self.storage.list_inbox_entries().await?;
        Ok(entries.into_iter().filter(|e| e.event_type() == Some(event_type)).collect())
    }

    /// Loads one entry by ID.
    pub async fn find(&self, entry_id: InboxEntryId) -> Result<InboxEntry> {
        Ok(self
            .storage
            .find_inbox_entry(entry_id)
            .await?
            .ok_or_else(|| CoreError::not_found(format!("inbox entry {entry_id}")))?)
    }

    /// Replays an entry against its original destination.
    ///
    /// The captured payload and headers are sent exactly as recorded, so
    /// the original signature still verifies. The outcome is stored on the
    /// entry; replaying again overwrites it.
    pub async fn replay(&self, entry_id: InboxEntryId) -> Result<WireResponse> {
        let entry = self.find(entry_id).await?;

        self.destination_policy.check(&entry.url).await?;

        let body = serde_json::to_vec(&entry.payload)
            .map_err(|e| crate::error::DeliveryError::internal(format!("payload serialization failed: {e}")))?;

        let response = self
            .client
            .send(WireRequest {
                url: entry.url.clone(),
                body: Bytes::from(body),
                headers: entry.headers.clone(),
            })
            .await?;

        self.storage
            .record_inbox_replay(
                entry_id,
                self.clock.now_utc(),
                Some(response.status_code),
                Some(response.body.clone()),
            )
            .await?;

        info!(
            inbox_entry_id = %entry_id,
            status = response.status_code,
            "inbox entry replayed"
        );

        Ok(response)
    }

    /// Deletes every captured entry, returning how many were removed.
    pub async fn clear(&self) -> Result<u64> {
        let removed = self.storage.clear_inbox().await?;
        info!(removed, "inbox cleared");
        Ok(removed)
    }
}
