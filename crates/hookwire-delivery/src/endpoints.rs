//! Endpoint registration and lifecycle management.
//!
//! Registration validates the destination URL against the SSRF rules and
//! generates the signing secret; the secret is never accepted from the
//! caller and never changes afterwards.

use std::sync::Arc;

use hookwire_core::{Clock, DeliveryStatus, Endpoint, EndpointId, Storage};
use rand::Rng;
use tracing::info;

use crate::{
    error::{DeliveryError, Result},
    url_guard::DestinationPolicy,
};

/// Delivery statistics for one endpoint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EndpointStats {
    /// Total deliveries ever created for the endpoint.
    pub total: u64,
    /// Deliveries that reached terminal success.
    pub successful: u64,
    /// Deliveries that failed terminally.
    pub failed: u64,
    /// Successful share of all deliveries, as a percentage.
    pub success_rate: f64,
}

/// Registers and manages webhook endpoints.
pub struct EndpointManager {
    storage: Arc<dyn Storage>,
    destination_policy: Arc<dyn DestinationPolicy>,
    clock: Arc<dyn Clock>,
}

impl EndpointManager {
    /// Creates a manager over the given collaborators.
    pub fn new(
        storage: Arc<dyn Storage>,
        destination_policy: Arc<dyn DestinationPolicy>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { storage, destination_policy, clock }
    }

    /// Registers a new endpoint.
    ///
    /// The URL must pass security validation and the subscription list must
    /// name at least one event. The signing secret is generated here: 32
    /// random bytes, hex encoded.
    pub async fn register(
        &self,
        name: impl Into<String>,
        url: impl Into<String>,
        events: Vec<String>,
    ) -> Result<Endpoint> {
        let url = url.into();

        if events.is_empty() {
            return Err(DeliveryError::configuration(
                "endpoint must subscribe to at least one event",
            ));
        }

        self.destination_policy.check(&url).await?;

        let endpoint = Endpoint {
            id: EndpointId::new(),
            name: name.into(),
            url,
            secret: generate_secret(),
            events,
            enabled: true,
            created_at: self.clock.now_utc(),
        };

        self.storage.create_endpoint(endpoint.clone()).await?;

        info!(
            endpoint_id = %endpoint.id,
            url = %endpoint.url,
            events = ?endpoint.events,
            "webhook endpoint registered"
        );

        Ok(endpoint)
    }

    /// Enables an endpoint, resuming fan-out to it.
    pub async fn enable(&self, endpoint_id: EndpointId) -> Result<()> {
        self.storage.set_endpoint_enabled(endpoint_id, true).await?;
        info!(endpoint_id = %endpoint_id, "webhook endpoint enabled");
        Ok(())
    }

    /// Disables an endpoint.
    ///
    /// Future fan-out skips it; deliveries already created keep running
    /// their attempt series.
    pub async fn disable(&self, endpoint_id: EndpointId) -> Result<()> {
        self.storage.set_endpoint_enabled(endpoint_id, false).await?;
        info!(endpoint_id = %endpoint_id, "webhook endpoint disabled");
        Ok(())
    }

    /// Loads an endpoint by ID.
    pub async fn find(&self, endpoint_id: EndpointId) -> Result<Endpoint> {
        Ok(self.storage.find_endpoint(endpoint_id).await?)
    }

    /// Lists all registered endpoints.
    pub async fn list(&self) -> Result<Vec<Endpoint>> {
        Ok(self.storage.list_endpoints().await?)
    }

    /// Computes delivery statistics for an endpoint.
    pub async fn stats(&self, endpoint_id: EndpointId) -> Result<EndpointStats> {
        // Existence check first so an unknown ID is an error, not zeros.
        self.storage.find_endpoint(endpoint_id).await?;

        let deliveries = self.storage.deliveries_for_endpoint(endpoint_id).await?;
        let total = deliveries.len() as u64;
        let successful =
            deliveries.iter().filter(|d| d.status == DeliveryStatus::Success).count() as u64;
        let failed =
            deliveries.iter().filter(|d| d.status == DeliveryStatus::Failed).count() as u64;

        let success_rate = if total == 0 {
            0.0
        } else {
            (successful as f64 / total as f64 * 10_000.0).round() / 100.0
        };

        Ok(EndpointStats { total, successful, failed, success_rate })
    }
}

/// Generates a fresh signing secret: 32 random bytes, hex encoded.
fn generate_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill(&mut bytes);
    hex::encode(bytes)
}
