//! HTTP client for outbound webhook requests.
//!
//! A thin wrapper over a pooled `reqwest` client. Redirects are disabled so
//! a validated destination cannot bounce the request somewhere that was
//! never checked. Timeout and User-Agent come from the live configuration
//! at each send, so configuration changes apply without rebuilding the
//! client.

use std::{collections::HashMap, time::Duration};

use bytes::Bytes;
use hookwire_core::SharedConfig;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing::{debug, warn};

use crate::error::{DeliveryError, Result};

/// Maximum response body bytes stored on a delivery record.
pub const MAX_RESPONSE_BODY_BYTES: usize = 10_000;

const TRUNCATION_SUFFIX: &str = "... (truncated)";

/// One outbound request, fully assembled by the dispatcher.
#[derive(Debug, Clone)]
pub struct WireRequest {
    /// Destination URL.
    pub url: String,
    /// Serialized JSON payload.
    pub body: Bytes,
    /// All request headers, signature included.
    pub headers: HashMap<String, String>,
}

/// Response from an outbound request.
#[derive(Debug, Clone)]
pub struct WireResponse {
    /// HTTP status code.
    pub status_code: u16,
    /// Response headers.
    pub headers: HashMap<String, String>,
    /// Response body, truncated to `MAX_RESPONSE_BODY_BYTES`.
    pub body: String,
    /// Wall-clock duration of the request.
    pub duration: Duration,
}

impl WireResponse {
    /// Returns true for 2xx status codes.
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status_code)
    }
}

/// Pooled HTTP client for webhook dispatch.
#[derive(Debug, Clone)]
pub struct DeliveryClient {
    client: reqwest::Client,
    config: SharedConfig,
}

impl DeliveryClient {
    /// Creates a client bound to the live configuration.
    ///
    /// # Errors
    ///
    /// Returns `DeliveryError::Configuration` if the underlying HTTP client
    /// cannot be built.
    pub fn new(config: SharedConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| {
                DeliveryError::configuration(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client, config })
    }

    /// Sends one webhook request.
    ///
    /// Any HTTP response, success or not, returns `Ok`; the caller decides
    /// what the status code means. Only transport failures become errors:
    /// `Timeout` when the deadline elapses, `Network` for everything else.
    pub async fn send(&self, request: WireRequest) -> Result<WireResponse> {
        let timeout = self.config.snapshot().timeout;
        let started = std::time::Instant::now();

        let headers = build_header_map(&request.headers)?;

        let response = self
            .client
            .post(&request.url)
            .timeout(timeout)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| {
                warn!(url = %request.url, error = %e, "webhook request failed");
                if e.is_timeout() {
                    DeliveryError::timeout(timeout.as_secs())
                } else if e.is_connect() {
                    DeliveryError::network(format!("connection failed: {e}"))
                } else {
                    DeliveryError::network(e.to_string())
                }
            })?;

        let duration = started.elapsed();
        let status_code = response.status().as_u16();
        let headers = extract_headers(response.headers());

        let body = match response.bytes().await {
            Ok(bytes) => truncate_body(&bytes),
            Err(e) => {
                warn!(url = %request.url, error = %e, "failed to read response body");
                format!("[failed to read response body: {e}]")
            },
        };

        debug!(
            url = %request.url,
            status = status_code,
            duration_ms = duration.as_millis(),
            "webhook request completed"
        );

        Ok(WireResponse { status_code, headers, body, duration })
    }
}

fn build_header_map(headers: &HashMap<String, String>) -> Result<HeaderMap> {
    let mut map = HeaderMap::with_capacity(headers.len());
    for (key, value) in headers {
        let name = HeaderName::from_bytes(key.as_bytes())
            .map_err(|e| DeliveryError::internal(format!("invalid header name {key}: {e}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| DeliveryError::internal(format!("invalid header value for {key}: {e}")))?;
        map.insert(name, value);
    }
    Ok(map)
}

fn extract_headers(header_map: &HeaderMap) -> HashMap<String, String> {
    let mut headers = HashMap::new();
    for (key, value) in header_map {
        if let Ok(value) = value.to_str() {
            headers.insert(key.to_string(), value.to_string());
        }
    }
    headers
}

/// Truncates a response body to the storage cap, marking the cut.
fn truncate_body(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_RESPONSE_BODY_BYTES {
        return String::from_utf8_lossy(bytes).into_owned();
    }

    // from_utf8_lossy absorbs a multi-byte character split at the cut.
    let truncated = String::from_utf8_lossy(&bytes[..MAX_RESPONSE_BODY_BYTES]);
    format!("{truncated}{TRUNCATION_SUFFIX}")
}
