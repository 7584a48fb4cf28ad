//! Backend forwarding module
//!
//! The HTTP side of the bridge: delivering received MQTT payloads to the
//! backend's webhook endpoint and probing backend reachability at runner
//! startup. Both calls are stateless and bounded by request timeouts.
//!
//! Delivery is at-most-once and best-effort by design: a failed forward is
//! logged and the message is dropped — there is no retry queue. Whatever
//! replay semantics exist live in the broker's own QoS, not here.

use std::time::Duration;

use base64::{engine::general_purpose::STANDARD as BASE64_STANDARD, Engine};
use reqwest::StatusCode;
use std::fmt;
use tracing::{debug, warn};

/// Header carrying the tenant's backend auth token.
pub const AUTH_HEADER: &str = "X-MQTT-Auth-Token";

/// Timeout for the startup health/credential check.
const CHECK_TIMEOUT: Duration = Duration::from_secs(10);

/// Timeout for a webhook delivery call.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(60);

/// Outcome of a single webhook delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The backend answered 200; the message is delivered.
    Delivered,
    /// The backend answered with a non-success status; the message is
    /// dropped. Carries the HTTP status code.
    Rejected(u16),
    /// The backend could not be reached (connect failure or timeout); the
    /// message is dropped.
    Unreachable,
}

impl fmt::Display for DeliveryOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryOutcome::Delivered => write!(f, "delivered"),
            DeliveryOutcome::Rejected(status) => write!(f, "rejected with status {}", status),
            DeliveryOutcome::Unreachable => write!(f, "backend unreachable"),
        }
    }
}

/// Decides whether a payload must be base64-encoded before transmission.
///
/// A payload is binary if it is not valid UTF-8, or if it contains control
/// characters other than TAB, LF, and CR. Plain printable text passes
/// through unchanged so the backend sees it as-is.
#[must_use]
pub fn is_binary_payload(payload: &[u8]) -> bool {
    if std::str::from_utf8(payload).is_err() {
        return true;
    }
    payload.iter().any(|&byte| is_binary_control_char(byte))
}

/// Control characters that mark a payload as binary.
/// TAB (0x09), LF (0x0A), and CR (0x0D) are ordinary text.
fn is_binary_control_char(byte: u8) -> bool {
    matches!(byte, 0x00..=0x08 | 0x0B..=0x0C | 0x0E..=0x1F)
}

/// Encodes a payload for the webhook body: text as-is, binary as base64.
#[must_use]
pub fn encode_payload(payload: &[u8]) -> String {
    if is_binary_payload(payload) {
        BASE64_STANDARD.encode(payload)
    } else {
        String::from_utf8_lossy(payload).into_owned()
    }
}

/// HTTP client for the backend webhook interface.
///
/// Wraps a shared [`reqwest::Client`] so connections are pooled across
/// forwarding calls. One instance is cheap to clone and is shared by the
/// supervisor (probe) and every runner (delivery).
#[derive(Debug, Clone, Default)]
pub struct BackendClient {
    http: reqwest::Client,
}

impl BackendClient {
    /// Creates a backend client with default pool settings; timeouts are
    /// applied per request.
    #[must_use]
    pub fn new() -> Self {
        Self {
            http: reqwest::Client::new(),
        }
    }

    /// Probes the backend's health endpoint with the tenant's auth token.
    ///
    /// GET `{base_url}/mqtt/check`. Only a 200 counts as healthy; any other
    /// status and any transport failure yield `false` (logged).
    pub async fn check(&self, base_url: &str, token: &str) -> bool {
        let url = format!("{}/mqtt/check", base_url.trim_end_matches('/'));
        debug!(url = %url, "checking backend connectivity");
        match self
            .http
            .get(&url)
            .header(AUTH_HEADER, token)
            .timeout(CHECK_TIMEOUT)
            .send()
            .await
        {
            Ok(response) if response.status() == StatusCode::OK => true,
            Ok(response) => {
                let status = response.status();
                let body = response.text().await.unwrap_or_default();
                warn!(%status, body = %body, "backend connectivity check rejected");
                false
            }
            Err(err) => {
                warn!(error = %err, "backend connectivity check failed");
                false
            }
        }
    }

    /// Delivers one received message to the backend webhook.
    ///
    /// POST `{base_url}/mqtt/topics/{subscription_id}/on_message` with the
    /// auth token header and a JSON body `{"payload": <string>}`, where the
    /// payload string is the raw text or its base64 encoding (see
    /// [`encode_payload`]).
    pub async fn forward(
        &self,
        base_url: &str,
        subscription_id: i64,
        token: &str,
        payload: &[u8],
    ) -> DeliveryOutcome {
        let url = format!(
            "{}/mqtt/topics/{}/on_message",
            base_url.trim_end_matches('/'),
            subscription_id
        );
        let body = serde_json::json!({ "payload": encode_payload(payload) });
        debug!(url = %url, subscription = subscription_id, "forwarding message to backend");

        match self
            .http
            .post(&url)
            .header(AUTH_HEADER, token)
            .timeout(FORWARD_TIMEOUT)
            .json(&body)
            .send()
            .await
        {
            Ok(response) if response.status() == StatusCode::OK => DeliveryOutcome::Delivered,
            Ok(response) => {
                let status = response.status();
                let text = response.text().await.unwrap_or_default();
                warn!(
                    subscription = subscription_id,
                    %status,
                    body = %text,
                    "backend rejected forwarded message"
                );
                DeliveryOutcome::Rejected(status.as_u16())
            }
            Err(err) => {
                warn!(
                    subscription = subscription_id,
                    error = %err,
                    "backend unreachable, message dropped"
                );
                DeliveryOutcome::Unreachable
            }
        }
    }
}
