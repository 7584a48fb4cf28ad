//! Tenant data model
//!
//! Configuration and status types shared by the supervisor, the per-tenant
//! runners, and the management API. A `TenantConfig` is immutable once
//! registered; updating a tenant is modeled as stop + re-add.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;

/// Default MQTT broker port when the config omits one.
pub const DEFAULT_MQTT_PORT: u16 = 1883;

/// Placeholder shown in place of secrets in listing output.
const REDACTED: &str = "<redacted>";

fn default_mqtt_port() -> u16 {
    DEFAULT_MQTT_PORT
}

/// Immutable per-tenant configuration.
///
/// Holds everything one runner needs: the backend webhook endpoint and its
/// auth token, the MQTT broker address and credentials, and the initial
/// subscription descriptors. Owned by the supervisor; created on tenant
/// registration and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Backend record id of the tenant account.
    pub tenant_id: i64,

    /// Base URL of the backend, e.g. `https://backend.example.com`.
    /// Must start with `http://` or `https://`.
    pub backend_url: String,

    /// Auth token presented to the backend on every call (secret).
    pub backend_token: String,

    /// Hostname or IP address of the MQTT broker.
    pub mqtt_host: String,

    /// Port of the MQTT broker.
    #[serde(default = "default_mqtt_port")]
    pub mqtt_port: u16,

    /// Optional username for broker authentication.
    #[serde(default)]
    pub mqtt_username: Option<String>,

    /// Optional password for broker authentication (secret).
    #[serde(default)]
    pub mqtt_password: Option<String>,

    /// Subscriptions established on every (re)connect.
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

impl TenantConfig {
    /// Checks that the configuration is acceptable for registration.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::InvalidArgument`] if `backend_url` does not
    /// carry an http/https scheme.
    pub fn validate(&self) -> Result<(), BridgeError> {
        if !self.backend_url.starts_with("http://") && !self.backend_url.starts_with("https://") {
            return Err(BridgeError::InvalidArgument(format!(
                "backend_url must start with http:// or https://, got '{}'",
                self.backend_url
            )));
        }
        Ok(())
    }

    /// Returns a copy safe for listing output: both secrets are blanked.
    #[must_use]
    pub fn redacted(&self) -> TenantConfig {
        let mut config = self.clone();
        config.backend_token = REDACTED.to_string();
        if config.mqtt_password.is_some() {
            config.mqtt_password = Some(REDACTED.to_string());
        }
        config
    }

    /// Returns true if broker credentials are configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.mqtt_username.is_some() && self.mqtt_password.is_some()
    }
}

/// One MQTT subscription owned by a tenant.
///
/// The id is the backend's identifier for the subscription and is unique
/// within a tenant; inserting the same id again replaces the earlier entry.
/// `ack` holds the packet id of the confirming SUBACK once the broker has
/// acknowledged the subscribe request; until then the subscription is
/// pending (`active == false`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    /// Tenant-scoped subscription id assigned by the backend.
    pub id: i64,

    /// Id of the owning tenant.
    pub tenant_id: i64,

    /// Exact topic this subscription matches. Messages are matched by
    /// string equality, not wildcard expansion.
    pub topic: String,

    /// Packet id of the broker acknowledgment, once received.
    #[serde(default)]
    pub ack: Option<u16>,

    /// Whether the broker has confirmed the subscription.
    #[serde(default)]
    pub active: bool,
}

impl Subscription {
    /// Creates a pending subscription descriptor.
    #[must_use]
    pub fn new(id: i64, tenant_id: i64, topic: impl Into<String>) -> Self {
        Self {
            id,
            tenant_id,
            topic: topic.into(),
            ack: None,
            active: false,
        }
    }
}

/// Read-only snapshot of a runner's lifecycle state.
///
/// Assembled from the runner's shared atomic flags; the control-plane never
/// observes (or mutates) runner internals directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerStatus {
    /// Tenant this runner serves.
    pub tenant_id: i64,

    /// Whether the runner's loop is alive.
    pub running: bool,

    /// Whether the broker connection is currently established.
    pub connected: bool,

    /// When the runner was started.
    pub started_at: DateTime<Utc>,
}
