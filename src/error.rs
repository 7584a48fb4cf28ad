//! Error module
//!
//! Defines the unified error type for the bridge using `thiserror`.
//! Control-plane-facing variants (`DuplicateTenant`, `TenantNotFound`,
//! `SubscriptionNotFound`, `BrokerRejected`) are returned synchronously to
//! callers of the supervisor; runner-internal variants are logged and the
//! connection loop continues.

use thiserror::Error;

/// The main error type for the MQTT webhook bridge.
///
/// # Error Categories
///
/// - **Control-plane errors**: duplicate/missing tenants and subscriptions,
///   broker-rejected subscribe requests. Surfaced through the management API.
/// - **Runner-internal errors**: unmatched acknowledgments and connection
///   failures. Recovered locally; never terminate a runner.
/// - **Wrapped sources**: MQTT client/connection errors, HTTP errors, and
///   general I/O, converted automatically via `From`.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// A runner for this tenant id is already registered.
    #[error("a client for tenant {0} already exists")]
    DuplicateTenant(i64),

    /// No runner is registered for this tenant id.
    #[error("tenant {0} not found")]
    TenantNotFound(i64),

    /// The tenant's registry has no subscription with this id.
    #[error("subscription {0} not found")]
    SubscriptionNotFound(i64),

    /// The broker (or the client layer in front of it) refused a
    /// subscribe/unsubscribe request. The attempted subscription is
    /// discarded, not left pending.
    #[error("broker rejected request: {0}")]
    BrokerRejected(String),

    /// A broker acknowledgment arrived that matches no pending request.
    /// Indicates broker/runner desynchronization; logged, never fatal.
    #[error("no pending request matches acknowledgment {0}")]
    UnknownAcknowledgment(u16),

    /// The runner's command channel did not answer within the bounded wait.
    #[error("runner for tenant {0} is not responding")]
    RunnerUnavailable(i64),

    /// Invalid configuration or request input.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// MQTT client operation error from the rumqttc client.
    ///
    /// Boxed to keep the Result type small; rumqttc's error is large.
    #[error("MQTT client error: {0}")]
    Client(#[source] Box<rumqttc::ClientError>),

    /// MQTT connection error from the rumqttc event loop.
    #[error("MQTT connection error: {0}")]
    Connection(#[source] Box<rumqttc::ConnectionError>),

    /// HTTP error on the backend-facing path.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// General I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

// Manual From implementations for boxed error types
impl From<rumqttc::ClientError> for BridgeError {
    fn from(err: rumqttc::ClientError) -> Self {
        BridgeError::Client(Box::new(err))
    }
}

impl From<rumqttc::ConnectionError> for BridgeError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        BridgeError::Connection(Box::new(err))
    }
}
