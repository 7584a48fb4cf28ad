//! MQTT Webhook Bridge Library
//!
//! Bridges multiple independent MQTT broker connections (one per tenant of
//! a backend business system) to that backend's HTTP webhook interface.
//! Inbound broker messages on subscribed topics are forwarded as HTTP
//! calls; subscription and connection lifecycle is controlled through a
//! management API.

pub mod api;
pub mod cli;
pub mod error;
pub mod forward;
pub mod registry;
pub mod runner;
pub mod supervisor;
pub mod tenant;
pub mod util;
