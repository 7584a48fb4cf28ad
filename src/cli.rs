//! CLI argument parsing module
//!
//! Handles command-line argument parsing using `clap` derive macros for the
//! bridge server binary.

use clap::Parser;

/// Command-line arguments for the bridge server.
#[derive(Parser, Debug)]
#[command(name = "mqtt-webhook-bridge")]
#[command(about = "Bridge per-tenant MQTT subscriptions to backend webhooks")]
#[command(version)]
pub struct Args {
    /// Address the management API listens on
    #[arg(long, default_value = "0.0.0.0", env = "MQTT_BRIDGE_HOST")]
    pub host: String,

    /// Port the management API listens on
    #[arg(long, default_value = "8000", env = "MQTT_BRIDGE_PORT")]
    pub port: u16,

    /// Verbose logging (debug level)
    #[arg(short = 'v', long, default_value = "false", env = "MQTT_BRIDGE_VERBOSE")]
    pub verbose: bool,
}

impl Args {
    /// Socket address string for the API listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
