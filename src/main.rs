//! MQTT Webhook Bridge - per-tenant MQTT to webhook forwarding
//!
//! Runs the management API and supervises one MQTT client connection per
//! registered tenant. Tenants, their connections, and their subscriptions
//! are managed at runtime through the HTTP API; received messages are
//! forwarded to the tenant's backend webhook.
//!
//! # Exit Codes
//!
//! | Code | Meaning |
//! |------|---------|
//! | 0 | Success (including graceful shutdown) |
//! | 1 | Startup or runtime error |

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use mqtt_webhook_bridge::api::{build_router, AppState};
use mqtt_webhook_bridge::cli::Args;
use mqtt_webhook_bridge::error::BridgeError;
use mqtt_webhook_bridge::supervisor::Supervisor;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.verbose);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "bridge terminated with error");
            ExitCode::FAILURE
        }
    }
}

/// Initializes the tracing subscriber. `RUST_LOG` overrides the default
/// filter; `--verbose` raises the bridge's own level to debug.
fn init_logging(verbose: bool) {
    let default_filter = if verbose {
        "mqtt_webhook_bridge=debug,info"
    } else {
        "info"
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Main application logic: serve the management API until a shutdown
/// signal arrives, then drain the supervisor.
async fn run(args: Args) -> Result<(), BridgeError> {
    let supervisor = Arc::new(Supervisor::new());
    let app = build_router(AppState {
        supervisor: Arc::clone(&supervisor),
    });

    let listener = tokio::net::TcpListener::bind(args.bind_addr()).await?;
    info!(addr = %listener.local_addr()?, "management API listening");

    tokio::select! {
        result = axum::serve(listener, app.into_make_service()) => {
            result.map_err(BridgeError::Io)?;
        }
        result = wait_for_shutdown_signal() => {
            result?;
            info!("shutdown signal received");
        }
    }

    // Stop every tenant runner before the process exits.
    supervisor.shutdown().await;
    info!("all client runners stopped");
    Ok(())
}

/// Wait for SIGINT (Ctrl+C) or SIGTERM.
async fn wait_for_shutdown_signal() -> Result<(), BridgeError> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut sigint = signal(SignalKind::interrupt()).map_err(BridgeError::Io)?;
        let mut sigterm = signal(SignalKind::terminate()).map_err(BridgeError::Io)?;

        tokio::select! {
            _ = sigint.recv() => {
                info!("received SIGINT, initiating graceful shutdown");
            }
            _ = sigterm.recv() => {
                info!("received SIGTERM, initiating graceful shutdown");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await.map_err(BridgeError::Io)?;
        info!("received Ctrl+C, initiating graceful shutdown");
    }

    Ok(())
}
