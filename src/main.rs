//! Rendezvous Relay Server
//!
//! WebSocket relay where clients join named networks, see who else is
//! there, and exchange chat broadcasts or directed signaling payloads.

use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tokio::signal;
use tokio::sync::broadcast;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

use rendezvous_server::config::ServerConfig;
use rendezvous_server::server::{accept_websocket_connections, drain_connections};
use rendezvous_server::state::AppState;
use rendezvous_server::VERSION;

/// How long shutdown waits for clients to close
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    // A missing .env file is normal
    dotenv::dotenv().ok();

    // Initialize logging
    init_logging();

    info!("Rendezvous relay v{}", VERSION);

    // Load configuration
    let config = ServerConfig::load().await?;
    info!(
        "Configuration loaded from: {}",
        config.config_path.display()
    );

    // Create shutdown channel
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let state = Arc::new(AppState::new(config.clone(), shutdown_tx.clone()));

    // Start WebSocket listener
    let ws_addr = config.listen_addr()?;
    let ws_listener = TcpListener::bind(ws_addr).await?;
    info!("Signaling server listening on: {}", ws_listener.local_addr()?);

    // Spawn WebSocket connection acceptor
    let ws_state = state.clone();
    let mut ws_shutdown_rx = shutdown_tx.subscribe();
    let ws_handle = tokio::spawn(async move {
        accept_websocket_connections(ws_listener, ws_state, &mut ws_shutdown_rx).await;
    });

    // Wait for shutdown signal
    wait_for_shutdown(&state).await;

    info!("Shutting down server...");

    let _ = ws_handle.await;

    let remaining = drain_connections(&state, SHUTDOWN_GRACE).await;
    info!(
        remaining_connections = remaining,
        remaining_networks = state.registry.network_count(),
        "All connections closed"
    );

    info!("Server shutdown complete. Goodbye!");
    Ok(())
}

/// Initialize the logging/tracing system
///
/// `RENDEZVOUS_LOG_FORMAT=json` switches to one JSON object per line.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,rendezvous_server=debug"));

    let json = env::var("RENDEZVOUS_LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_current_span(false)
            .init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .with_level(true)
            .init();
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM)
async fn wait_for_shutdown(state: &AppState) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, initiating shutdown...");
        }
        _ = terminate => {
            info!("Received SIGTERM, initiating shutdown...");
        }
    }

    // Signal all tasks to shut down
    state.shutdown();
}
