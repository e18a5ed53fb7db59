//! Listener module
//!
//! Accepts TCP connections and hands each one to its own
//! [`ConnectionHandler`] task until shutdown is signalled.

use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use crate::net::handler::ConnectionHandler;
use crate::state::AppState;

/// How often the drain loop checks for remaining connections
const DRAIN_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Accept incoming WebSocket connections
pub async fn accept_websocket_connections(
    listener: TcpListener,
    state: Arc<AppState>,
    shutdown_rx: &mut broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, addr)) => {
                        info!("New WebSocket connection from: {}", addr);
                        let handler = ConnectionHandler::new(state.clone());
                        tokio::spawn(async move {
                            if let Err(e) = handler.handle_websocket(stream, addr).await {
                                warn!("WebSocket connection error from {}: {}", addr, e);
                            }
                        });
                    }
                    Err(e) => {
                        error!("Failed to accept WebSocket connection: {}", e);
                    }
                }
            }
            _ = shutdown_rx.recv() => {
                info!("WebSocket connection acceptor shutting down");
                break;
            }
        }
    }
}

/// Close every live connection and wait for their handlers to finish
///
/// Returns the number of connections still open when `timeout` ran out.
pub async fn drain_connections(state: &AppState, timeout: Duration) -> usize {
    let requested = state.connections.disconnect_all();
    info!(connections = requested, "Closing client connections");

    let wait = async {
        while state.connections.count() > 0 {
            tokio::time::sleep(DRAIN_POLL_INTERVAL).await;
        }
    };

    if tokio::time::timeout(timeout, wait).await.is_err() {
        warn!(
            remaining = state.connections.count(),
            "Timed out waiting for connections to close"
        );
    }

    state.connections.count()
}
