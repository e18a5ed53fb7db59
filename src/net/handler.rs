//! Connection handler module
//!
//! Handles the lifecycle of client connections including:
//! - WebSocket upgrade
//! - Connection registration and outbound queue setup
//! - Routing inbound payloads to the session handler
//! - Draining the outbound queue to the socket
//! - Registry cleanup and graceful close

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, trace, warn};

use crate::error::Result;
use crate::net::session::ConnectionInfo;
use crate::net::transport::WebSocketTransport;
use crate::relay::{Connection, SessionHandler};
use crate::AppState;

/// Connection handler for processing client connections
pub struct ConnectionHandler {
    /// Shared application state
    state: Arc<AppState>,
    /// Server shutdown signal, subscribed before the connection task starts
    shutdown_rx: broadcast::Receiver<()>,
}

impl ConnectionHandler {
    /// Create a new connection handler
    pub fn new(state: Arc<AppState>) -> Self {
        let shutdown_rx = state.shutdown_tx.subscribe();
        Self { state, shutdown_rx }
    }

    /// Handle a WebSocket connection
    pub async fn handle_websocket(mut self, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        debug!(address = %addr, "Handling WebSocket connection");

        if self.state.connections.is_closing() {
            debug!(address = %addr, "Server is closing, dropping connection");
            return Ok(());
        }

        // Set TCP options before upgrade
        stream.set_nodelay(true)?;

        let mut transport = WebSocketTransport::accept(stream, &self.state.config).await?;

        let info = self.state.connections.register(addr);
        info!(
            connection_id = info.id,
            address = %addr,
            "WebSocket connection established"
        );

        let (outbound_tx, outbound_rx) = mpsc::channel(self.state.config.outbound_queue_size);
        let mut session = SessionHandler::new(
            Connection::new(info.id, outbound_tx),
            self.state.registry.clone(),
            self.state.config.broadcast_network_info,
        );

        let result = self
            .process_connection(&mut transport, &mut session, outbound_rx, &info)
            .await;

        // Cleanup
        debug!(connection_id = info.id, "Connection handler ending");
        session.handle_disconnect();
        self.state.connections.remove(info.id);

        if let Err(e) = transport.close().await {
            trace!(connection_id = info.id, error = %e, "Error during transport shutdown");
        }

        result
    }

    /// Main processing loop
    ///
    /// Transport errors end the loop the same way a close does.
    async fn process_connection(
        &mut self,
        transport: &mut WebSocketTransport,
        session: &mut SessionHandler,
        mut outbound_rx: mpsc::Receiver<String>,
        info: &ConnectionInfo,
    ) -> Result<()> {
        let connection_id = info.id;

        loop {
            tokio::select! {
                inbound = transport.read_message() => match inbound {
                    Ok(Some(text)) => {
                        trace!(connection_id = connection_id, len = text.len(), "Received payload");
                        if let Err(e) = session.handle_text(&text) {
                            warn!(connection_id = connection_id, error = %e, "Dropping malformed message");
                        }
                    }
                    Ok(None) => {
                        debug!(connection_id = connection_id, "Connection closed");
                        break;
                    }
                    Err(e) => {
                        warn!(connection_id = connection_id, error = %e, "Connection error");
                        break;
                    }
                },
                Some(payload) = outbound_rx.recv() => {
                    if let Err(e) = transport.write_message(payload).await {
                        debug!(connection_id = connection_id, error = %e, "Write failed");
                        break;
                    }
                }
                _ = info.closed() => {
                    debug!(connection_id = connection_id, "Server requested disconnect");
                    break;
                }
                _ = self.shutdown_rx.recv() => {
                    debug!(connection_id = connection_id, "Server shutting down");
                    break;
                }
            }
        }

        Ok(())
    }
}
