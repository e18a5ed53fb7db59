//! Application state module
//!
//! Contains the shared state used across all client connections.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::info;

use crate::config::ServerConfig;
use crate::net::session::ConnectionManager;
use crate::relay::NetworkRegistry;

/// Application state shared across all connections
pub struct AppState {
    /// Server configuration
    pub config: ServerConfig,
    /// Network membership, the only state shared between sessions
    pub registry: Arc<NetworkRegistry>,
    /// Live transport connections
    pub connections: ConnectionManager,
    /// Shutdown signal sender
    pub shutdown_tx: broadcast::Sender<()>,
}

impl AppState {
    /// Create a new application state with an empty registry
    pub fn new(config: ServerConfig, shutdown_tx: broadcast::Sender<()>) -> Self {
        Self::with_registry(config, shutdown_tx, Arc::new(NetworkRegistry::new()))
    }

    /// Create application state around an existing registry
    pub fn with_registry(
        config: ServerConfig,
        shutdown_tx: broadcast::Sender<()>,
        registry: Arc<NetworkRegistry>,
    ) -> Self {
        info!(
            outbound_queue_size = config.outbound_queue_size,
            max_message_size = config.max_message_size,
            broadcast_network_info = config.broadcast_network_info,
            "Relay state initialized"
        );

        Self {
            config,
            registry,
            connections: ConnectionManager::new(),
            shutdown_tx,
        }
    }

    /// Signal every task to shut down
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}
