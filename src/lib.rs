//! Rendezvous Relay Library
//!
//! This library provides the core functionality for the Rendezvous relay,
//! a WebSocket server where clients meet in named networks and exchange
//! chat broadcasts or peer-to-peer signaling payloads.
//!
//! ## Modules
//!
//! - `config` - Server configuration management
//! - `error` - Error types and result definitions
//! - `net` - WebSocket transport and connection lifecycle
//! - `protocol` - Wire records and network id validation
//! - `relay` - Network registry and per-connection session logic
//! - `server` - Accept loop and shutdown draining
//! - `state` - Shared application state

pub mod config;
pub mod error;
pub mod net;
pub mod protocol;
pub mod relay;
pub mod server;
pub mod state;

// Re-export commonly used types
pub use config::ServerConfig;
pub use error::{RendezvousError, Result};
pub use state::AppState;

/// Server version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
