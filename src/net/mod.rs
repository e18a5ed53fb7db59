//! Networking module
//!
//! This module handles all transport-level functionality for the relay:
//! - WebSocket framing for browser and native clients
//! - Connection tracking
//! - Per-connection event loop

pub mod handler;
pub mod session;
pub mod transport;
