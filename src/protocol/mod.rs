//! Protocol module
//!
//! Wire records exchanged with clients. Every payload is a single JSON
//! object carried in one WebSocket text frame:
//! - Inbound client records (join, network info requests, chat, relay)
//! - Outbound server records (errors, network info, presence, chat)
//! - Network id validation

pub mod messages;
pub mod network_id;

pub use messages::{InboundMessage, ServerMessage};
pub use network_id::NetworkId;
