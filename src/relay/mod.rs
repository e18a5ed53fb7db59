//! Relay module
//!
//! Network membership and message routing, independent of the transport:
//! - Network registry (shared membership state)
//! - Session handler (per-connection protocol state machine)

pub mod registry;
pub mod session;

pub use registry::{Connection, ConnectionId, NetworkRegistry};
pub use session::{SessionHandler, SessionState};
