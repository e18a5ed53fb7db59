//! Session handler module
//!
//! Per-connection protocol logic:
//! - Session state machine (unjoined -> joined)
//! - Join validation and network membership
//! - Chat broadcast and targeted relay routing
//! - Cleanup and presence notifications on disconnect
//!
//! The handler never waits on I/O. Outbound payloads are queued on each
//! recipient's [`Connection`] and a failed queue only affects that recipient.

use std::fmt;
use std::mem;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, info, trace, warn};

use crate::error::{ProtocolError, Result};
use crate::protocol::{InboundMessage, NetworkId, ServerMessage};
use crate::relay::registry::{Connection, ConnectionId, NetworkRegistry};

/// Session state in the connection lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Connected but not bound to any network
    #[default]
    Unjoined,
    /// Bound to a network under a username
    Joined {
        network_id: NetworkId,
        username: String,
    },
}

impl SessionState {
    pub fn is_joined(&self) -> bool {
        matches!(self, SessionState::Joined { .. })
    }

    /// Get a human-readable name for the state
    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Unjoined => "Unjoined",
            SessionState::Joined { .. } => "Joined",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Unjoined => write!(f, "{}", self.name()),
            SessionState::Joined {
                network_id,
                username,
            } => write!(f, "{}({}@{})", self.name(), username, network_id),
        }
    }
}

/// Protocol handler bound to one connection
pub struct SessionHandler {
    connection: Connection,
    registry: Arc<NetworkRegistry>,
    state: SessionState,
    /// Refresh `network-info` for the whole network after joins and leaves
    broadcast_network_info: bool,
}

impl SessionHandler {
    pub fn new(
        connection: Connection,
        registry: Arc<NetworkRegistry>,
        broadcast_network_info: bool,
    ) -> Self {
        Self {
            connection,
            registry,
            state: SessionState::Unjoined,
            broadcast_network_info,
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.connection.id()
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    /// Parse and dispatch one inbound text payload
    ///
    /// A parse failure only drops this payload.
    pub fn handle_text(&mut self, text: &str) -> Result<()> {
        let message = InboundMessage::parse(text)?;
        self.handle_message(message);
        Ok(())
    }

    /// Dispatch one parsed record
    pub fn handle_message(&mut self, message: InboundMessage) {
        trace!(
            connection_id = self.connection_id(),
            state = %self.state,
            message = message.name(),
            "Dispatching message"
        );

        match message {
            InboundMessage::Join {
                network_id,
                username,
            } => self.handle_join(network_id, username),
            InboundMessage::RequestNetworkInfo { network_id } => {
                self.handle_request_network_info(network_id)
            }
            InboundMessage::Chat { message, timestamp } => self.handle_chat(message, timestamp),
            InboundMessage::Relay { to, payload } => self.handle_relay(&to, payload),
            InboundMessage::Unknown { kind } => {
                debug!(
                    connection_id = self.connection_id(),
                    kind = ?kind,
                    "Ignoring unknown message type"
                );
            }
        }
    }

    fn handle_join(&mut self, network_id: Option<String>, username: Option<String>) {
        let parsed = network_id
            .ok_or(ProtocolError::InvalidNetworkName)
            .and_then(|id| NetworkId::parse(id));
        let network_id = match parsed {
            Ok(id) => id,
            Err(e) => {
                debug!(connection_id = self.connection_id(), "Rejected join: {}", e);
                self.reply(&ServerMessage::Error {
                    message: e.to_string(),
                });
                return;
            }
        };

        let Some(username) = username else {
            debug!(
                connection_id = self.connection_id(),
                network_id = %network_id,
                "Dropping join without a username"
            );
            return;
        };

        // Moving to a different binding releases the old one first
        let rebinding = match &self.state {
            SessionState::Joined {
                network_id: current,
                username: current_user,
            } => *current != network_id || *current_user != username,
            SessionState::Unjoined => false,
        };
        if rebinding {
            self.leave_current();
        }

        let outcome = self
            .registry
            .join(network_id.as_str(), &username, self.connection.clone());

        if let Some(displaced) = &outcome.displaced {
            warn!(
                network_id = %network_id,
                username = %username,
                displaced_connection_id = displaced.id(),
                connection_id = self.connection_id(),
                "Username taken over by a new connection"
            );
        }

        info!(
            connection_id = self.connection_id(),
            network_id = %network_id,
            username = %username,
            member_count = outcome.member_count,
            "User joined network"
        );

        self.reply(&ServerMessage::NetworkInfo {
            network_id: Some(network_id.to_string()),
            user_count: outcome.member_count,
        });

        fan_out(
            &outcome.others(self.connection_id()),
            &ServerMessage::UserJoined {
                username: username.clone(),
                network_id: network_id.to_string(),
            },
        );

        if self.broadcast_network_info {
            fan_out(
                &outcome.members,
                &ServerMessage::NetworkInfo {
                    network_id: Some(network_id.to_string()),
                    user_count: outcome.member_count,
                },
            );
        }

        self.state = SessionState::Joined {
            network_id,
            username,
        };
    }

    fn handle_request_network_info(&self, network_id: Option<String>) {
        let user_count = network_id
            .as_deref()
            .map_or(0, |id| self.registry.member_count(id));
        self.reply(&ServerMessage::NetworkInfo {
            network_id,
            user_count,
        });
    }

    fn handle_chat(&self, message: Option<Value>, timestamp: Option<Value>) {
        let SessionState::Joined {
            network_id,
            username,
        } = &self.state
        else {
            debug!(
                connection_id = self.connection_id(),
                "Dropping chat from unjoined connection"
            );
            return;
        };

        let recipients: Vec<Connection> = self
            .registry
            .members(network_id.as_str())
            .into_iter()
            .filter(|c| c.id() != self.connection_id())
            .collect();

        let delivered = fan_out(
            &recipients,
            &ServerMessage::Message {
                username: username.clone(),
                message,
                timestamp,
                network_id: network_id.to_string(),
            },
        );

        debug!(
            connection_id = self.connection_id(),
            network_id = %network_id,
            username = %username,
            delivered = delivered,
            "Broadcast chat message"
        );
    }

    fn handle_relay(&self, to: &str, payload: String) {
        let SessionState::Joined { network_id, .. } = &self.state else {
            debug!(
                connection_id = self.connection_id(),
                to = %to,
                "Dropping relay from unjoined connection"
            );
            return;
        };

        match self.registry.lookup(network_id.as_str(), to) {
            Some(target) => {
                if let Err(e) = target.send(payload) {
                    debug!(
                        connection_id = self.connection_id(),
                        target_connection_id = target.id(),
                        error = %e,
                        "Failed to relay message"
                    );
                }
            }
            None => {
                debug!(
                    connection_id = self.connection_id(),
                    network_id = %network_id,
                    to = %to,
                    "Relay target not found"
                );
            }
        }
    }

    /// Handle a transport close or error
    ///
    /// Safe to call more than once; only the first call after a join does
    /// anything.
    pub fn handle_disconnect(&mut self) {
        self.leave_current();
    }

    fn leave_current(&mut self) {
        let SessionState::Joined {
            network_id,
            username,
        } = mem::take(&mut self.state)
        else {
            return;
        };

        let outcome =
            self.registry
                .release(network_id.as_str(), &username, self.connection_id());

        if !outcome.removed {
            debug!(
                connection_id = self.connection_id(),
                network_id = %network_id,
                username = %username,
                "Membership already superseded, nothing to release"
            );
            return;
        }

        info!(
            connection_id = self.connection_id(),
            network_id = %network_id,
            username = %username,
            remaining = outcome.remaining.len(),
            "User left network"
        );

        if outcome.network_removed() {
            return;
        }

        fan_out(
            &outcome.remaining,
            &ServerMessage::UserLeft {
                username,
                network_id: network_id.to_string(),
            },
        );

        if self.broadcast_network_info {
            fan_out(
                &outcome.remaining,
                &ServerMessage::NetworkInfo {
                    network_id: Some(network_id.to_string()),
                    user_count: outcome.remaining.len(),
                },
            );
        }
    }

    /// Send a record to this connection only
    fn reply(&self, message: &ServerMessage) {
        fan_out(std::slice::from_ref(&self.connection), message);
    }
}

/// Serialize once and queue on every recipient, returning how many accepted it
fn fan_out(recipients: &[Connection], message: &ServerMessage) -> usize {
    if recipients.is_empty() {
        return 0;
    }

    let payload = match message.to_json() {
        Ok(payload) => payload,
        Err(e) => {
            warn!(kind = message.kind(), error = %e, "Failed to serialize message");
            return 0;
        }
    };

    let mut delivered = 0;
    for recipient in recipients {
        match recipient.send(payload.clone()) {
            Ok(()) => delivered += 1,
            Err(e) => {
                debug!(
                    connection_id = recipient.id(),
                    kind = message.kind(),
                    error = %e,
                    "Failed to queue message for connection"
                );
            }
        }
    }
    delivered
}
