//! Message definitions module
//!
//! Inbound records are parsed in two steps: the payload is first read as a
//! generic JSON object, then recognized `type` values are decoded into
//! typed variants. Records with an unrecognized `type` and a string `to`
//! field are relayed verbatim, so the original text is kept for them.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolError;

/// `type` values with a fixed meaning
pub const KNOWN_TYPES: [&str; 3] = ["join", "request_network_info", "message"];

/// A parsed client record
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Bind this connection to a network under a username
    ///
    /// Fields that are missing or not strings come through as `None` so
    /// the session can still answer the caller.
    Join {
        network_id: Option<String>,
        username: Option<String>,
    },
    /// Ask for the member count of any network
    RequestNetworkInfo { network_id: Option<String> },
    /// Broadcast chat to the rest of the caller's network
    Chat {
        message: Option<Value>,
        timestamp: Option<Value>,
    },
    /// Forward the original payload to one named member
    Relay { to: String, payload: String },
    /// Anything else; carries the `type` value if there was one
    Unknown { kind: Option<String> },
}

/// Typed view of the records with a known `type`
#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum TypedMessage {
    #[serde(rename = "join", rename_all = "camelCase")]
    Join {
        #[serde(default)]
        network_id: Option<Value>,
        #[serde(default)]
        username: Option<Value>,
    },

    #[serde(rename = "request_network_info", rename_all = "camelCase")]
    RequestNetworkInfo {
        #[serde(default)]
        network_id: Option<Value>,
    },

    #[serde(rename = "message")]
    Message {
        #[serde(default)]
        message: Option<Value>,
        #[serde(default)]
        timestamp: Option<Value>,
    },
}

impl From<TypedMessage> for InboundMessage {
    fn from(typed: TypedMessage) -> Self {
        match typed {
            TypedMessage::Join {
                network_id,
                username,
            } => InboundMessage::Join {
                network_id: string_field(network_id),
                username: string_field(username),
            },
            TypedMessage::RequestNetworkInfo { network_id } => {
                InboundMessage::RequestNetworkInfo {
                    network_id: string_field(network_id),
                }
            }
            TypedMessage::Message { message, timestamp } => {
                InboundMessage::Chat { message, timestamp }
            }
        }
    }
}

fn string_field(value: Option<Value>) -> Option<String> {
    match value {
        Some(Value::String(s)) => Some(s),
        _ => None,
    }
}

impl InboundMessage {
    /// Parse one text payload
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ProtocolError::MalformedMessage(e.to_string()))?;

        let (kind, to) = match value.as_object() {
            Some(object) => (
                object.get("type").and_then(Value::as_str).map(str::to_owned),
                object.get("to").and_then(Value::as_str).map(str::to_owned),
            ),
            None => {
                return Err(ProtocolError::MalformedMessage(
                    "expected a JSON object".to_string(),
                ))
            }
        };

        match kind.as_deref() {
            Some(known) if KNOWN_TYPES.contains(&known) => {
                let typed: TypedMessage = serde_json::from_value(value)
                    .map_err(|e| ProtocolError::MalformedMessage(e.to_string()))?;
                Ok(typed.into())
            }
            _ => match to {
                Some(to) => Ok(InboundMessage::Relay {
                    to,
                    payload: text.to_string(),
                }),
                None => Ok(InboundMessage::Unknown { kind }),
            },
        }
    }

    /// Short name for logging
    pub fn name(&self) -> &'static str {
        match self {
            InboundMessage::Join { .. } => "join",
            InboundMessage::RequestNetworkInfo { .. } => "request_network_info",
            InboundMessage::Chat { .. } => "message",
            InboundMessage::Relay { .. } => "relay",
            InboundMessage::Unknown { .. } => "unknown",
        }
    }
}

/// Records sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "error")]
    Error { message: String },

    /// `network_id` is absent only when answering a request that had none
    #[serde(rename = "network-info", rename_all = "camelCase")]
    NetworkInfo {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        network_id: Option<String>,
        user_count: usize,
    },

    #[serde(rename = "user-joined", rename_all = "camelCase")]
    UserJoined { username: String, network_id: String },

    #[serde(rename = "user-left", rename_all = "camelCase")]
    UserLeft { username: String, network_id: String },

    #[serde(rename = "message", rename_all = "camelCase")]
    Message {
        username: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<Value>,
        network_id: String,
    },
}

impl ServerMessage {
    /// Serialize to the JSON text sent on the wire
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Get the wire `type` value
    pub fn kind(&self) -> &'static str {
        match self {
            ServerMessage::Error { .. } => "error",
            ServerMessage::NetworkInfo { .. } => "network-info",
            ServerMessage::UserJoined { .. } => "user-joined",
            ServerMessage::UserLeft { .. } => "user-left",
            ServerMessage::Message { .. } => "message",
        }
    }
}
