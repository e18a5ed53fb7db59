//! Error handling module
//!
//! Defines custom error types for the Rendezvous relay.

use std::io;

use thiserror::Error;

/// Main error type for the Rendezvous relay
#[derive(Error, Debug)]
pub enum RendezvousError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("WebSocket error: {0}")]
    WebSocket(String),

    #[error("Write buffer full")]
    WriteBufferFull,

    #[error("Receiver gone")]
    ReceiverGone,
}

/// Protocol-specific errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Malformed message: {0}")]
    MalformedMessage(String),

    /// Display text is sent verbatim to clients in `error` replies
    #[error("Invalid network name")]
    InvalidNetworkName,

    #[error("Binary payload is not valid UTF-8")]
    NonUtf8Payload,
}

/// Result type alias for Rendezvous operations
pub type Result<T> = std::result::Result<T, RendezvousError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = NetworkError::ConnectionClosed;
        assert_eq!(err.to_string(), "Connection closed");

        let err = ProtocolError::MalformedMessage("expected value".to_string());
        assert_eq!(err.to_string(), "Malformed message: expected value");

        let err = NetworkError::WriteBufferFull;
        assert_eq!(err.to_string(), "Write buffer full");
    }

    #[test]
    fn test_invalid_network_name_wire_text() {
        assert_eq!(
            ProtocolError::InvalidNetworkName.to_string(),
            "Invalid network name"
        );
    }

    #[test]
    fn test_nested_conversion() {
        let err: RendezvousError = ProtocolError::NonUtf8Payload.into();
        assert!(matches!(
            err,
            RendezvousError::Protocol(ProtocolError::NonUtf8Payload)
        ));
        assert_eq!(
            err.to_string(),
            "Protocol error: Binary payload is not valid UTF-8"
        );
    }
}
