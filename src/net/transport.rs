//! Transport module
//!
//! Wraps an upgraded WebSocket stream and exposes whole text payloads.
//! Control frames are answered here so the rest of the server only ever
//! sees complete client records.

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{self, Message};
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, trace, warn};

use crate::config::ServerConfig;
use crate::error::{NetworkError, ProtocolError, RendezvousError, Result};

/// WebSocket transport for relay clients
pub struct WebSocketTransport {
    stream: WebSocketStream<TcpStream>,
}

impl WebSocketTransport {
    /// Create a new WebSocket transport from an already-upgraded WebSocket stream
    pub fn new(stream: WebSocketStream<TcpStream>) -> Self {
        Self { stream }
    }

    /// Upgrade a TCP stream to a WebSocket connection
    pub async fn accept(stream: TcpStream, config: &ServerConfig) -> Result<Self> {
        let ws_stream =
            tokio_tungstenite::accept_async_with_config(stream, Some(websocket_config(config)))
                .await
                .map_err(map_ws_error)?;

        Ok(Self::new(ws_stream))
    }

    /// Read the next text payload
    ///
    /// Returns `Ok(None)` once the peer has closed the connection. Binary
    /// frames are accepted when they hold UTF-8; other binary frames are
    /// dropped.
    pub async fn read_message(&mut self) -> Result<Option<String>> {
        // Read from the WebSocket in a loop to handle control frames
        loop {
            match self.stream.next().await {
                Some(Ok(message)) => match message {
                    Message::Text(text) => {
                        trace!(len = text.len(), "Received text WebSocket message");
                        return Ok(Some(text));
                    }
                    Message::Binary(data) => match decode_binary(data) {
                        Ok(text) => return Ok(Some(text)),
                        Err(e) => {
                            warn!(error = %e, "Dropping binary WebSocket message");
                        }
                    },
                    Message::Close(frame) => {
                        debug!(frame = ?frame, "WebSocket close message received");
                        return Ok(None);
                    }
                    Message::Ping(data) => {
                        if let Err(e) = self.stream.send(Message::Pong(data)).await {
                            warn!("Failed to send pong: {}", e);
                        }
                    }
                    Message::Pong(_) => {}
                    Message::Frame(_) => {}
                },
                Some(Err(e)) => return Err(map_ws_error(e)),
                None => return Ok(None),
            }
        }
    }

    /// Write a text message to the WebSocket
    pub async fn write_message(&mut self, text: String) -> Result<()> {
        trace!(len = text.len(), "Sending text WebSocket message");
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(map_ws_error)
    }

    /// Close the WebSocket connection gracefully
    pub async fn close(&mut self) -> Result<()> {
        self.stream.close(None).await.map_err(map_ws_error)
    }
}

/// Build the tungstenite limits from server config
pub fn websocket_config(config: &ServerConfig) -> WebSocketConfig {
    let mut ws_config = WebSocketConfig::default();
    ws_config.max_message_size = Some(config.max_message_size);
    ws_config.max_frame_size = Some(config.max_message_size);
    ws_config
}

fn map_ws_error(e: tungstenite::Error) -> RendezvousError {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => {
            RendezvousError::Network(NetworkError::ConnectionClosed)
        }
        other => RendezvousError::Network(NetworkError::WebSocket(other.to_string())),
    }
}

fn decode_binary(data: Vec<u8>) -> std::result::Result<String, ProtocolError> {
    String::from_utf8(data).map_err(|_| ProtocolError::NonUtf8Payload)
}
