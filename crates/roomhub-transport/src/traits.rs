//! Transport abstraction traits for roomhub.
//!
//! A session talks to its client through two halves: a [`FrameSink`] owned by
//! the write duty and a [`FrameSource`] owned by the read duty. Each transport
//! provides both halves so the session loop stays transport-agnostic.

use async_trait::async_trait;
use bytes::Bytes;
use thiserror::Error;

/// Transport errors.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Connection was closed.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Failed to send data.
    #[error("Send failed: {0}")]
    SendFailed(String),

    /// Failed to receive data.
    #[error("Receive failed: {0}")]
    ReceiveFailed(String),
}

/// A frame received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Text frame.
    Text(String),
    /// Binary frame.
    Binary(Bytes),
    /// Ping control frame.
    Ping(Bytes),
    /// Pong control frame.
    Pong(Bytes),
    /// The client asked to close.
    Close,
}

/// Sending half of a client connection.
#[async_trait]
pub trait FrameSink: Send {
    /// Send a text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a ping control frame.
    async fn send_ping(&mut self, payload: Bytes) -> Result<(), TransportError>;

    /// Send a close frame. Closing twice is not an error.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Receiving half of a client connection.
#[async_trait]
pub trait FrameSource: Send {
    /// Receive the next frame.
    ///
    /// Returns `None` if the connection ended cleanly.
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError>;
}
