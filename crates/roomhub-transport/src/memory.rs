//! In-memory transport.
//!
//! Connects a session to a [`MemoryPeer`] over unbounded channels. Used for
//! exercising session logic without sockets.

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;

use crate::traits::{FrameSink, FrameSource, Inbound, TransportError};

/// A frame sent by the server side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// Text frame.
    Text(String),
    /// Ping control frame.
    Ping(Bytes),
    /// Close frame.
    Close,
}

/// Create a connected server-side sink/source and client-side peer.
#[must_use]
pub fn pair() -> (MemorySink, MemorySource, MemoryPeer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    (
        MemorySink {
            tx: out_tx,
            closed: false,
        },
        MemorySource { rx: in_rx },
        MemoryPeer {
            tx: Some(in_tx),
            rx: out_rx,
        },
    )
}

/// Server-side sending half.
#[derive(Debug)]
pub struct MemorySink {
    tx: mpsc::UnboundedSender<Outbound>,
    closed: bool,
}

impl MemorySink {
    fn push(&self, frame: Outbound) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.tx
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }
}

#[async_trait]
impl FrameSink for MemorySink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.push(Outbound::Text(text))
    }

    async fn send_ping(&mut self, payload: Bytes) -> Result<(), TransportError> {
        self.push(Outbound::Ping(payload))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if self.closed {
            return Ok(());
        }
        let _ = self.tx.send(Outbound::Close);
        self.closed = true;
        Ok(())
    }
}

/// Server-side receiving half.
#[derive(Debug)]
pub struct MemorySource {
    rx: mpsc::UnboundedReceiver<Inbound>,
}

#[async_trait]
impl FrameSource for MemorySource {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        Ok(self.rx.recv().await)
    }
}

/// Client side of an in-memory connection.
#[derive(Debug)]
pub struct MemoryPeer {
    tx: Option<mpsc::UnboundedSender<Inbound>>,
    rx: mpsc::UnboundedReceiver<Outbound>,
}

impl MemoryPeer {
    /// Send a frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side is gone or the peer disconnected.
    pub fn send(&self, frame: Inbound) -> Result<(), TransportError> {
        self.tx
            .as_ref()
            .ok_or(TransportError::ConnectionClosed)?
            .send(frame)
            .map_err(|_| TransportError::ConnectionClosed)
    }

    /// Send a text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns an error if the server side is gone.
    pub fn send_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.send(Inbound::Text(text.into()))
    }

    /// Wait for the next frame from the server. `None` once the server side is dropped.
    pub async fn recv(&mut self) -> Option<Outbound> {
        self.rx.recv().await
    }

    /// Take a frame if one is already waiting.
    pub fn try_recv(&mut self) -> Option<Outbound> {
        self.rx.try_recv().ok()
    }

    /// Drop the sending direction, as if the client's socket went away.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_round_trip() {
        let (mut sink, mut source, mut peer) = pair();

        peer.send_text("hello").unwrap();
        assert_eq!(
            source.recv().await.unwrap(),
            Some(Inbound::Text("hello".into()))
        );

        sink.send_text("world".into()).await.unwrap();
        sink.send_ping(Bytes::new()).await.unwrap();
        assert_eq!(peer.recv().await, Some(Outbound::Text("world".into())));
        assert_eq!(peer.recv().await, Some(Outbound::Ping(Bytes::new())));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (mut sink, _source, mut peer) = pair();
        sink.close().await.unwrap();
        sink.close().await.unwrap();

        assert_eq!(peer.recv().await, Some(Outbound::Close));
        assert!(peer.try_recv().is_none());
        assert!(matches!(
            sink.send_text("late".into()).await,
            Err(TransportError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn test_disconnect_ends_source() {
        let (_sink, mut source, mut peer) = pair();
        peer.disconnect();
        assert_eq!(source.recv().await.unwrap(), None);
        assert!(peer.send_text("late").is_err());
    }
}
