//! WebSocket transport implementation.
//!
//! Wraps an upgraded axum [`WebSocket`] and splits it into the two session
//! halves. Pings from the client are answered by the WebSocket layer itself
//! and surface here only as activity.

use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, warn};

use crate::traits::{FrameSink, FrameSource, Inbound, TransportError};

/// Split an upgraded socket into its sending and receiving halves.
#[must_use]
pub fn split(socket: WebSocket) -> (WebSocketSink, WebSocketSource) {
    let (sink, stream) = socket.split();
    (
        WebSocketSink { sink, closed: false },
        WebSocketSource { stream },
    )
}

/// Sending half of a WebSocket.
pub struct WebSocketSink {
    sink: SplitSink<WebSocket, Message>,
    closed: bool,
}

#[async_trait]
impl FrameSink for WebSocketSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.sink
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn send_ping(&mut self, payload: Bytes) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::ConnectionClosed);
        }
        self.sink
            .send(Message::Ping(payload.to_vec()))
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        if let Err(e) = self.sink.send(Message::Close(None)).await {
            debug!(error = %e, "Close frame not delivered");
        }
        self.sink
            .close()
            .await
            .map_err(|e| TransportError::SendFailed(e.to_string()))
    }
}

/// Receiving half of a WebSocket.
pub struct WebSocketSource {
    stream: SplitStream<WebSocket>,
}

#[async_trait]
impl FrameSource for WebSocketSource {
    async fn recv(&mut self) -> Result<Option<Inbound>, TransportError> {
        match self.stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(Inbound::Text(text))),
            Some(Ok(Message::Binary(data))) => Ok(Some(Inbound::Binary(Bytes::from(data)))),
            Some(Ok(Message::Ping(data))) => Ok(Some(Inbound::Ping(Bytes::from(data)))),
            Some(Ok(Message::Pong(data))) => Ok(Some(Inbound::Pong(Bytes::from(data)))),
            Some(Ok(Message::Close(frame))) => {
                debug!(?frame, "Received close frame");
                Ok(Some(Inbound::Close))
            }
            Some(Err(e)) => {
                warn!(error = %e, "WebSocket error");
                Err(TransportError::ReceiveFailed(e.to_string()))
            }
            None => {
                debug!("WebSocket stream ended");
                Ok(None)
            }
        }
    }
}
