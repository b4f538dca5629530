//! Live connection handles.
//!
//! A [`Connection`] is the hub-facing half of a session: the user it is bound
//! to, the sending end of its bounded outbound queue, and a shutdown signal
//! shared with the session's read and write duties. The receiving end,
//! [`OutboundQueue`], is owned by the session's write duty.

use crate::message::Message;
use crate::room::UserId;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// Default outbound queue capacity.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Unique identifier for one connection (not one user).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ConnectionId(String);

impl ConnectionId {
    /// Generate a random connection ID.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("conn_{}", Uuid::new_v4().simple()))
    }

    /// Get the ID as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why an enqueue failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueError {
    /// The outbound queue is at capacity.
    Full,
    /// The connection has been closed.
    Closed,
}

/// A live, authenticated connection.
pub struct Connection {
    id: ConnectionId,
    user_id: UserId,
    display_name: String,
    outbound: Mutex<Option<mpsc::Sender<Arc<Message>>>>,
    shutdown: CancellationToken,
}

impl Connection {
    /// Create a connection and its outbound queue.
    ///
    /// A capacity of zero is treated as one.
    #[must_use]
    pub fn new(
        user_id: impl Into<UserId>,
        display_name: impl Into<String>,
        capacity: usize,
    ) -> (Arc<Self>, OutboundQueue) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let shutdown = CancellationToken::new();
        let conn = Arc::new(Self {
            id: ConnectionId::generate(),
            user_id: user_id.into(),
            display_name: display_name.into(),
            outbound: Mutex::new(Some(tx)),
            shutdown: shutdown.clone(),
        });
        (conn, OutboundQueue { rx, shutdown })
    }

    #[must_use]
    pub fn id(&self) -> &ConnectionId {
        &self.id
    }

    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    #[must_use]
    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    /// Queue a message without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`EnqueueError::Full`] if the queue is at capacity and
    /// [`EnqueueError::Closed`] if the connection was closed.
    pub fn try_enqueue(&self, message: Arc<Message>) -> Result<(), EnqueueError> {
        let guard = self.outbound.lock();
        let Some(tx) = guard.as_ref() else {
            return Err(EnqueueError::Closed);
        };
        tx.try_send(message).map_err(|e| match e {
            TrySendError::Full(_) => EnqueueError::Full,
            TrySendError::Closed(_) => EnqueueError::Closed,
        })
    }

    /// Close the outbound queue and signal both session duties to stop.
    ///
    /// Messages already queued are still delivered by the write duty.
    /// Returns `true` on the first call only.
    pub fn close(&self) -> bool {
        let sender = self.outbound.lock().take();
        self.shutdown.cancel();
        if sender.is_some() {
            debug!(connection = %self.id, user = %self.user_id, "Connection closed");
            true
        } else {
            false
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    /// Token cancelled when the connection closes.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("user_id", &self.user_id)
            .field("display_name", &self.display_name)
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Receiving end of a connection's outbound queue.
pub struct OutboundQueue {
    rx: mpsc::Receiver<Arc<Message>>,
    shutdown: CancellationToken,
}

impl OutboundQueue {
    /// Wait for the next message. Returns `None` once the connection is
    /// closed and the queue has drained.
    pub async fn recv(&mut self) -> Option<Arc<Message>> {
        self.rx.recv().await
    }

    /// Append whatever is already queued, up to `max` messages, without waiting.
    pub fn drain_ready(&mut self, batch: &mut Vec<Arc<Message>>, max: usize) {
        while batch.len() < max {
            match self.rx.try_recv() {
                Ok(message) => batch.push(message),
                Err(_) => break,
            }
        }
    }

    /// Token cancelled when the connection closes.
    #[must_use]
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Number of messages waiting.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rx.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use roomhub_protocol::WireMessage;

    fn msg(content: &str) -> Arc<Message> {
        Arc::new(WireMessage::chat("room", "alice", content))
    }

    #[test]
    fn test_connection_ids_are_unique() {
        let (a, _qa) = Connection::new("alice", "Alice", 4);
        let (b, _qb) = Connection::new("alice", "Alice", 4);
        assert_ne!(a.id(), b.id());
        assert!(a.id().as_str().starts_with("conn_"));
    }

    #[test]
    fn test_enqueue_until_full() {
        let (conn, queue) = Connection::new("alice", "Alice", 2);
        assert!(conn.try_enqueue(msg("1")).is_ok());
        assert!(conn.try_enqueue(msg("2")).is_ok());
        assert_eq!(conn.try_enqueue(msg("3")), Err(EnqueueError::Full));
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_fifo_and_drain() {
        let (conn, mut queue) = Connection::new("alice", "Alice", 8);
        for i in 0..5 {
            conn.try_enqueue(msg(&i.to_string())).unwrap();
        }

        let first = queue.recv().await.unwrap();
        assert_eq!(first.content, "0");

        let mut batch = vec![first];
        queue.drain_ready(&mut batch, 3);
        let contents: Vec<_> = batch.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, ["0", "1", "2"]);
        assert_eq!(queue.len(), 2);
    }

    #[tokio::test]
    async fn test_close_drains_then_ends() {
        let (conn, mut queue) = Connection::new("alice", "Alice", 8);
        conn.try_enqueue(msg("last words")).unwrap();

        assert!(conn.close());
        assert!(!conn.close());
        assert!(conn.is_closed());
        assert!(queue.shutdown_token().is_cancelled());
        assert_eq!(conn.try_enqueue(msg("late")), Err(EnqueueError::Closed));

        assert_eq!(queue.recv().await.unwrap().content, "last words");
        assert!(queue.recv().await.is_none());
    }
}
