//! Connection session lifecycle.
//!
//! A session registers a [`Connection`] with the hub and then runs two duties
//! side by side: the read duty decodes and dispatches client messages, the
//! write duty drains the outbound queue onto the transport. Whichever duty
//! stops first closes the connection, which stops the other. The session
//! unregisters from the hub exactly once, after both duties have returned.

use crate::config::Config;
use crate::metrics::{self, ConnectionMetricsGuard};
use bytes::Bytes;
use roomhub_core::message::{join_notice, leave_notice};
use roomhub_core::{Connection, Hub, HubError, Message, MessageType, OutboundQueue};
use roomhub_protocol::codec::{self, ProtocolError};
use roomhub_transport::{FrameSink, FrameSource, Inbound};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, info, trace, warn};

/// Upper bound on messages coalesced into one outbound frame.
const MAX_BATCH: usize = 64;

/// Session tuning.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Largest accepted inbound frame in bytes.
    pub max_message_size: usize,
    /// Outbound queue capacity.
    pub queue_capacity: usize,
    /// Interval between server pings.
    pub ping_interval: Duration,
    /// Read deadline, refreshed by every inbound frame.
    pub pong_timeout: Duration,
    /// Deadline for a single write.
    pub write_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self::from(&Config::default())
    }
}

impl From<&Config> for SessionConfig {
    fn from(config: &Config) -> Self {
        Self {
            max_message_size: config.limits.max_message_size,
            queue_capacity: config.limits.outbound_queue_capacity,
            ping_interval: config.heartbeat.ping_interval(),
            pong_timeout: config.heartbeat.pong_timeout(),
            write_timeout: config.heartbeat.write_timeout(),
        }
    }
}

/// Why a duty stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The connection was closed elsewhere (peer duty or hub eviction).
    Shutdown,
    /// The client closed the connection.
    ClientClosed,
    /// No inbound traffic before the read deadline.
    ReadTimeout,
    /// A write did not finish before the write deadline.
    WriteTimeout,
    /// An inbound frame exceeded the size limit.
    MessageTooLarge,
    /// The transport failed.
    Transport,
}

/// A registered session, ready to run.
pub struct Session {
    hub: Arc<Hub>,
    conn: Arc<Connection>,
    queue: OutboundQueue,
    config: SessionConfig,
}

impl Session {
    /// Create a connection for the user and register it with the hub.
    ///
    /// A previous connection for the same user is closed.
    #[must_use]
    pub fn register(
        hub: Arc<Hub>,
        user_id: impl Into<String>,
        display_name: impl Into<String>,
        config: SessionConfig,
    ) -> Self {
        let (conn, queue) = Connection::new(user_id, display_name, config.queue_capacity);
        if let Some(old) = hub.register_connection(Arc::clone(&conn)) {
            debug!(user = %conn.user_id(), old = %old.id(), "Superseded previous session");
        }
        Self {
            hub,
            conn,
            queue,
            config,
        }
    }

    /// The registered connection.
    #[must_use]
    pub fn connection(&self) -> &Arc<Connection> {
        &self.conn
    }

    /// Run both duties until the session ends, then unregister.
    pub async fn run<S, R>(self, sink: S, source: R)
    where
        S: FrameSink,
        R: FrameSource,
    {
        let Self {
            hub,
            conn,
            queue,
            config,
        } = self;
        let _metrics_guard = ConnectionMetricsGuard::new();
        let _registration = RegistrationGuard {
            hub: &hub,
            conn: &conn,
        };
        info!(user = %conn.user_id(), connection = %conn.id(), "Session started");

        let (read_reason, write_reason) = tokio::join!(
            read_duty(&hub, &conn, source, &config),
            write_duty(&conn, queue, sink, &config),
        );

        info!(
            user = %conn.user_id(),
            connection = %conn.id(),
            read = ?read_reason,
            write = ?write_reason,
            "Session ended"
        );
    }
}

/// Unregisters the session's connection when dropped, also when a duty
/// panics or the session future is cancelled.
struct RegistrationGuard<'a> {
    hub: &'a Hub,
    conn: &'a Connection,
}

impl Drop for RegistrationGuard<'_> {
    fn drop(&mut self) {
        let unregistered = self.hub.unregister_session(self.conn);
        debug!(
            user = %self.conn.user_id(),
            connection = %self.conn.id(),
            unregistered,
            "Session unregistered"
        );
    }
}

async fn read_duty<R: FrameSource>(
    hub: &Hub,
    conn: &Connection,
    mut source: R,
    config: &SessionConfig,
) -> StopReason {
    let shutdown = conn.shutdown_token();

    let reason = loop {
        let received = tokio::select! {
            () = shutdown.cancelled() => break StopReason::Shutdown,
            received = time::timeout(config.pong_timeout, source.recv()) => received,
        };

        let frame = match received {
            Err(_) => {
                debug!(user = %conn.user_id(), "Read deadline missed");
                break StopReason::ReadTimeout;
            }
            Ok(Err(e)) => {
                warn!(user = %conn.user_id(), error = %e, "Receive failed");
                metrics::record_error("transport");
                break StopReason::Transport;
            }
            Ok(Ok(None) | Ok(Some(Inbound::Close))) => break StopReason::ClientClosed,
            Ok(Ok(Some(frame))) => frame,
        };

        let outcome = match &frame {
            Inbound::Text(text) => handle_data(hub, conn, text.as_bytes(), config),
            Inbound::Binary(data) => handle_data(hub, conn, data, config),
            Inbound::Ping(_) | Inbound::Pong(_) => {
                trace!(user = %conn.user_id(), "Keepalive");
                Ok(())
            }
            Inbound::Close => Ok(()),
        };
        if let Err(reason) = outcome {
            break reason;
        }
    };

    conn.close();
    reason
}

/// Decode and dispatch one data frame.
fn handle_data(
    hub: &Hub,
    conn: &Connection,
    data: &[u8],
    config: &SessionConfig,
) -> Result<(), StopReason> {
    let start = Instant::now();
    metrics::record_message(data.len(), "inbound");

    match codec::decode_with_limit(data, config.max_message_size) {
        Ok(message) => dispatch(hub, conn, message),
        Err(ProtocolError::MessageTooLarge { size, max }) => {
            warn!(user = %conn.user_id(), size, max, "Message too large, closing session");
            metrics::record_error("message_too_large");
            return Err(StopReason::MessageTooLarge);
        }
        Err(e) => {
            debug!(user = %conn.user_id(), error = %e, "Undecodable message");
            metrics::record_error("decode");
            reply(conn, Message::error("", "Invalid message format"));
        }
    }

    metrics::record_latency(start.elapsed().as_secs_f64());
    Ok(())
}

/// Act on one decoded client message.
pub(crate) fn dispatch(hub: &Hub, conn: &Connection, mut message: Message) {
    let user_id = conn.user_id();

    match message.kind {
        MessageType::Join => match hub.try_join_room(&message.room_id, user_id) {
            Ok(()) => broadcast(
                hub,
                join_notice(&message.room_id, user_id, conn.display_name()),
            ),
            Err(HubError::AlreadyJoined { .. }) => {
                trace!(room = %message.room_id, user = %user_id, "Repeated join ignored");
            }
            Err(e) => {
                debug!(room = %message.room_id, user = %user_id, error = %e, "Join failed");
                reply(conn, Message::error(message.room_id, format!("Failed to join room: {e}")));
            }
        },
        MessageType::Leave => {
            if hub.leave_room(&message.room_id, user_id) {
                broadcast(
                    hub,
                    leave_notice(&message.room_id, user_id, conn.display_name()),
                );
            } else {
                reply(
                    conn,
                    Message::error(message.room_id, "Failed to leave room: not in room"),
                );
            }
        }
        MessageType::Message => {
            if hub.is_active_member(&message.room_id, user_id) == Some(true) {
                message.stamp(user_id);
                broadcast(hub, message);
            } else {
                debug!(room = %message.room_id, user = %user_id, "Message from non-member");
                reply(
                    conn,
                    Message::error(message.room_id, "Not a member of this room"),
                );
            }
        }
        MessageType::System | MessageType::Error => {
            reply(
                conn,
                Message::error(
                    message.room_id,
                    format!("Unsupported message type: {}", message.kind),
                ),
            );
        }
    }
}

fn broadcast(hub: &Hub, message: Message) {
    let report = hub.broadcast(message);
    metrics::record_evictions(report.evicted.len());
}

/// Send a message to this connection only.
fn reply(conn: &Connection, message: Message) {
    if let Err(e) = conn.try_enqueue(Arc::new(message)) {
        debug!(user = %conn.user_id(), error = ?e, "Reply dropped");
    }
}

async fn write_duty<S: FrameSink>(
    conn: &Connection,
    mut queue: OutboundQueue,
    mut sink: S,
    config: &SessionConfig,
) -> StopReason {
    let shutdown = conn.shutdown_token();
    let mut ping = time::interval_at(
        time::Instant::now() + config.ping_interval,
        config.ping_interval,
    );
    ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut batch = Vec::with_capacity(MAX_BATCH);

    let reason = loop {
        tokio::select! {
            biased;

            next = queue.recv() => {
                let Some(first) = next else {
                    break StopReason::Shutdown;
                };
                batch.clear();
                batch.push(first);
                queue.drain_ready(&mut batch, MAX_BATCH);

                let text = match encode_frame(&batch) {
                    Ok(text) => text,
                    Err(e) => {
                        warn!(user = %conn.user_id(), error = %e, "Failed to encode outbound batch");
                        metrics::record_error("encode");
                        continue;
                    }
                };
                let len = text.len();
                if let Err(reason) = write_with_deadline(conn, sink.send_text(text), config).await {
                    break reason;
                }
                metrics::record_message(len, "outbound");
                trace!(user = %conn.user_id(), messages = batch.len(), bytes = len, "Flushed");
            }

            _ = ping.tick() => {
                if let Err(reason) = write_with_deadline(conn, sink.send_ping(Bytes::new()), config).await {
                    break reason;
                }
                trace!(user = %conn.user_id(), "Ping sent");
            }

            () = shutdown.cancelled() => break StopReason::Shutdown,
        }
    };

    conn.close();
    if time::timeout(config.write_timeout, sink.close()).await.is_err() {
        debug!(user = %conn.user_id(), "Close frame timed out");
    }
    reason
}

/// Encode a batch into one newline-separated text frame.
fn encode_frame(batch: &[Arc<Message>]) -> Result<String, ProtocolError> {
    let bytes = codec::encode_batch(batch)?;
    // serde_json output is always UTF-8.
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

async fn write_with_deadline<F>(
    conn: &Connection,
    write: F,
    config: &SessionConfig,
) -> Result<(), StopReason>
where
    F: std::future::Future<Output = Result<(), roomhub_transport::TransportError>>,
{
    match time::timeout(config.write_timeout, write).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => {
            debug!(user = %conn.user_id(), error = %e, "Write failed");
            metrics::record_error("transport");
            Err(StopReason::Transport)
        }
        Err(_) => {
            warn!(user = %conn.user_id(), "Write deadline missed");
            metrics::record_error("write_timeout");
            Err(StopReason::WriteTimeout)
        }
    }
}
