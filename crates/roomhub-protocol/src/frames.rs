//! Message types for the roomhub wire protocol.
//!
//! Every message exchanged over a session is a single JSON object of the
//! shape `{id, room_id, sender_id, content, type, timestamp}`. Clients may
//! leave `id`, `sender_id` and `timestamp` blank; the server fills them in
//! before fan-out.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

/// Message kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    /// Chat content from a user.
    Message,
    /// Request to join a room.
    Join,
    /// Request to leave a room.
    Leave,
    /// Server-generated notice (joins, leaves).
    System,
    /// Direct error reply to a single connection.
    Error,
}

impl MessageType {
    /// Wire name of this type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::Message => "message",
            MessageType::Join => "join",
            MessageType::Leave => "leave",
            MessageType::System => "system",
            MessageType::Error => "error",
        }
    }
}

impl std::fmt::Display for MessageType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A chat message as it appears on the wire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    /// Message identifier.
    #[serde(default)]
    pub id: String,
    /// Target room.
    #[serde(default)]
    pub room_id: String,
    /// Sending user.
    #[serde(default)]
    pub sender_id: String,
    /// Message body.
    #[serde(default)]
    pub content: String,
    /// Message kind.
    #[serde(rename = "type")]
    pub kind: MessageType,
    /// Creation time. `None` until the server stamps it.
    #[serde(default, deserialize_with = "deserialize_timestamp")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl WireMessage {
    /// Create a message stamped with a fresh ID and the current time.
    #[must_use]
    pub fn new(
        kind: MessageType,
        room_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_message_id(),
            room_id: room_id.into(),
            sender_id: sender_id.into(),
            content: content.into(),
            kind,
            timestamp: Some(Utc::now()),
        }
    }

    /// Create a chat message.
    #[must_use]
    pub fn chat(
        room_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(MessageType::Message, room_id, sender_id, content)
    }

    /// Create a join request.
    #[must_use]
    pub fn join(room_id: impl Into<String>) -> Self {
        Self::new(MessageType::Join, room_id, "", "")
    }

    /// Create a leave request.
    #[must_use]
    pub fn leave(room_id: impl Into<String>) -> Self {
        Self::new(MessageType::Leave, room_id, "", "")
    }

    /// Create a server notice for a room.
    #[must_use]
    pub fn system(
        room_id: impl Into<String>,
        sender_id: impl Into<String>,
        content: impl Into<String>,
    ) -> Self {
        Self::new(MessageType::System, room_id, sender_id, content)
    }

    /// Create an error reply.
    #[must_use]
    pub fn error(room_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self::new(MessageType::Error, room_id, "server", content)
    }

    /// Fill in the server-owned fields that the client left blank.
    ///
    /// `sender_id` is always overwritten with the authenticated sender.
    pub fn stamp(&mut self, sender_id: &str) {
        if self.id.is_empty() {
            self.id = generate_message_id();
        }
        self.sender_id = sender_id.to_string();
        if self.timestamp.is_none() {
            self.timestamp = Some(Utc::now());
        }
    }
}

/// Generate a unique message ID.
#[must_use]
pub fn generate_message_id() -> String {
    Uuid::new_v4().to_string()
}

/// Accepts `null`, `""`, `0`, Unix seconds, or an RFC 3339 string.
/// Zero and pre-epoch values count as unset.
fn deserialize_timestamp<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;

    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    let parsed = match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) if s.is_empty() => None,
        Some(serde_json::Value::String(s)) => Some(
            DateTime::parse_from_rfc3339(&s)
                .map_err(D::Error::custom)?
                .with_timezone(&Utc),
        ),
        Some(serde_json::Value::Number(n)) => {
            let secs = n
                .as_i64()
                .ok_or_else(|| D::Error::custom("timestamp must be an integer"))?;
            Utc.timestamp_opt(secs, 0).single()
        }
        Some(other) => {
            return Err(D::Error::custom(format!("invalid timestamp: {other}")));
        }
    };

    Ok(parsed.filter(|ts| ts.timestamp() > 0))
}
