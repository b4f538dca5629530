//! Messages routed by the hub.
//!
//! The hub routes wire messages as-is; these helpers build the notices the
//! hub's callers emit around membership changes.

pub use roomhub_protocol::{MessageType, WireMessage as Message};

/// Notice broadcast after a user joins a room.
#[must_use]
pub fn join_notice(room_id: &str, user_id: &str, display_name: &str) -> Message {
    Message::system(room_id, user_id, format!("{display_name} joined the room"))
}

/// Notice broadcast after a user leaves a room.
#[must_use]
pub fn leave_notice(room_id: &str, user_id: &str, display_name: &str) -> Message {
    Message::system(room_id, user_id, format!("{display_name} left the room"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_notices() {
        let joined = join_notice("r1", "u1", "Alice");
        assert_eq!(joined.kind, MessageType::System);
        assert_eq!(joined.room_id, "r1");
        assert_eq!(joined.sender_id, "u1");
        assert_eq!(joined.content, "Alice joined the room");

        let left = leave_notice("r1", "u1", "Alice");
        assert_eq!(left.content, "Alice left the room");
        assert_ne!(joined.id, left.id);
    }
}
