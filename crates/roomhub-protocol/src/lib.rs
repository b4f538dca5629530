//! # roomhub-protocol
//!
//! Wire protocol definitions for the roomhub chat server.
//!
//! A session exchanges JSON messages of the shape
//! `{id, room_id, sender_id, content, type, timestamp}`.
//!
//! ## Message Types
//!
//! - `join` / `leave` - Room membership requests from a client
//! - `message` - Chat content fanned out to a room
//! - `system` - Server notices (joins, leaves)
//! - `error` - Direct replies to a single connection
//!
//! ## Example
//!
//! ```rust
//! use roomhub_protocol::{codec, WireMessage};
//!
//! let msg = WireMessage::chat("lobby", "alice", "Hello, world!");
//!
//! let encoded = codec::encode(&msg).unwrap();
//! let decoded = codec::decode(&encoded).unwrap();
//! assert_eq!(msg, decoded);
//! ```

pub mod codec;
pub mod frames;

pub use codec::{decode, encode, ProtocolError, MAX_MESSAGE_SIZE};
pub use frames::{generate_message_id, MessageType, WireMessage};
