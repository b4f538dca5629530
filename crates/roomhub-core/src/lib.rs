//! # roomhub-core
//!
//! Room membership, authorization and broadcast fan-out for roomhub.
//!
//! This crate provides the fundamental building blocks:
//!
//! - **Room** - Authorized, admin and active user sets for one room
//! - **Connection** - A live session's outbound queue and shutdown signal
//! - **Hub** - The single authority over rooms and connections
//! - **Persistence** - Write-behind storage of durable room state
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Session   │────▶│     Hub     │────▶│    Room     │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!        ▲                   │
//!        │ outbound queue    ▼
//!        └────────────┌─────────────┐
//!                     │  Persister  │
//!                     └─────────────┘
//! ```

pub mod connection;
pub mod hub;
pub mod message;
pub mod persistence;
pub mod room;

pub use connection::{Connection, ConnectionId, EnqueueError, OutboundQueue, DEFAULT_QUEUE_CAPACITY};
pub use hub::{BroadcastReport, Hub, HubError, HubStats};
pub use message::{Message, MessageType};
pub use persistence::{spawn_persister, MemoryRoomStore, PersistHandle, RoomStore, StoreError};
pub use room::{MemberState, Room, RoomId, RoomSnapshot, RoomSummary, UserId};
