//! # roomhub-transport
//!
//! Transport abstraction layer for roomhub sessions.
//!
//! - **WebSocket** - Upgraded axum sockets, the production transport
//! - **Memory** - Channel-backed pairs for driving sessions in tests
//!
//! ## Transport Abstraction
//!
//! Every transport splits into a [`FrameSink`] and a [`FrameSource`], so the
//! session loop never sees the underlying protocol.
//!
//! ```rust,ignore
//! use roomhub_transport::{FrameSource, Inbound};
//!
//! async fn read_loop(mut source: impl FrameSource) {
//!     while let Ok(Some(frame)) = source.recv().await {
//!         if let Inbound::Text(text) = frame {
//!             // Decode and dispatch
//!         }
//!     }
//! }
//! ```

pub mod memory;
pub mod traits;

#[cfg(feature = "websocket")]
pub mod websocket;

pub use traits::{FrameSink, FrameSource, Inbound, TransportError};
