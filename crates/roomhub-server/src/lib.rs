//! # roomhub-server
//!
//! HTTP room management and WebSocket sessions on top of the roomhub core.

pub mod config;
pub mod directory;
pub mod handlers;
pub mod metrics;
pub mod session;

pub use config::Config;
pub use handlers::{app, run_server, serve, AppState};
