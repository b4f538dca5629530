//! User directory.
//!
//! Resolves emails to user IDs for the room management routes, and answers
//! admin checks for a room.

use crate::config::DirectoryUser;
use async_trait::async_trait;
use dashmap::DashMap;
use roomhub_core::{Hub, UserId};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Directory errors.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// Backend unavailable.
    #[error("Directory unavailable: {0}")]
    Unavailable(String),
}

/// Lookup service for users.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Resolve an email address to a user ID. `None` if no such user exists.
    async fn user_id_by_email(&self, email: &str) -> Result<Option<UserId>, DirectoryError>;

    /// Whether `user_id` is an admin of `room_id`.
    async fn is_user_admin(&self, user_id: &str, room_id: &str) -> Result<bool, DirectoryError>;
}

/// Directory seeded from configuration that reads admin rights from the hub.
pub struct HubBackedDirectory {
    users: DashMap<String, UserId>,
    hub: Arc<Hub>,
}

impl HubBackedDirectory {
    /// Create a directory over `hub`, seeded with `users`.
    #[must_use]
    pub fn new(hub: Arc<Hub>, users: &[DirectoryUser]) -> Self {
        let directory = Self {
            users: DashMap::with_capacity(users.len()),
            hub,
        };
        for user in users {
            directory.insert(&user.email, user.user_id.clone());
        }
        directory
    }

    /// Add or replace a user. Emails match case-insensitively.
    pub fn insert(&self, email: &str, user_id: impl Into<UserId>) {
        self.users.insert(normalize(email), user_id.into());
    }

    /// Number of known users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

fn normalize(email: &str) -> String {
    email.trim().to_ascii_lowercase()
}

#[async_trait]
impl UserDirectory for HubBackedDirectory {
    async fn user_id_by_email(&self, email: &str) -> Result<Option<UserId>, DirectoryError> {
        let found = self.users.get(&normalize(email)).map(|id| id.value().clone());
        if found.is_none() {
            debug!(%email, "Unknown email");
        }
        Ok(found)
    }

    async fn is_user_admin(&self, user_id: &str, room_id: &str) -> Result<bool, DirectoryError> {
        Ok(self.hub.is_admin(room_id, user_id))
    }
}
