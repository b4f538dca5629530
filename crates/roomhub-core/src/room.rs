//! Room abstraction for roomhub.
//!
//! A room tracks three user sets: who may join (authorized), who may manage
//! membership (admins), and who is currently joined (active). The creator is
//! always authorized and always an admin.
//!
//! Mutators are crate-private; everything outside the crate goes through
//! [`Hub`](crate::Hub) so that room state is only ever changed under the
//! hub lock.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use tracing::debug;
use uuid::Uuid;

/// A room identifier.
pub type RoomId = String;

/// A user identifier.
pub type UserId = String;

/// Membership state of one user in one room.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberState {
    /// Never authorized.
    Unknown,
    /// Allowed to join, not currently joined.
    Authorized,
    /// Joined with a live connection.
    Active,
    /// Removed by an admin. Only an admin can authorize the user again.
    Revoked,
}

/// Why a join was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinDenied {
    /// Private room and the user is not authorized.
    NotAuthorized,
    /// The user was removed by an admin.
    Revoked,
}

/// A chat room.
#[derive(Debug, Clone)]
pub struct Room {
    id: RoomId,
    name: String,
    creator_id: UserId,
    is_private: bool,
    created_at: DateTime<Utc>,
    authorized: HashSet<UserId>,
    admins: HashSet<UserId>,
    active: HashSet<UserId>,
    revoked: HashSet<UserId>,
}

impl Room {
    /// Create a new room with a generated ID.
    #[must_use]
    pub(crate) fn new(name: impl Into<String>, creator_id: impl Into<UserId>, is_private: bool) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), name, creator_id, is_private)
    }

    pub(crate) fn with_id(
        id: impl Into<RoomId>,
        name: impl Into<String>,
        creator_id: impl Into<UserId>,
        is_private: bool,
    ) -> Self {
        let creator_id = creator_id.into();
        Self {
            id: id.into(),
            name: name.into(),
            authorized: HashSet::from([creator_id.clone()]),
            admins: HashSet::from([creator_id.clone()]),
            creator_id,
            is_private,
            created_at: Utc::now(),
            active: HashSet::new(),
            revoked: HashSet::new(),
        }
    }

    /// Rebuild a room from persisted state. Active membership always starts empty.
    pub(crate) fn from_snapshot(snapshot: RoomSnapshot) -> Self {
        let mut authorized: HashSet<UserId> = snapshot.authorized_members.into_iter().collect();
        let mut admins: HashSet<UserId> = snapshot.admins.into_iter().collect();
        authorized.insert(snapshot.creator_id.clone());
        admins.insert(snapshot.creator_id.clone());

        let mut revoked: HashSet<UserId> = snapshot.revoked.into_iter().collect();
        revoked.retain(|u| !authorized.contains(u));

        Self {
            id: snapshot.id,
            name: snapshot.name,
            creator_id: snapshot.creator_id,
            is_private: snapshot.is_private,
            created_at: snapshot.created_at,
            authorized,
            admins,
            active: HashSet::new(),
            revoked,
        }
    }

    /// Get the room ID.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Get the room name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the creator's user ID.
    #[must_use]
    pub fn creator_id(&self) -> &str {
        &self.creator_id
    }

    /// Whether only authorized users may join.
    #[must_use]
    pub fn is_private(&self) -> bool {
        self.is_private
    }

    /// When the room was created.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Users allowed to join.
    #[must_use]
    pub fn authorized_members(&self) -> &HashSet<UserId> {
        &self.authorized
    }

    /// Users with membership-management rights.
    #[must_use]
    pub fn admins(&self) -> &HashSet<UserId> {
        &self.admins
    }

    /// Users currently joined.
    #[must_use]
    pub fn active_members(&self) -> &HashSet<UserId> {
        &self.active
    }

    #[must_use]
    pub fn is_authorized(&self, user_id: &str) -> bool {
        self.authorized.contains(user_id)
    }

    #[must_use]
    pub fn is_admin(&self, user_id: &str) -> bool {
        self.admins.contains(user_id)
    }

    #[must_use]
    pub fn is_active(&self, user_id: &str) -> bool {
        self.active.contains(user_id)
    }

    /// Membership state of a user in this room.
    #[must_use]
    pub fn member_state(&self, user_id: &str) -> MemberState {
        if self.active.contains(user_id) {
            MemberState::Active
        } else if self.authorized.contains(user_id) {
            MemberState::Authorized
        } else if self.revoked.contains(user_id) {
            MemberState::Revoked
        } else {
            MemberState::Unknown
        }
    }

    /// Whether the creator is still both authorized and an admin.
    #[must_use]
    pub fn holds_creator_invariant(&self) -> bool {
        self.authorized.contains(&self.creator_id) && self.admins.contains(&self.creator_id)
    }

    /// Check whether `user_id` may join, authorizing them on public rooms.
    ///
    /// Returns `Ok(true)` when the user was newly authorized by this call.
    pub(crate) fn admit(&mut self, user_id: &str) -> Result<bool, JoinDenied> {
        if self.authorized.contains(user_id) {
            return Ok(false);
        }
        if self.revoked.contains(user_id) {
            return Err(JoinDenied::Revoked);
        }
        if self.is_private {
            return Err(JoinDenied::NotAuthorized);
        }
        self.authorized.insert(user_id.to_string());
        debug!(room = %self.id, user = %user_id, "Public room: user auto-authorized");
        Ok(true)
    }

    /// Mark an authorized user as active. Returns `true` if newly active.
    pub(crate) fn activate(&mut self, user_id: &str) -> bool {
        debug_assert!(self.authorized.contains(user_id));
        self.active.insert(user_id.to_string())
    }

    /// Remove a user from the active set. Returns `true` if they were active.
    pub(crate) fn deactivate(&mut self, user_id: &str) -> bool {
        self.active.remove(user_id)
    }

    /// Authorize a user. Returns `true` if newly authorized.
    pub(crate) fn authorize(&mut self, user_id: &str) -> bool {
        self.revoked.remove(user_id);
        self.authorized.insert(user_id.to_string())
    }

    /// Authorize a user and grant admin rights. Returns `true` if newly an admin.
    pub(crate) fn grant_admin(&mut self, user_id: &str) -> bool {
        self.authorize(user_id);
        self.admins.insert(user_id.to_string())
    }

    /// Revoke a user's membership. The creator cannot be revoked.
    ///
    /// Returns `true` if the user was authorized before.
    pub(crate) fn revoke(&mut self, user_id: &str) -> bool {
        if user_id == self.creator_id {
            return false;
        }
        self.active.remove(user_id);
        self.admins.remove(user_id);
        let was_authorized = self.authorized.remove(user_id);
        self.revoked.insert(user_id.to_string());
        was_authorized
    }

    /// Durable state of this room.
    #[must_use]
    pub fn snapshot(&self) -> RoomSnapshot {
        RoomSnapshot {
            id: self.id.clone(),
            name: self.name.clone(),
            creator_id: self.creator_id.clone(),
            is_private: self.is_private,
            created_at: self.created_at,
            authorized_members: self.authorized.iter().cloned().collect(),
            admins: self.admins.iter().cloned().collect(),
            revoked: self.revoked.iter().cloned().collect(),
        }
    }

    /// Summary of this room from one user's point of view.
    #[must_use]
    pub fn summary_for(&self, user_id: &str) -> RoomSummary {
        RoomSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            creator_id: self.creator_id.clone(),
            is_private: self.is_private,
            created_at: self.created_at,
            is_admin: self.is_admin(user_id),
            member_count: self.authorized.len(),
            active_count: self.active.len(),
        }
    }
}

/// Persisted room state: everything except active membership.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoomSnapshot {
    pub id: RoomId,
    pub name: String,
    pub creator_id: UserId,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
    pub authorized_members: BTreeSet<UserId>,
    pub admins: BTreeSet<UserId>,
    #[serde(default)]
    pub revoked: BTreeSet<UserId>,
}

/// Room listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoomSummary {
    pub id: RoomId,
    pub name: String,
    pub creator_id: UserId,
    pub is_private: bool,
    pub created_at: DateTime<Utc>,
    pub is_admin: bool,
    pub member_count: usize,
    pub active_count: usize,
}
