//! The room hub.
//!
//! The hub owns every room and every registered connection. A single
//! reader/writer lock guards both maps: membership changes take the write
//! lock, broadcasts take the read lock just long enough to resolve their
//! recipients. The lock is never held across an await point or while
//! touching a transport.

use crate::connection::{Connection, EnqueueError};
use crate::message::Message;
use crate::persistence::{PersistHandle, RoomStore, StoreError};
use crate::room::{JoinDenied, Room, RoomId, RoomSnapshot, RoomSummary, UserId};
use parking_lot::RwLock;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, trace, warn};

/// Hub errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum HubError {
    /// Room not found.
    #[error("Room not found: {0}")]
    RoomNotFound(RoomId),

    /// No live connection for the user.
    #[error("No active connection for user: {0}")]
    ConnectionNotFound(UserId),

    /// The user may not join the room.
    #[error("Not authorized to join room {room}")]
    NotAuthorized {
        /// Target room.
        room: RoomId,
        /// Rejected user.
        user: UserId,
    },

    /// The user was removed from the room by an admin.
    #[error("Membership in room {room} was revoked")]
    Revoked {
        /// Target room.
        room: RoomId,
        /// Rejected user.
        user: UserId,
    },

    /// The user is already active in the room.
    #[error("Already in room {room}")]
    AlreadyJoined {
        /// Target room.
        room: RoomId,
        /// Joining user.
        user: UserId,
    },

    /// The requester lacks admin rights.
    #[error("User {user} is not an admin of room {room}")]
    Forbidden {
        /// Target room.
        room: RoomId,
        /// Requesting user.
        user: UserId,
    },

    /// The creator's membership cannot be changed.
    #[error("The creator of room {0} cannot be removed")]
    CreatorImmutable(RoomId),
}

/// A registered connection and the rooms it has joined.
struct ConnectionEntry {
    conn: Arc<Connection>,
    rooms: HashSet<RoomId>,
}

#[derive(Default)]
struct HubState {
    rooms: HashMap<RoomId, Room>,
    connections: HashMap<UserId, ConnectionEntry>,
}

impl HubState {
    /// Remove a user's registration and deactivate them everywhere.
    fn detach(&mut self, user_id: &str) -> Option<Arc<Connection>> {
        let entry = self.connections.remove(user_id)?;
        for room_id in &entry.rooms {
            if let Some(room) = self.rooms.get_mut(room_id) {
                room.deactivate(user_id);
                debug!(room = %room_id, user = %user_id, "Removed from room");
            }
        }
        Some(entry.conn)
    }
}

/// Outcome of one broadcast.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BroadcastReport {
    /// Whether the target room exists.
    pub room_found: bool,
    /// Active members resolved to a live connection.
    pub recipients: usize,
    /// Messages successfully queued.
    pub delivered: usize,
    /// Users evicted because their queue was full or closed.
    pub evicted: Vec<UserId>,
}

/// Hub statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HubStats {
    /// Number of rooms.
    pub room_count: usize,
    /// Number of registered connections.
    pub connection_count: usize,
    /// Sum of active members over all rooms.
    pub active_memberships: usize,
}

/// The central room hub.
#[derive(Default)]
pub struct Hub {
    state: RwLock<HubState>,
    persister: Option<PersistHandle>,
}

impl Hub {
    /// Create an empty hub without persistence.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty hub that writes room changes through `persister`.
    #[must_use]
    pub fn with_persistence(persister: PersistHandle) -> Self {
        Self {
            state: RwLock::new(HubState::default()),
            persister: Some(persister),
        }
    }

    /// Pre-populate rooms from a store. Existing rooms with the same ID are replaced.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    pub async fn load_rooms(&self, store: &dyn RoomStore) -> Result<usize, StoreError> {
        let snapshots = store.load_all_rooms().await?;
        let count = snapshots.len();

        let mut state = self.state.write();
        for snapshot in snapshots {
            let room = Room::from_snapshot(snapshot);
            debug!(
                room = %room.id(),
                name = %room.name(),
                authorized = room.authorized_members().len(),
                admins = room.admins().len(),
                "Loaded room"
            );
            state.rooms.insert(room.id().to_string(), room);
        }
        drop(state);

        info!(rooms = count, "Loaded rooms from store");
        Ok(count)
    }

    /// Create a room. The creator becomes its first member and admin.
    pub fn create_room(&self, name: &str, creator_id: &str, is_private: bool) -> Room {
        let room = Room::new(name, creator_id, is_private);
        let created = room.clone();

        let mut state = self.state.write();
        state.rooms.insert(room.id().to_string(), room);
        self.persist(created.snapshot());
        drop(state);

        info!(room = %created.id(), creator = %creator_id, private = is_private, "Created room");
        created
    }

    /// Get a copy of a room's current state.
    #[must_use]
    pub fn get_room(&self, room_id: &str) -> Option<Room> {
        self.state.read().rooms.get(room_id).cloned()
    }

    #[must_use]
    pub fn room_exists(&self, room_id: &str) -> bool {
        self.state.read().rooms.contains_key(room_id)
    }

    /// Whether `user_id` is currently active in the room. `None` if the room does not exist.
    #[must_use]
    pub fn is_active_member(&self, room_id: &str, user_id: &str) -> Option<bool> {
        self.state
            .read()
            .rooms
            .get(room_id)
            .map(|room| room.is_active(user_id))
    }

    /// Whether `user_id` is an admin of the room.
    #[must_use]
    pub fn is_admin(&self, room_id: &str, user_id: &str) -> bool {
        self.state
            .read()
            .rooms
            .get(room_id)
            .is_some_and(|room| room.is_admin(user_id))
    }

    /// Join a room. See [`Hub::try_join_room`].
    pub fn join_room(&self, room_id: &str, user_id: &str) -> bool {
        self.try_join_room(room_id, user_id).is_ok()
    }

    /// Join a room with the user's registered connection.
    ///
    /// Public rooms authorize the user on the way in, unless an admin
    /// revoked them.
    ///
    /// # Errors
    ///
    /// Returns an error if the room does not exist, the user may not join,
    /// is already active in it, or has no registered connection.
    pub fn try_join_room(&self, room_id: &str, user_id: &str) -> Result<(), HubError> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let room = state
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| HubError::RoomNotFound(room_id.to_string()))?;

        let newly_authorized = match room.admit(user_id) {
            Ok(newly) => newly,
            Err(reason) => {
                debug!(room = %room_id, user = %user_id, ?reason, "Join refused");
                let (room, user) = (room_id.to_string(), user_id.to_string());
                return Err(match reason {
                    JoinDenied::NotAuthorized => HubError::NotAuthorized { room, user },
                    JoinDenied::Revoked => HubError::Revoked { room, user },
                });
            }
        };
        let snapshot = newly_authorized.then(|| room.snapshot());

        let result = match state.connections.get_mut(user_id) {
            Some(entry) => {
                if room.activate(user_id) {
                    entry.rooms.insert(room_id.to_string());
                    debug_assert!(room.holds_creator_invariant());
                    info!(
                        room = %room_id,
                        user = %user_id,
                        active = room.active_members().len(),
                        "User joined room"
                    );
                    Ok(())
                } else {
                    debug!(room = %room_id, user = %user_id, "Already in room");
                    Err(HubError::AlreadyJoined {
                        room: room_id.to_string(),
                        user: user_id.to_string(),
                    })
                }
            }
            None => {
                debug!(room = %room_id, user = %user_id, "Join without a registered connection");
                Err(HubError::ConnectionNotFound(user_id.to_string()))
            }
        };

        // Submitted before unlocking so snapshots of a room reach the store in order.
        if let Some(snapshot) = snapshot {
            self.persist(snapshot);
        }
        drop(guard);
        result
    }

    /// Leave a room. Returns `false` if the user was not active in it.
    pub fn leave_room(&self, room_id: &str, user_id: &str) -> bool {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let Some(room) = state.rooms.get_mut(room_id) else {
            return false;
        };
        if !room.deactivate(user_id) {
            return false;
        }
        if let Some(entry) = state.connections.get_mut(user_id) {
            entry.rooms.remove(room_id);
        }

        info!(
            room = %room_id,
            user = %user_id,
            active = room.active_members().len(),
            "User left room"
        );
        if room.active_members().is_empty() && !room.is_private() {
            debug!(room = %room_id, "Public room is now empty");
        }
        true
    }

    /// Authorize a user for a room on behalf of an admin.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::RoomNotFound`] or [`HubError::Forbidden`].
    pub fn add_authorized_member(
        &self,
        room_id: &str,
        user_id: &str,
        requested_by: &str,
    ) -> Result<(), HubError> {
        self.update_as_admin(room_id, requested_by, |room| {
            if room.authorize(user_id) {
                info!(room = %room_id, user = %user_id, by = %requested_by, "Member authorized");
            }
        })
    }

    /// Grant admin rights (and membership) on behalf of an admin.
    ///
    /// # Errors
    ///
    /// Returns [`HubError::RoomNotFound`] or [`HubError::Forbidden`].
    pub fn add_admin(&self, room_id: &str, user_id: &str, requested_by: &str) -> Result<(), HubError> {
        self.update_as_admin(room_id, requested_by, |room| {
            if room.grant_admin(user_id) {
                info!(room = %room_id, user = %user_id, by = %requested_by, "Admin granted");
            }
        })
    }

    /// Revoke a member. See [`Hub::try_remove_authorized_member`].
    pub fn remove_authorized_member(&self, room_id: &str, user_id: &str, requested_by: &str) -> bool {
        self.try_remove_authorized_member(room_id, user_id, requested_by)
            .is_ok()
    }

    /// Revoke a user's membership, removing them from the room if active.
    ///
    /// # Errors
    ///
    /// Returns an error if the room does not exist, the requester is not an
    /// admin, or the target is the creator.
    pub fn try_remove_authorized_member(
        &self,
        room_id: &str,
        user_id: &str,
        requested_by: &str,
    ) -> Result<(), HubError> {
        let mut guard = self.state.write();
        let state = &mut *guard;

        let room = state
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| HubError::RoomNotFound(room_id.to_string()))?;

        if room.creator_id() != requested_by && !room.is_admin(requested_by) {
            warn!(room = %room_id, by = %requested_by, "Member removal without admin rights");
            return Err(HubError::Forbidden {
                room: room_id.to_string(),
                user: requested_by.to_string(),
            });
        }
        if user_id == room.creator_id() {
            return Err(HubError::CreatorImmutable(room_id.to_string()));
        }

        room.revoke(user_id);
        debug_assert!(room.holds_creator_invariant());
        let snapshot = room.snapshot();

        if let Some(entry) = state.connections.get_mut(user_id) {
            entry.rooms.remove(room_id);
        }
        self.persist(snapshot);
        drop(guard);

        info!(room = %room_id, user = %user_id, by = %requested_by, "Member removed");
        Ok(())
    }

    /// Register a connection under its user ID.
    ///
    /// A connection already registered for the same user is closed and
    /// unregistered first; it is returned so the caller can log it.
    pub fn register_connection(&self, conn: Arc<Connection>) -> Option<Arc<Connection>> {
        let user_id = conn.user_id().to_string();

        let mut state = self.state.write();
        let existing = state
            .connections
            .get(&user_id)
            .map(|entry| entry.conn.id().clone());
        let replaced = match existing {
            Some(id) if id == *conn.id() => return None,
            Some(_) => state.detach(&user_id),
            None => None,
        };
        state.connections.insert(
            user_id.clone(),
            ConnectionEntry {
                conn: Arc::clone(&conn),
                rooms: HashSet::new(),
            },
        );
        drop(state);

        if let Some(old) = &replaced {
            old.close();
            warn!(
                user = %user_id,
                old = %old.id(),
                new = %conn.id(),
                "Replaced existing connection"
            );
        }
        info!(user = %user_id, connection = %conn.id(), "Connection registered");
        replaced
    }

    /// Unregister whatever connection is registered for `user_id`.
    ///
    /// Returns `false` if nothing was registered; calling it twice is harmless.
    pub fn unregister_connection(&self, user_id: &str) -> bool {
        let removed = self.state.write().detach(user_id);
        match removed {
            Some(conn) => {
                conn.close();
                info!(user = %user_id, connection = %conn.id(), "Connection unregistered");
                true
            }
            None => false,
        }
    }

    /// Unregister `conn` only if it is still the registered connection for
    /// its user. The connection is closed either way.
    pub fn unregister_session(&self, conn: &Connection) -> bool {
        let removed = {
            let mut state = self.state.write();
            let is_current = state
                .connections
                .get(conn.user_id())
                .is_some_and(|entry| entry.conn.id() == conn.id());
            if is_current {
                state.detach(conn.user_id())
            } else {
                None
            }
        };
        conn.close();

        if removed.is_some() {
            info!(user = %conn.user_id(), connection = %conn.id(), "Connection unregistered");
            true
        } else {
            false
        }
    }

    /// Get the registered connection for a user.
    #[must_use]
    pub fn connection(&self, user_id: &str) -> Option<Arc<Connection>> {
        self.state
            .read()
            .connections
            .get(user_id)
            .map(|entry| Arc::clone(&entry.conn))
    }

    /// Rooms the user's registered connection has joined.
    #[must_use]
    pub fn joined_rooms(&self, user_id: &str) -> Vec<RoomId> {
        self.state
            .read()
            .connections
            .get(user_id)
            .map(|entry| entry.rooms.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Fan a message out to every active member of its room.
    ///
    /// Enqueueing never waits: a recipient whose queue is full is evicted
    /// instead, so one slow consumer cannot stall the others.
    pub fn broadcast(&self, message: Message) -> BroadcastReport {
        let recipients: Vec<Arc<Connection>> = {
            let state = self.state.read();
            let Some(room) = state.rooms.get(&message.room_id) else {
                trace!(room = %message.room_id, "Broadcast to unknown room");
                return BroadcastReport::default();
            };
            room.active_members()
                .iter()
                .filter_map(|user_id| state.connections.get(user_id))
                .map(|entry| Arc::clone(&entry.conn))
                .collect()
        };

        let message = Arc::new(message);
        let mut report = BroadcastReport {
            room_found: true,
            recipients: recipients.len(),
            ..BroadcastReport::default()
        };
        let mut overloaded = Vec::new();

        for conn in recipients {
            match conn.try_enqueue(Arc::clone(&message)) {
                Ok(()) => report.delivered += 1,
                Err(EnqueueError::Full) => {
                    warn!(
                        room = %message.room_id,
                        user = %conn.user_id(),
                        "Outbound queue full, evicting"
                    );
                    overloaded.push(conn);
                }
                Err(EnqueueError::Closed) => {
                    debug!(user = %conn.user_id(), "Connection closed during broadcast");
                    overloaded.push(conn);
                }
            }
        }

        if !overloaded.is_empty() {
            report.evicted = self.evict(&overloaded);
        }

        trace!(
            room = %message.room_id,
            recipients = report.recipients,
            delivered = report.delivered,
            "Broadcast complete"
        );
        report
    }

    /// Unregister and close connections that failed to accept a message.
    fn evict(&self, conns: &[Arc<Connection>]) -> Vec<UserId> {
        let mut evicted = Vec::with_capacity(conns.len());
        {
            let mut state = self.state.write();
            for conn in conns {
                let is_current = state
                    .connections
                    .get(conn.user_id())
                    .is_some_and(|entry| entry.conn.id() == conn.id());
                if is_current {
                    state.detach(conn.user_id());
                    evicted.push(conn.user_id().to_string());
                }
            }
        }
        for conn in conns {
            conn.close();
        }
        evicted
    }

    /// Summaries of every room the user is authorized for, oldest first.
    #[must_use]
    pub fn rooms_for_user(&self, user_id: &str) -> Vec<RoomSummary> {
        let state = self.state.read();
        let mut rooms: Vec<RoomSummary> = state
            .rooms
            .values()
            .filter(|room| room.is_authorized(user_id))
            .map(|room| room.summary_for(user_id))
            .collect();
        drop(state);

        rooms.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        rooms
    }

    /// Number of registered connections.
    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.state.read().connections.len()
    }

    /// Number of rooms.
    #[must_use]
    pub fn room_count(&self) -> usize {
        self.state.read().rooms.len()
    }

    /// Get hub statistics.
    #[must_use]
    pub fn stats(&self) -> HubStats {
        let state = self.state.read();
        HubStats {
            room_count: state.rooms.len(),
            connection_count: state.connections.len(),
            active_memberships: state.rooms.values().map(|r| r.active_members().len()).sum(),
        }
    }

    /// Apply an admin-only change to a room and persist the result.
    fn update_as_admin(
        &self,
        room_id: &str,
        requested_by: &str,
        apply: impl FnOnce(&mut Room),
    ) -> Result<(), HubError> {
        let mut state = self.state.write();
        let room = state
            .rooms
            .get_mut(room_id)
            .ok_or_else(|| HubError::RoomNotFound(room_id.to_string()))?;

        if !room.is_admin(requested_by) {
            warn!(room = %room_id, by = %requested_by, "Membership change without admin rights");
            return Err(HubError::Forbidden {
                room: room_id.to_string(),
                user: requested_by.to_string(),
            });
        }

        apply(room);
        debug_assert!(room.holds_creator_invariant());
        self.persist(room.snapshot());
        Ok(())
    }

    /// Queue a snapshot for the store. Callers hold the write lock.
    fn persist(&self, snapshot: RoomSnapshot) {
        if let Some(persister) = &self.persister {
            persister.submit(snapshot);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::OutboundQueue;
    use crate::persistence::{spawn_persister, MemoryRoomStore};
    use roomhub_protocol::WireMessage;

    fn connect(hub: &Hub, user: &str, capacity: usize) -> (Arc<Connection>, OutboundQueue) {
        let (conn, queue) = Connection::new(user, user.to_uppercase(), capacity);
        hub.register_connection(Arc::clone(&conn));
        (conn, queue)
    }

    fn assert_creator_invariant(hub: &Hub) {
        let state = hub.state.read();
        for room in state.rooms.values() {
            assert!(room.holds_creator_invariant(), "room {}", room.id());
        }
    }

    #[test]
    fn test_create_and_get_room() {
        let hub = Hub::new();
        let room = hub.create_room("general", "u1", true);

        let fetched = hub.get_room(room.id()).unwrap();
        assert_eq!(fetched.name(), "general");
        assert!(fetched.is_authorized("u1"));
        assert!(fetched.is_admin("u1"));
        assert!(fetched.active_members().is_empty());
        assert!(hub.get_room("missing").is_none());
    }

    #[test]
    fn test_scenario_private_room_join_after_authorization() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", true);
        let (_c2, _q2) = connect(&hub, "u2", 8);

        assert!(hub.add_authorized_member(room.id(), "u2", "u1").is_ok());
        assert!(hub.join_room(room.id(), "u2"));

        let active = hub.get_room(room.id()).unwrap().active_members().clone();
        assert_eq!(active, HashSet::from(["u2".to_string()]));
        assert_eq!(hub.joined_rooms("u2"), vec![room.id().to_string()]);
    }

    #[test]
    fn test_scenario_public_room_auto_authorizes() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", false);
        let (_c2, _q2) = connect(&hub, "u2", 8);

        assert!(hub.join_room(room.id(), "u2"));
        let room = hub.get_room(room.id()).unwrap();
        assert!(room.is_authorized("u2"));
        assert!(room.is_active("u2"));
    }

    #[test]
    fn test_scenario_join_missing_room() {
        let hub = Hub::new();
        let (_c1, _q1) = connect(&hub, "u1", 8);

        assert!(!hub.join_room("missing-room", "u1"));
        assert_eq!(
            hub.try_join_room("missing-room", "u1"),
            Err(HubError::RoomNotFound("missing-room".into()))
        );
        assert!(!hub.room_exists("missing-room"));
        assert_eq!(hub.stats().room_count, 0);
    }

    #[test]
    fn test_join_when_already_active() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", false);
        let (_c1, _q1) = connect(&hub, "u1", 8);

        assert!(hub.join_room(room.id(), "u1"));
        assert!(matches!(
            hub.try_join_room(room.id(), "u1"),
            Err(HubError::AlreadyJoined { .. })
        ));
        assert!(!hub.join_room(room.id(), "u1"));
        assert_eq!(hub.get_room(room.id()).unwrap().active_members().len(), 1);
    }

    #[test]
    fn test_private_room_rejects_unauthorized_join() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", true);
        let (_c1, _q1) = connect(&hub, "u1", 8);
        let (_c2, _q2) = connect(&hub, "u2", 8);
        assert!(hub.join_room(room.id(), "u1"));

        assert!(matches!(
            hub.try_join_room(room.id(), "u2"),
            Err(HubError::NotAuthorized { .. })
        ));
        let after = hub.get_room(room.id()).unwrap();
        assert_eq!(after.active_members(), &HashSet::from(["u1".to_string()]));
        assert!(!after.is_authorized("u2"));
    }

    #[test]
    fn test_join_requires_registered_connection() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", false);

        assert_eq!(
            hub.try_join_room(room.id(), "ghost"),
            Err(HubError::ConnectionNotFound("ghost".into()))
        );
        let after = hub.get_room(room.id()).unwrap();
        assert!(after.is_authorized("ghost"));
        assert!(after.active_members().is_empty());
    }

    #[test]
    fn test_leave_room() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", false);
        let (_c1, _q1) = connect(&hub, "u1", 8);

        assert!(!hub.leave_room(room.id(), "u1"));
        assert!(hub.join_room(room.id(), "u1"));
        assert!(hub.leave_room(room.id(), "u1"));
        assert!(!hub.leave_room(room.id(), "u1"));
        assert!(!hub.leave_room("missing", "u1"));

        let after = hub.get_room(room.id()).unwrap();
        assert!(after.is_authorized("u1"));
        assert!(after.active_members().is_empty());
        assert!(hub.joined_rooms("u1").is_empty());
    }

    #[test]
    fn test_add_member_requires_admin() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", true);

        assert_eq!(
            hub.add_authorized_member("missing", "u2", "u1"),
            Err(HubError::RoomNotFound("missing".into()))
        );
        assert!(matches!(
            hub.add_authorized_member(room.id(), "u3", "u2"),
            Err(HubError::Forbidden { .. })
        ));
        assert!(!hub.get_room(room.id()).unwrap().is_authorized("u3"));
    }

    #[test]
    fn test_add_admin_delegates_rights() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", true);

        hub.add_admin(room.id(), "u2", "u1").unwrap();
        assert!(hub.is_admin(room.id(), "u2"));
        hub.add_authorized_member(room.id(), "u3", "u2").unwrap();
        assert!(hub.get_room(room.id()).unwrap().is_authorized("u3"));
        assert!(matches!(
            hub.add_admin(room.id(), "u4", "u3"),
            Err(HubError::Forbidden { .. })
        ));
    }

    #[test]
    fn test_creator_can_never_be_removed() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", false);
        hub.add_admin(room.id(), "u2", "u1").unwrap();

        for admin in ["u1", "u2"] {
            assert!(!hub.remove_authorized_member(room.id(), "u1", admin));
            assert_eq!(
                hub.try_remove_authorized_member(room.id(), "u1", admin),
                Err(HubError::CreatorImmutable(room.id().to_string()))
            );
        }
        assert_creator_invariant(&hub);
    }

    #[test]
    fn test_remove_member_deactivates_and_revokes() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", false);
        let (_c2, _q2) = connect(&hub, "u2", 8);
        assert!(hub.join_room(room.id(), "u2"));

        assert!(!hub.remove_authorized_member(room.id(), "u2", "u3"));
        assert!(!hub.remove_authorized_member("missing", "u2", "u1"));
        assert!(hub.remove_authorized_member(room.id(), "u2", "u1"));

        let after = hub.get_room(room.id()).unwrap();
        assert!(!after.is_authorized("u2"));
        assert!(after.active_members().is_empty());
        assert!(hub.joined_rooms("u2").is_empty());

        // Revoked users are not re-admitted by joining a public room.
        assert!(matches!(
            hub.try_join_room(room.id(), "u2"),
            Err(HubError::Revoked { .. })
        ));
        hub.add_authorized_member(room.id(), "u2", "u1").unwrap();
        assert!(hub.join_room(room.id(), "u2"));
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", false);
        let (c1, _q1) = connect(&hub, "u1", 8);
        assert!(hub.join_room(room.id(), "u1"));

        assert!(hub.unregister_connection("u1"));
        assert!(c1.is_closed());
        assert!(hub.get_room(room.id()).unwrap().active_members().is_empty());
        assert!(hub.get_room(room.id()).unwrap().is_authorized("u1"));

        assert!(!hub.unregister_connection("u1"));
        assert!(!hub.unregister_connection("never-seen"));
        assert_eq!(hub.stats().connection_count, 0);
    }

    #[test]
    fn test_reregistration_replaces_previous_connection() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", false);
        let (old, _old_q) = connect(&hub, "u1", 8);
        assert!(hub.join_room(room.id(), "u1"));

        let (new, _new_q) = Connection::new("u1", "U1", 8);
        let replaced = hub.register_connection(Arc::clone(&new)).unwrap();
        assert_eq!(replaced.id(), old.id());
        assert!(old.is_closed());
        assert!(!new.is_closed());
        assert!(hub.get_room(room.id()).unwrap().active_members().is_empty());
        assert!(hub.joined_rooms("u1").is_empty());

        // The old session's teardown must not remove the new registration.
        assert!(!hub.unregister_session(&old));
        assert_eq!(hub.connection("u1").unwrap().id(), new.id());

        assert!(hub.unregister_session(&new));
        assert!(hub.connection("u1").is_none());
    }

    #[test]
    fn test_register_same_connection_twice_is_noop() {
        let hub = Hub::new();
        let (conn, _q) = connect(&hub, "u1", 8);
        assert!(hub.register_connection(Arc::clone(&conn)).is_none());
        assert!(!conn.is_closed());
    }

    #[tokio::test]
    async fn test_broadcast_reaches_active_members_only() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", false);
        let (_c1, mut q1) = connect(&hub, "u1", 8);
        let (_c2, mut q2) = connect(&hub, "u2", 8);
        let (_c3, q3) = connect(&hub, "u3", 8);
        assert!(hub.join_room(room.id(), "u1"));
        assert!(hub.join_room(room.id(), "u2"));

        let report = hub.broadcast(WireMessage::chat(room.id(), "u1", "hello"));
        assert!(report.room_found);
        assert_eq!(report.recipients, 2);
        assert_eq!(report.delivered, 2);
        assert!(report.evicted.is_empty());

        assert_eq!(q1.recv().await.unwrap().content, "hello");
        assert_eq!(q2.recv().await.unwrap().content, "hello");
        assert!(q3.is_empty());
    }

    #[test]
    fn test_broadcast_to_missing_room_is_noop() {
        let hub = Hub::new();
        let report = hub.broadcast(WireMessage::chat("missing", "u1", "hello"));
        assert_eq!(report, BroadcastReport::default());
    }

    #[tokio::test]
    async fn test_broadcast_evicts_exactly_the_slow_consumer() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", false);
        let mut queues = Vec::new();
        for user in ["u1", "u2", "u3", "u4"] {
            let capacity = if user == "u3" { 1 } else { 8 };
            let (conn, queue) = connect(&hub, user, capacity);
            assert!(hub.join_room(room.id(), user));
            queues.push((conn, queue));
        }

        // Fill u3's queue.
        queues[2]
            .0
            .try_enqueue(Arc::new(WireMessage::chat(room.id(), "x", "filler")))
            .unwrap();

        let report = hub.broadcast(WireMessage::chat(room.id(), "u1", "hello"));
        assert_eq!(report.recipients, 4);
        assert_eq!(report.delivered, 3);
        assert_eq!(report.evicted, vec!["u3".to_string()]);

        let room_after = hub.get_room(room.id()).unwrap();
        assert_eq!(room_after.active_members().len(), 3);
        assert!(!room_after.is_active("u3"));
        assert!(hub.connection("u3").is_none());
        assert!(queues[2].0.is_closed());

        for (i, (_, queue)) in queues.iter_mut().enumerate() {
            if i == 2 {
                continue;
            }
            assert_eq!(queue.recv().await.unwrap().content, "hello");
        }
    }

    #[tokio::test]
    async fn test_per_recipient_fifo() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", false);
        let (_c1, mut q1) = connect(&hub, "u1", 64);
        assert!(hub.join_room(room.id(), "u1"));

        for i in 0..20 {
            hub.broadcast(WireMessage::chat(room.id(), "u1", i.to_string()));
        }
        for i in 0..20 {
            assert_eq!(q1.recv().await.unwrap().content, i.to_string());
        }
    }

    #[tokio::test]
    async fn test_concurrent_admin_additions_are_not_lost() {
        let hub = Arc::new(Hub::new());
        let room = hub.create_room("R", "u1", true);
        hub.add_admin(room.id(), "u2", "u1").unwrap();

        let mut tasks = Vec::new();
        for (admin, prefix) in [("u1", "a"), ("u2", "b")] {
            let hub = Arc::clone(&hub);
            let room_id = room.id().to_string();
            tasks.push(tokio::spawn(async move {
                for i in 0..100 {
                    hub.add_authorized_member(&room_id, &format!("{prefix}{i}"), admin)
                        .unwrap();
                    tokio::task::yield_now().await;
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let after = hub.get_room(room.id()).unwrap();
        for i in 0..100 {
            assert!(after.is_authorized(&format!("a{i}")));
            assert!(after.is_authorized(&format!("b{i}")));
        }
        assert_eq!(after.authorized_members().len(), 202);
    }

    #[test]
    fn test_invariant_holds_across_operation_sequence() {
        let hub = Hub::new();
        let private = hub.create_room("P", "u1", true);
        let public = hub.create_room("Q", "u2", false);
        let (_c1, _q1) = connect(&hub, "u1", 8);
        let (_c2, _q2) = connect(&hub, "u2", 8);
        let (_c3, _q3) = connect(&hub, "u3", 8);

        hub.add_authorized_member(private.id(), "u3", "u1").unwrap();
        hub.add_admin(public.id(), "u3", "u2").unwrap();
        hub.join_room(private.id(), "u3");
        hub.join_room(public.id(), "u1");
        hub.remove_authorized_member(public.id(), "u2", "u3");
        hub.remove_authorized_member(private.id(), "u1", "u3");
        hub.remove_authorized_member(private.id(), "u3", "u1");
        hub.leave_room(public.id(), "u1");
        hub.unregister_connection("u3");
        hub.unregister_connection("u1");

        assert_creator_invariant(&hub);
    }

    #[test]
    fn test_rooms_for_user() {
        let hub = Hub::new();
        let a = hub.create_room("A", "u1", true);
        let b = hub.create_room("B", "u2", false);
        hub.create_room("C", "u3", true);
        hub.add_authorized_member(b.id(), "u1", "u2").unwrap();

        let rooms = hub.rooms_for_user("u1");
        let ids: HashSet<_> = rooms.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, HashSet::from([a.id(), b.id()]));
        assert!(rooms.iter().find(|r| r.id == a.id()).unwrap().is_admin);
        assert!(!rooms.iter().find(|r| r.id == b.id()).unwrap().is_admin);
    }

    #[test]
    fn test_stats() {
        let hub = Hub::new();
        let room = hub.create_room("R", "u1", false);
        let (_c1, _q1) = connect(&hub, "u1", 8);
        let (_c2, _q2) = connect(&hub, "u2", 8);
        hub.join_room(room.id(), "u1");
        hub.join_room(room.id(), "u2");

        let stats = hub.stats();
        assert_eq!(stats.room_count, 1);
        assert_eq!(stats.connection_count, 2);
        assert_eq!(stats.active_memberships, 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_changes_persist_latest_snapshot() {
        let store = Arc::new(MemoryRoomStore::new());
        let (handle, task) = spawn_persister(store.clone());
        let hub = Arc::new(Hub::with_persistence(handle));

        let rooms: Vec<String> = (0..50)
            .map(|i| {
                let room = hub.create_room(&format!("R{i}"), "u1", true);
                hub.add_admin(room.id(), "u2", "u1").unwrap();
                room.id().to_string()
            })
            .collect();

        let workers: Vec<_> = ["u1", "u2"]
            .into_iter()
            .map(|admin| {
                let hub = Arc::clone(&hub);
                let rooms = rooms.clone();
                std::thread::spawn(move || {
                    for room_id in &rooms {
                        for i in 0..20 {
                            hub.add_authorized_member(room_id, &format!("{admin}-m{i}"), admin)
                                .unwrap();
                        }
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }

        let live: Vec<_> = rooms
            .iter()
            .map(|id| hub.get_room(id).unwrap().snapshot())
            .collect();
        drop(hub);
        task.await.unwrap();

        for snapshot in live {
            assert_eq!(store.get(&snapshot.id).unwrap(), Some(snapshot));
        }
    }

    #[tokio::test]
    async fn test_persistence_round_trip() {
        let store = Arc::new(MemoryRoomStore::new());
        let (handle, task) = spawn_persister(store.clone());

        let hub = Hub::with_persistence(handle);
        let room = hub.create_room("R", "u1", true);
        hub.add_authorized_member(room.id(), "u2", "u1").unwrap();
        hub.add_admin(room.id(), "u3", "u1").unwrap();
        drop(hub);
        task.await.unwrap();

        let restored = Hub::new();
        assert_eq!(restored.load_rooms(store.as_ref()).await.unwrap(), 1);
        let loaded = restored.get_room(room.id()).unwrap();
        assert!(loaded.is_authorized("u2"));
        assert!(loaded.is_admin("u3"));
        assert!(loaded.active_members().is_empty());
        assert!(loaded.is_private());
    }
}
