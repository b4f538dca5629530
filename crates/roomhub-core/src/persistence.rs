//! Room persistence bridge.
//!
//! The hub is the source of truth for live state. Authorized and admin sets
//! are written through a [`RoomStore`] on a background task, so durable state
//! is eventually consistent with the hub and never blocks a hub operation.

use crate::room::{RoomId, RoomSnapshot};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backend unavailable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Stored data could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// External key-value store holding room membership.
#[async_trait]
pub trait RoomStore: Send + Sync {
    /// Load every stored room.
    async fn load_all_rooms(&self) -> Result<Vec<RoomSnapshot>, StoreError>;

    /// Write one room's durable state.
    async fn persist_room(&self, room_id: &str, snapshot: &RoomSnapshot) -> Result<(), StoreError>;
}

/// In-process store keeping rooms as serialized JSON values.
#[derive(Debug, Default)]
pub struct MemoryRoomStore {
    rooms: DashMap<RoomId, String>,
}

impl MemoryRoomStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rooms.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }

    /// Read back one stored room.
    ///
    /// # Errors
    ///
    /// Returns an error if the stored value is corrupt.
    pub fn get(&self, room_id: &str) -> Result<Option<RoomSnapshot>, StoreError> {
        match self.rooms.get(room_id) {
            Some(raw) => Ok(Some(serde_json::from_str(raw.value())?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl RoomStore for MemoryRoomStore {
    async fn load_all_rooms(&self) -> Result<Vec<RoomSnapshot>, StoreError> {
        let mut rooms = Vec::with_capacity(self.rooms.len());
        for entry in self.rooms.iter() {
            match serde_json::from_str::<RoomSnapshot>(entry.value()) {
                Ok(snapshot) => rooms.push(snapshot),
                Err(e) => warn!(room = %entry.key(), error = %e, "Skipping corrupt room"),
            }
        }
        Ok(rooms)
    }

    async fn persist_room(&self, room_id: &str, snapshot: &RoomSnapshot) -> Result<(), StoreError> {
        let raw = serde_json::to_string(snapshot)?;
        self.rooms.insert(room_id.to_string(), raw);
        Ok(())
    }
}

/// Handle for submitting snapshots to the background persister.
#[derive(Debug, Clone)]
pub struct PersistHandle {
    tx: mpsc::UnboundedSender<RoomSnapshot>,
}

impl PersistHandle {
    /// Queue a snapshot for writing. Never blocks.
    pub fn submit(&self, snapshot: RoomSnapshot) {
        if self.tx.send(snapshot).is_err() {
            warn!("Room persister has stopped; snapshot dropped");
        }
    }
}

/// Spawn the background task that writes snapshots to `store`.
///
/// The task ends once every [`PersistHandle`] has been dropped.
#[must_use]
pub fn spawn_persister(store: Arc<dyn RoomStore>) -> (PersistHandle, JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel::<RoomSnapshot>();
    let task = tokio::spawn(async move {
        while let Some(snapshot) = rx.recv().await {
            match store.persist_room(&snapshot.id, &snapshot).await {
                Ok(()) => debug!(room = %snapshot.id, "Room persisted"),
                Err(e) => warn!(room = %snapshot.id, error = %e, "Failed to persist room"),
            }
        }
        info!("Room persister stopped");
    });
    (PersistHandle { tx }, task)
}
