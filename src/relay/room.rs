use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use super::connection::ClientConnection;

struct Room {
    members: HashMap<String, Arc<ClientConnection>>,
}

/// Maps a live teacher id to the set of student connections observing that
/// teacher's session. A room exists if and only if the teacher is live.
pub struct RoomTable {
    rooms: RwLock<HashMap<String, Room>>,
}

impl RoomTable {
    pub fn new() -> Self {
        Self {
            rooms: RwLock::new(HashMap::new()),
        }
    }

    /// Opens a room for a teacher going live. Returns false if the room
    /// already exists (idempotent restart keeps the membership intact).
    pub async fn open(&self, teacher_id: &str) -> bool {
        let mut rooms = self.rooms.write().await;
        if rooms.contains_key(teacher_id) {
            return false;
        }

        rooms.insert(
            teacher_id.to_string(),
            Room {
                members: HashMap::new(),
            },
        );
        tracing::info!(teacher_id = %teacher_id, "Room opened");
        true
    }

    /// Closes a teacher's room, returning every evicted member so the caller
    /// can notify them. Closing a room that does not exist yields nothing.
    pub async fn close(&self, teacher_id: &str) -> Vec<Arc<ClientConnection>> {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.remove(teacher_id) else {
            return Vec::new();
        };

        let evicted: Vec<Arc<ClientConnection>> = room.members.into_values().collect();
        tracing::info!(
            teacher_id = %teacher_id,
            evicted = evicted.len(),
            "Room closed"
        );
        evicted
    }

    /// Adds a connection to a teacher's room. Joining a teacher who is not
    /// live is a no-op and returns false; the connection stays outside.
    pub async fn join(&self, teacher_id: &str, connection: Arc<ClientConnection>) -> bool {
        let mut rooms = self.rooms.write().await;
        let Some(room) = rooms.get_mut(teacher_id) else {
            return false;
        };

        room.members.insert(connection.id.clone(), connection);
        true
    }

    /// Removes a connection from a teacher's room. Always safe, even if the
    /// connection was never a member.
    pub async fn leave(&self, teacher_id: &str, conn_id: &str) {
        let mut rooms = self.rooms.write().await;
        if let Some(room) = rooms.get_mut(teacher_id) {
            if room.members.remove(conn_id).is_some() {
                tracing::debug!(
                    teacher_id = %teacher_id,
                    conn_id = %conn_id,
                    "Member left room"
                );
            }
        }
    }

    /// Removes a connection from whichever room it belongs to, if any.
    /// Returns the teacher id of the room it was evicted from.
    pub async fn leave_any(&self, conn_id: &str) -> Option<String> {
        let mut rooms = self.rooms.write().await;
        for (teacher_id, room) in rooms.iter_mut() {
            if room.members.remove(conn_id).is_some() {
                return Some(teacher_id.clone());
            }
        }
        None
    }

    pub async fn members(&self, teacher_id: &str) -> Vec<Arc<ClientConnection>> {
        let rooms = self.rooms.read().await;
        rooms
            .get(teacher_id)
            .map(|room| room.members.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn member_count(&self, teacher_id: &str) -> usize {
        let rooms = self.rooms.read().await;
        rooms.get(teacher_id).map_or(0, |room| room.members.len())
    }

    pub async fn exists(&self, teacher_id: &str) -> bool {
        let rooms = self.rooms.read().await;
        rooms.contains_key(teacher_id)
    }
}
