use std::collections::HashMap;
use std::sync::Arc;

use rand::Rng;
use tokio::sync::{mpsc, RwLock};

use super::signaling::ServerMessage;

/// Role a connection takes on once the lifecycle has seen it act.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientRole {
    Unknown,
    Teacher,
    Student,
}

/// One open transport connection. Owned by the registry; rooms hold
/// non-owning references (membership, not lifetime).
pub struct ClientConnection {
    pub id: String,
    role: RwLock<ClientRole>,
    /// Teacher room this connection currently hosts or observes.
    room: RwLock<Option<String>>,
    sender: mpsc::UnboundedSender<ServerMessage>,
}

impl ClientConnection {
    fn new(id: String, sender: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self {
            id,
            role: RwLock::new(ClientRole::Unknown),
            room: RwLock::new(None),
            sender,
        }
    }

    /// Enqueues a message on the outbound channel. Fire-and-forget: a closed
    /// channel means the connection is going away and the message is dropped.
    pub fn send(&self, message: ServerMessage) {
        if self.sender.send(message).is_err() {
            tracing::debug!(conn_id = %self.id, "Dropping message for closed connection");
        }
    }

    pub async fn role(&self) -> ClientRole {
        *self.role.read().await
    }

    pub async fn set_role(&self, role: ClientRole) {
        *self.role.write().await = role;
    }

    pub async fn room(&self) -> Option<String> {
        self.room.read().await.clone()
    }

    pub async fn set_room(&self, room: Option<String>) {
        *self.room.write().await = room;
    }
}

/// Tracks every open connection, independent of any session.
pub struct ConnectionRegistry {
    connections: RwLock<HashMap<String, Arc<ClientConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            connections: RwLock::new(HashMap::new()),
        }
    }

    fn generate_conn_id() -> String {
        format!("conn-{:08x}", rand::thread_rng().gen::<u32>())
    }

    pub async fn register(
        &self,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Arc<ClientConnection> {
        let mut connections = self.connections.write().await;

        let mut id = Self::generate_conn_id();
        while connections.contains_key(&id) {
            id = Self::generate_conn_id();
        }

        let connection = Arc::new(ClientConnection::new(id.clone(), sender));
        connections.insert(id, connection.clone());
        connection
    }

    pub async fn remove(&self, conn_id: &str) -> Option<Arc<ClientConnection>> {
        let mut connections = self.connections.write().await;
        connections.remove(conn_id)
    }

    pub async fn get(&self, conn_id: &str) -> Option<Arc<ClientConnection>> {
        let connections = self.connections.read().await;
        connections.get(conn_id).cloned()
    }

    pub async fn all(&self) -> Vec<Arc<ClientConnection>> {
        let connections = self.connections.read().await;
        connections.values().cloned().collect()
    }

    pub async fn count(&self) -> usize {
        let connections = self.connections.read().await;
        connections.len()
    }
}
