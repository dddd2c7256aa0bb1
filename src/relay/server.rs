use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;

use super::connection::{ClientConnection, ClientRole, ConnectionRegistry};
use super::live::{LiveSessionState, StartOutcome};
use super::room::RoomTable;
use super::signaling::{ClientMessage, ServerMessage};

/// Snapshot of the live slot for the status endpoint.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LiveStatus {
    pub live: bool,
    pub teacher_id: Option<String>,
    pub audio_enabled: bool,
    pub observers: usize,
    pub started_at: Option<u64>,
    pub connections: usize,
}

/// The relay server: owns the connection registry, the room membership table
/// and the live-session slot, and runs every inbound event to completion
/// against them. Fan-out never blocks; it enqueues on each target's
/// outbound channel.
pub struct RelayServer {
    registry: ConnectionRegistry,
    rooms: RoomTable,
    live: LiveSessionState,
}

impl RelayServer {
    pub fn new() -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            rooms: RoomTable::new(),
            live: LiveSessionState::new(),
        }
    }

    /// Registers a new transport connection.
    pub async fn connect(
        &self,
        sender: mpsc::UnboundedSender<ServerMessage>,
    ) -> Arc<ClientConnection> {
        let connection = self.registry.register(sender).await;
        tracing::info!(conn_id = %connection.id, "Connection registered");
        connection
    }

    /// Handles a transport close. A teacher holding the live slot triggers
    /// the same teardown as an explicit stop; a student is removed from its
    /// room. Everything here is a defensive no-op when state is already gone.
    pub async fn disconnect(&self, conn_id: &str) {
        let Some(connection) = self.registry.remove(conn_id).await else {
            return;
        };

        match connection.role().await {
            ClientRole::Teacher => {
                if let Some((teacher_id, timestamp)) = self.live.stop_connection(conn_id).await {
                    tracing::info!(
                        teacher_id = %teacher_id,
                        conn_id = %conn_id,
                        "Live teacher disconnected, tearing session down"
                    );
                    self.teardown(&teacher_id, timestamp).await;
                }
            }
            ClientRole::Student => {
                if let Some(teacher_id) = self.rooms.leave_any(conn_id).await {
                    tracing::info!(
                        teacher_id = %teacher_id,
                        conn_id = %conn_id,
                        "Student disconnected, left room"
                    );
                }
            }
            ClientRole::Unknown => {}
        }

        tracing::info!(conn_id = %conn_id, "Connection removed");
    }

    pub async fn handle_message(&self, connection: &Arc<ClientConnection>, message: ClientMessage) {
        match message {
            ClientMessage::CheckTeacherStatus => self.check_teacher_status(connection).await,
            ClientMessage::StartLive { teacher_id } => {
                self.start_live(connection, teacher_id).await
            }
            ClientMessage::StopLive { teacher_id } => self.stop_live(teacher_id).await,
            ClientMessage::JoinTeacherRoom { teacher_id } => {
                self.join_room(connection, teacher_id).await
            }
            ClientMessage::LeaveTeacherRoom { teacher_id } => {
                self.leave_room(connection, teacher_id).await
            }
            ClientMessage::WhiteboardUpdate {
                teacher_id,
                whiteboard_data,
            } => {
                self.whiteboard_update(connection, teacher_id, whiteboard_data)
                    .await
            }
            ClientMessage::AudioToggle {
                teacher_id,
                enabled,
            } => self.audio_toggle(teacher_id, enabled).await,
            ClientMessage::AudioData { teacher_id, .. } => self.audio_data(teacher_id).await,
            ClientMessage::SessionEnded {
                teacher_id,
                has_audio,
            } => self.session_ended(teacher_id, has_audio).await,
        }
    }

    /// Replies to the requester only: a synthetic online event for the
    /// current occupant, plus the audio flag if it is set.
    async fn check_teacher_status(&self, connection: &Arc<ClientConnection>) {
        let Some(occupancy) = self.live.occupant().await else {
            return;
        };

        let timestamp = self.live.timestamp().await;
        connection.send(ServerMessage::TeacherOnline {
            teacher_id: occupancy.teacher_id.clone(),
            timestamp,
        });

        if occupancy.audio_enabled {
            connection.send(ServerMessage::AudioToggle {
                teacher_id: occupancy.teacher_id,
                enabled: true,
            });
        }
    }

    async fn start_live(&self, connection: &Arc<ClientConnection>, teacher_id: String) {
        match self.live.start(&teacher_id, &connection.id).await {
            StartOutcome::Started { timestamp } => {
                self.rooms.open(&teacher_id).await;
                connection.set_role(ClientRole::Teacher).await;
                connection.set_room(Some(teacher_id.clone())).await;
                tracing::info!(
                    teacher_id = %teacher_id,
                    conn_id = %connection.id,
                    "Live session started"
                );
                // All connections, not just the room: students must discover
                // a newly-live teacher before they have joined.
                self.broadcast_all(ServerMessage::TeacherOnline {
                    teacher_id,
                    timestamp,
                })
                .await;
            }
            StartOutcome::Rebound { timestamp } => {
                connection.set_role(ClientRole::Teacher).await;
                connection.set_room(Some(teacher_id.clone())).await;
                tracing::info!(
                    teacher_id = %teacher_id,
                    conn_id = %connection.id,
                    "Live teacher re-confirmed on new connection"
                );
                connection.send(ServerMessage::TeacherOnline {
                    teacher_id,
                    timestamp,
                });
            }
            StartOutcome::Rejected { occupant } => {
                tracing::warn!(
                    teacher_id = %teacher_id,
                    occupant = %occupant,
                    "Rejected start while another teacher is live"
                );
                connection.send(ServerMessage::LiveError {
                    message: format!("Another teacher ({}) is already live", occupant),
                });
            }
        }
    }

    async fn stop_live(&self, teacher_id: String) {
        match self.live.stop(&teacher_id).await {
            Some(timestamp) => self.teardown(&teacher_id, timestamp).await,
            None => {
                tracing::debug!(
                    teacher_id = %teacher_id,
                    "Ignoring stop for teacher who is not live"
                );
            }
        }
    }

    /// Shared teardown for explicit stop and teacher disconnect: evict the
    /// room, then announce the offline transition to every connection.
    async fn teardown(&self, teacher_id: &str, timestamp: u64) {
        let evicted = self.rooms.close(teacher_id).await;
        for member in &evicted {
            member.set_room(None).await;
        }
        tracing::info!(
            teacher_id = %teacher_id,
            evicted = evicted.len(),
            "Live session ended"
        );

        self.broadcast_all(ServerMessage::TeacherOffline {
            teacher_id: teacher_id.to_string(),
            timestamp,
        })
        .await;
    }

    async fn join_room(&self, connection: &Arc<ClientConnection>, teacher_id: String) {
        if !self.rooms.join(&teacher_id, connection.clone()).await {
            tracing::debug!(
                teacher_id = %teacher_id,
                conn_id = %connection.id,
                "Ignoring join for teacher who is not live"
            );
            return;
        }

        connection.set_role(ClientRole::Student).await;
        connection.set_room(Some(teacher_id.clone())).await;
        tracing::info!(
            teacher_id = %teacher_id,
            conn_id = %connection.id,
            "Student joined room"
        );

        // Synthetic catch-up so a late joiner converges on the live state
        let timestamp = self.live.timestamp().await;
        connection.send(ServerMessage::TeacherOnline {
            teacher_id: teacher_id.clone(),
            timestamp,
        });

        let audio_enabled = self
            .live
            .occupant()
            .await
            .map_or(false, |o| o.teacher_id == teacher_id && o.audio_enabled);
        if audio_enabled {
            connection.send(ServerMessage::AudioToggle {
                teacher_id,
                enabled: true,
            });
        }
    }

    async fn leave_room(&self, connection: &Arc<ClientConnection>, teacher_id: String) {
        self.rooms.leave(&teacher_id, &connection.id).await;
        connection.set_room(None).await;
    }

    async fn whiteboard_update(
        &self,
        connection: &Arc<ClientConnection>,
        teacher_id: String,
        whiteboard_data: String,
    ) {
        if !self.live.is_live(&teacher_id).await {
            tracing::debug!(
                teacher_id = %teacher_id,
                "Dropping whiteboard update for teacher who is not live"
            );
            return;
        }

        self.broadcast_room(
            &teacher_id,
            ServerMessage::WhiteboardUpdate {
                teacher_id: teacher_id.clone(),
                whiteboard_data,
            },
            Some(&connection.id),
        )
        .await;
    }

    async fn audio_toggle(&self, teacher_id: String, enabled: bool) {
        if !self.live.set_audio(&teacher_id, enabled).await {
            tracing::debug!(
                teacher_id = %teacher_id,
                "Dropping audio toggle for teacher who is not live"
            );
            return;
        }

        self.broadcast_room(
            &teacher_id,
            ServerMessage::AudioToggle {
                teacher_id: teacher_id.clone(),
                enabled,
            },
            None,
        )
        .await;
    }

    /// The audio payload itself is stored externally by the sending side;
    /// room members only learn that audio exists for this session.
    async fn audio_data(&self, teacher_id: String) {
        if !self.live.is_live(&teacher_id).await {
            tracing::debug!(
                teacher_id = %teacher_id,
                "Dropping audio data for teacher who is not live"
            );
            return;
        }

        self.broadcast_room(
            &teacher_id,
            ServerMessage::AudioAvailable {
                teacher_id: teacher_id.clone(),
            },
            None,
        )
        .await;
    }

    async fn session_ended(&self, teacher_id: String, has_audio: bool) {
        if !self.live.is_live(&teacher_id).await {
            tracing::debug!(
                teacher_id = %teacher_id,
                "Dropping session-ended signal for teacher who is not live"
            );
            return;
        }

        self.broadcast_room(
            &teacher_id,
            ServerMessage::SessionEnded {
                teacher_id: teacher_id.clone(),
                has_audio,
            },
            None,
        )
        .await;
    }

    async fn broadcast_all(&self, message: ServerMessage) {
        for connection in self.registry.all().await {
            connection.send(message.clone());
        }
    }

    async fn broadcast_room(
        &self,
        teacher_id: &str,
        message: ServerMessage,
        except: Option<&str>,
    ) {
        for member in self.rooms.members(teacher_id).await {
            if except == Some(member.id.as_str()) {
                continue;
            }
            member.send(message.clone());
        }
    }

    pub async fn status(&self) -> LiveStatus {
        let occupancy = self.live.occupant().await;
        let observers = match occupancy.as_ref() {
            Some(o) => self.rooms.member_count(&o.teacher_id).await,
            None => 0,
        };

        LiveStatus {
            live: occupancy.is_some(),
            teacher_id: occupancy.as_ref().map(|o| o.teacher_id.clone()),
            audio_enabled: occupancy.as_ref().map_or(false, |o| o.audio_enabled),
            observers,
            started_at: occupancy.as_ref().map(|o| o.started_at),
            connections: self.registry.count().await,
        }
    }
}

impl Default for RelayServer {
    fn default() -> Self {
        Self::new()
    }
}
