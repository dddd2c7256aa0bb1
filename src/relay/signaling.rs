use serde::{Deserialize, Serialize};

/// Messages clients send over the live WebSocket. Parsed and validated at the
/// transport boundary; unknown or malformed frames never reach the dispatcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ClientMessage {
    CheckTeacherStatus,

    #[serde(rename_all = "camelCase")]
    StartLive { teacher_id: String },

    #[serde(rename_all = "camelCase")]
    StopLive { teacher_id: String },

    #[serde(rename_all = "camelCase")]
    JoinTeacherRoom { teacher_id: String },

    #[serde(rename_all = "camelCase")]
    LeaveTeacherRoom { teacher_id: String },

    #[serde(rename_all = "camelCase")]
    WhiteboardUpdate {
        teacher_id: String,
        /// Serialized stroke-path data. Opaque to the relay.
        whiteboard_data: String,
    },

    #[serde(rename_all = "camelCase")]
    AudioToggle { teacher_id: String, enabled: bool },

    #[serde(rename_all = "camelCase")]
    AudioData {
        teacher_id: String,
        /// Stored externally by the sending side, never broadcast.
        audio_data: String,
    },

    #[serde(rename_all = "camelCase")]
    SessionEnded { teacher_id: String, has_audio: bool },
}

/// Messages the server pushes to clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ServerMessage {
    #[serde(rename_all = "camelCase")]
    TeacherOnline { teacher_id: String, timestamp: u64 },

    #[serde(rename_all = "camelCase")]
    TeacherOffline { teacher_id: String, timestamp: u64 },

    #[serde(rename_all = "camelCase")]
    WhiteboardUpdate {
        teacher_id: String,
        whiteboard_data: String,
    },

    #[serde(rename_all = "camelCase")]
    AudioToggle { teacher_id: String, enabled: bool },

    #[serde(rename_all = "camelCase")]
    AudioAvailable { teacher_id: String },

    #[serde(rename_all = "camelCase")]
    SessionEnded { teacher_id: String, has_audio: bool },

    LiveError { message: String },
}
