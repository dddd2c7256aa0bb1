use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::error::Result;
use crate::relay::ServerMessage;
use crate::storage::{ArtifactUploader, SessionRecord, SessionRecordStore};

/// Grace window before an offline signal is trusted. Long enough to absorb a
/// reconnect or a brush-tool hiccup, short enough that the save lands while
/// the student is still looking at the board.
pub const DEFAULT_GRACE_WINDOW: Duration = Duration::from_millis(1500);

/// The live session a student is currently observing.
struct ActiveSession {
    teacher_id: String,
    has_audio: bool,
    /// Latest full whiteboard payload relayed from the teacher.
    whiteboard_data: String,
    saved: bool,
}

struct WatcherState {
    session: Option<ActiveSession>,
    /// Last applied online/offline timestamp per teacher; anything older is
    /// discarded as stale.
    last_applied: HashMap<String, u64>,
    /// Bumped by every accepted event that contradicts a pending offline.
    /// A scheduled confirmation only commits while its captured generation
    /// is still current.
    generation: u64,
    save_in_flight: bool,
}

struct WatcherShared<U, R> {
    state: Mutex<WatcherState>,
    uploader: U,
    records: R,
    student_id: String,
    grace_window: Duration,
}

/// Student-side session lifecycle controller. Consumes the server event
/// stream and decides, exactly once per live-session instance, when the
/// session's artifacts should be persisted.
pub struct SessionWatcher<U, R> {
    shared: Arc<WatcherShared<U, R>>,
}

impl<U, R> Clone for SessionWatcher<U, R> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

impl<U, R> SessionWatcher<U, R>
where
    U: ArtifactUploader + 'static,
    R: SessionRecordStore + 'static,
{
    pub fn new(
        student_id: impl Into<String>,
        grace_window: Duration,
        uploader: U,
        records: R,
    ) -> Self {
        Self {
            shared: Arc::new(WatcherShared {
                state: Mutex::new(WatcherState {
                    session: None,
                    last_applied: HashMap::new(),
                    generation: 0,
                    save_in_flight: false,
                }),
                uploader,
                records,
                student_id: student_id.into(),
                grace_window,
            }),
        }
    }

    /// Feeds one server event into the lifecycle state machine.
    pub async fn apply(&self, message: ServerMessage) {
        match message {
            ServerMessage::TeacherOnline {
                teacher_id,
                timestamp,
            } => self.on_online(teacher_id, timestamp).await,
            ServerMessage::TeacherOffline {
                teacher_id,
                timestamp,
            } => self.on_offline(teacher_id, timestamp).await,
            ServerMessage::WhiteboardUpdate {
                teacher_id,
                whiteboard_data,
            } => self.on_whiteboard(teacher_id, whiteboard_data).await,
            ServerMessage::AudioToggle {
                teacher_id,
                enabled,
            } => self.on_audio(teacher_id, enabled).await,
            ServerMessage::AudioAvailable { teacher_id } => self.on_audio(teacher_id, true).await,
            ServerMessage::SessionEnded {
                teacher_id,
                has_audio,
            } => self.on_session_ended(teacher_id, has_audio).await,
            ServerMessage::LiveError { message } => {
                tracing::warn!(message = %message, "Live error from server");
            }
        }
    }

    /// Teacher id of the session currently observed, if any.
    pub async fn observed_teacher(&self) -> Option<String> {
        let state = self.shared.state.lock().await;
        state.session.as_ref().map(|s| s.teacher_id.clone())
    }

    /// True once no session is active and no save is running.
    pub async fn is_idle(&self) -> bool {
        let state = self.shared.state.lock().await;
        state.session.is_none() && !state.save_in_flight
    }

    fn is_stale(state: &WatcherState, teacher_id: &str, timestamp: u64) -> bool {
        state
            .last_applied
            .get(teacher_id)
            .map_or(false, |last| timestamp < *last)
    }

    async fn on_online(&self, teacher_id: String, timestamp: u64) {
        let mut state = self.shared.state.lock().await;
        if Self::is_stale(&state, &teacher_id, timestamp) {
            tracing::debug!(
                teacher_id = %teacher_id,
                timestamp = timestamp,
                "Discarding stale online event"
            );
            return;
        }
        state.last_applied.insert(teacher_id.clone(), timestamp);
        state.generation += 1;

        let already_observing = state
            .session
            .as_ref()
            .map_or(false, |session| session.teacher_id == teacher_id);
        if already_observing {
            // Duplicate online for a still-active session must not re-arm
            // the save or reset accumulated state.
            tracing::debug!(teacher_id = %teacher_id, "Duplicate online for active session");
            return;
        }

        tracing::info!(teacher_id = %teacher_id, "Teacher online, observing session");
        state.session = Some(ActiveSession {
            teacher_id,
            has_audio: false,
            whiteboard_data: String::new(),
            saved: false,
        });
    }

    async fn on_offline(&self, teacher_id: String, timestamp: u64) {
        let generation = {
            let mut state = self.shared.state.lock().await;
            if Self::is_stale(&state, &teacher_id, timestamp) {
                tracing::debug!(
                    teacher_id = %teacher_id,
                    timestamp = timestamp,
                    "Discarding stale offline event"
                );
                return;
            }
            state.last_applied.insert(teacher_id.clone(), timestamp);

            let watching = state
                .session
                .as_ref()
                .map_or(false, |s| s.teacher_id == teacher_id);
            if !watching {
                tracing::debug!(
                    teacher_id = %teacher_id,
                    "Offline for a teacher we are not observing"
                );
                return;
            }

            // Supersede any earlier pending confirmation; only this one may
            // commit, and only if nothing contradicts it inside the window.
            state.generation += 1;
            state.generation
        };

        tracing::debug!(
            teacher_id = %teacher_id,
            grace_ms = self.shared.grace_window.as_millis() as u64,
            "Offline received, holding for grace window"
        );

        let shared = self.shared.clone();
        tokio::spawn(async move {
            sleep(shared.grace_window).await;
            confirm_offline(shared, teacher_id, generation).await;
        });
    }

    async fn on_whiteboard(&self, teacher_id: String, whiteboard_data: String) {
        let mut state = self.shared.state.lock().await;
        match state.session.as_mut() {
            Some(session) if session.teacher_id == teacher_id => {
                session.whiteboard_data = whiteboard_data;
            }
            _ => return,
        }
        // Fresh strokes contradict any pending offline confirmation
        state.generation += 1;
    }

    async fn on_audio(&self, teacher_id: String, enabled: bool) {
        let mut state = self.shared.state.lock().await;
        if let Some(session) = state.session.as_mut() {
            if session.teacher_id == teacher_id {
                session.has_audio = enabled;
            }
        }
    }

    async fn on_session_ended(&self, teacher_id: String, has_audio: bool) {
        let mut state = self.shared.state.lock().await;
        if let Some(session) = state.session.as_mut() {
            if session.teacher_id == teacher_id {
                session.has_audio = has_audio;
            }
        }
    }
}

async fn confirm_offline<U, R>(
    shared: Arc<WatcherShared<U, R>>,
    teacher_id: String,
    generation: u64,
) where
    U: ArtifactUploader + 'static,
    R: SessionRecordStore + 'static,
{
    let session = {
        let mut state = shared.state.lock().await;
        if state.generation != generation {
            tracing::debug!(
                teacher_id = %teacher_id,
                "Offline superseded by later activity, ignoring"
            );
            return;
        }
        if state.save_in_flight {
            tracing::debug!(teacher_id = %teacher_id, "Save already in flight");
            return;
        }

        let committable = state
            .session
            .as_ref()
            .map_or(false, |s| s.teacher_id == teacher_id && !s.saved);
        if !committable {
            return;
        }

        let Some(mut session) = state.session.take() else {
            return;
        };
        session.saved = true;
        state.save_in_flight = true;
        session
    };

    tracing::info!(
        teacher_id = %session.teacher_id,
        has_audio = session.has_audio,
        "Offline confirmed, persisting session"
    );

    if let Err(e) = persist(&shared, &session).await {
        // Best effort: no retry, the whiteboard keeps working
        tracing::error!(
            teacher_id = %session.teacher_id,
            error = %e,
            "Failed to persist session, giving up"
        );
    }

    shared.state.lock().await.save_in_flight = false;
}

async fn persist<U, R>(shared: &Arc<WatcherShared<U, R>>, session: &ActiveSession) -> Result<()>
where
    U: ArtifactUploader,
    R: SessionRecordStore,
{
    let file_name = format!("{}-whiteboard.json", session.teacher_id);
    let artifact_url = shared
        .uploader
        .upload(session.whiteboard_data.clone().into_bytes(), &file_name)
        .await?;

    let record = SessionRecord {
        teacher_id: session.teacher_id.clone(),
        student_id: shared.student_id.clone(),
        artifact_url,
        whiteboard_data: session.whiteboard_data.clone(),
        has_audio: session.has_audio,
        end_time: now_ms(),
    };

    let record_id = shared.records.insert(&record).await?;
    tracing::info!(
        teacher_id = %record.teacher_id,
        record_id = %record_id,
        "Session persisted"
    );
    Ok(())
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RelayError;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    const GRACE: Duration = Duration::from_millis(50);

    #[derive(Clone, Default)]
    struct MockUploader {
        uploads: Arc<AtomicUsize>,
        fail: bool,
    }

    impl ArtifactUploader for MockUploader {
        async fn upload(&self, _data: Vec<u8>, _file_name: &str) -> Result<String> {
            self.uploads.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                return Err(RelayError::upload("upload service unavailable"));
            }
            Ok("http://artifacts.test/1.webm".to_string())
        }
    }

    #[derive(Clone, Default)]
    struct MockRecordStore {
        records: Arc<StdMutex<Vec<SessionRecord>>>,
    }

    impl MockRecordStore {
        fn saved(&self) -> Vec<SessionRecord> {
            self.records.lock().unwrap().clone()
        }
    }

    impl SessionRecordStore for MockRecordStore {
        async fn insert(&self, record: &SessionRecord) -> Result<String> {
            let mut records = self.records.lock().unwrap();
            records.push(record.clone());
            Ok(format!("rec-{}", records.len()))
        }
    }

    fn watcher() -> (
        SessionWatcher<MockUploader, MockRecordStore>,
        MockUploader,
        MockRecordStore,
    ) {
        let uploader = MockUploader::default();
        let records = MockRecordStore::default();
        let watcher = SessionWatcher::new("S1", GRACE, uploader.clone(), records.clone());
        (watcher, uploader, records)
    }

    fn online(teacher_id: &str, timestamp: u64) -> ServerMessage {
        ServerMessage::TeacherOnline {
            teacher_id: teacher_id.to_string(),
            timestamp,
        }
    }

    fn offline(teacher_id: &str, timestamp: u64) -> ServerMessage {
        ServerMessage::TeacherOffline {
            teacher_id: teacher_id.to_string(),
            timestamp,
        }
    }

    fn board(teacher_id: &str, data: &str) -> ServerMessage {
        ServerMessage::WhiteboardUpdate {
            teacher_id: teacher_id.to_string(),
            whiteboard_data: data.to_string(),
        }
    }

    async fn settle() {
        sleep(GRACE * 4).await;
    }

    #[tokio::test]
    async fn test_exactly_once_save_with_duplicates_and_stale_events() {
        let (watcher, uploader, records) = watcher();

        watcher.apply(online("T1", 1000)).await;
        watcher.apply(board("T1", "[1]")).await;
        watcher.apply(board("T1", "[1,2]")).await;
        watcher.apply(offline("T1", 2000)).await;
        // Duplicate offline inside the grace window
        watcher.apply(offline("T1", 2000)).await;
        // Stale online must neither cancel the teardown nor re-arm a session
        watcher.apply(online("T1", 1500)).await;

        settle().await;

        assert_eq!(uploader.uploads.load(Ordering::SeqCst), 1);
        let saved = records.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].teacher_id, "T1");
        assert_eq!(saved[0].student_id, "S1");
        assert_eq!(saved[0].whiteboard_data, "[1,2]");
        assert!(!saved[0].has_audio);
        assert!(watcher.is_idle().await);
    }

    #[tokio::test]
    async fn test_offline_cancelled_by_whiteboard_activity() {
        let (watcher, uploader, records) = watcher();

        watcher.apply(online("T1", 1000)).await;
        watcher.apply(offline("T1", 2000)).await;
        sleep(GRACE / 3).await;
        // A brush stroke inside the window means the offline was noise
        watcher.apply(board("T1", "[1]")).await;

        settle().await;

        assert_eq!(uploader.uploads.load(Ordering::SeqCst), 0);
        assert!(records.saved().is_empty());
        assert_eq!(watcher.observed_teacher().await, Some("T1".to_string()));
    }

    #[tokio::test]
    async fn test_offline_cancelled_by_fresh_online() {
        let (watcher, _uploader, records) = watcher();

        watcher.apply(online("T1", 1000)).await;
        watcher.apply(offline("T1", 2000)).await;
        sleep(GRACE / 3).await;
        watcher.apply(online("T1", 3000)).await;

        settle().await;

        assert!(records.saved().is_empty());
        assert_eq!(watcher.observed_teacher().await, Some("T1".to_string()));
    }

    #[tokio::test]
    async fn test_duplicate_online_keeps_accumulated_state() {
        let (watcher, _uploader, records) = watcher();

        watcher.apply(online("T1", 1000)).await;
        watcher.apply(board("T1", "[1]")).await;
        // Duplicate online (same session, newer timestamp) must not wipe
        // the accumulated whiteboard payload
        watcher.apply(online("T1", 1100)).await;
        watcher.apply(offline("T1", 2000)).await;

        settle().await;

        let saved = records.saved();
        assert_eq!(saved.len(), 1);
        assert_eq!(saved[0].whiteboard_data, "[1]");
    }

    #[tokio::test]
    async fn test_new_occupancy_rearms_save() {
        let (watcher, _uploader, records) = watcher();

        watcher.apply(online("T1", 1000)).await;
        watcher.apply(offline("T1", 2000)).await;
        settle().await;
        assert_eq!(records.saved().len(), 1);

        // A genuine second session is a new instance and saves again
        watcher.apply(online("T1", 3000)).await;
        watcher.apply(board("T1", "[9]")).await;
        watcher.apply(offline("T1", 4000)).await;
        settle().await;

        let saved = records.saved();
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].whiteboard_data, "[9]");
    }

    #[tokio::test]
    async fn test_audio_hint_lands_in_record() {
        let (watcher, _uploader, records) = watcher();

        watcher.apply(online("T1", 1000)).await;
        watcher
            .apply(ServerMessage::AudioToggle {
                teacher_id: "T1".to_string(),
                enabled: true,
            })
            .await;
        watcher
            .apply(ServerMessage::SessionEnded {
                teacher_id: "T1".to_string(),
                has_audio: true,
            })
            .await;
        watcher.apply(offline("T1", 2000)).await;

        settle().await;

        let saved = records.saved();
        assert_eq!(saved.len(), 1);
        assert!(saved[0].has_audio);
    }

    #[tokio::test]
    async fn test_failed_save_is_abandoned() {
        let uploader = MockUploader {
            uploads: Arc::new(AtomicUsize::new(0)),
            fail: true,
        };
        let records = MockRecordStore::default();
        let watcher = SessionWatcher::new("S1", GRACE, uploader.clone(), records.clone());

        watcher.apply(online("T1", 1000)).await;
        watcher.apply(offline("T1", 2000)).await;

        settle().await;

        // One attempt, no retry, no record, watcher back to idle
        assert_eq!(uploader.uploads.load(Ordering::SeqCst), 1);
        assert!(records.saved().is_empty());
        assert!(watcher.is_idle().await);
    }

    #[tokio::test]
    async fn test_offline_for_unobserved_teacher_is_ignored() {
        let (watcher, _uploader, records) = watcher();

        watcher.apply(online("T1", 1000)).await;
        watcher.apply(offline("T2", 2000)).await;

        settle().await;

        assert!(records.saved().is_empty());
        assert_eq!(watcher.observed_teacher().await, Some("T1".to_string()));
    }
}
