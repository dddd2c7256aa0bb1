use std::time::{SystemTime, UNIX_EPOCH};

use tokio::sync::RwLock;

/// The current live occupancy: one teacher, bound to the connection that
/// claimed the slot, plus the per-session audio flag.
#[derive(Debug, Clone)]
pub struct Occupancy {
    pub teacher_id: String,
    pub conn_id: String,
    pub audio_enabled: bool,
    /// Timestamp issued when this occupancy began.
    pub started_at: u64,
}

/// Outcome of a start attempt against the single live slot.
#[derive(Debug)]
pub enum StartOutcome {
    /// Slot was free; a new live session begins.
    Started { timestamp: u64 },
    /// Same teacher already holds the slot (reconnect); the occupancy is
    /// re-bound to the requesting connection, nothing else changes.
    Rebound { timestamp: u64 },
    /// A different teacher holds the slot.
    Rejected { occupant: String },
}

struct LiveInner {
    occupant: Option<Occupancy>,
    /// Highest timestamp handed out so far. Event timestamps must be
    /// strictly monotonic so clients can order online/offline signals.
    last_timestamp: u64,
}

/// Single-slot register holding at most one live teacher at a time.
pub struct LiveSessionState {
    inner: RwLock<LiveInner>,
}

impl LiveSessionState {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(LiveInner {
                occupant: None,
                last_timestamp: 0,
            }),
        }
    }

    fn next_timestamp(inner: &mut LiveInner) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        inner.last_timestamp = now.max(inner.last_timestamp + 1);
        inner.last_timestamp
    }

    /// Issues a fresh monotonic timestamp for a server-originated event.
    pub async fn timestamp(&self) -> u64 {
        let mut inner = self.inner.write().await;
        Self::next_timestamp(&mut inner)
    }

    pub async fn start(&self, teacher_id: &str, conn_id: &str) -> StartOutcome {
        let mut inner = self.inner.write().await;

        let occupied_by_same = match inner.occupant.as_ref() {
            Some(occupancy) if occupancy.teacher_id != teacher_id => {
                return StartOutcome::Rejected {
                    occupant: occupancy.teacher_id.clone(),
                };
            }
            Some(_) => true,
            None => false,
        };

        let timestamp = Self::next_timestamp(&mut inner);
        if occupied_by_same {
            // Same teacher restarting, e.g. after a reconnect. Re-bind the
            // slot to the new connection so a late disconnect of the old one
            // cannot tear the session down.
            if let Some(occupancy) = inner.occupant.as_mut() {
                occupancy.conn_id = conn_id.to_string();
            }
            StartOutcome::Rebound { timestamp }
        } else {
            inner.occupant = Some(Occupancy {
                teacher_id: teacher_id.to_string(),
                conn_id: conn_id.to_string(),
                audio_enabled: false,
                started_at: timestamp,
            });
            StartOutcome::Started { timestamp }
        }
    }

    /// Clears the slot if the named teacher occupies it, returning the
    /// teardown timestamp. A stop for anyone else is a no-op.
    pub async fn stop(&self, teacher_id: &str) -> Option<u64> {
        let mut inner = self.inner.write().await;
        let occupied = inner
            .occupant
            .as_ref()
            .map_or(false, |occupancy| occupancy.teacher_id == teacher_id);
        if !occupied {
            return None;
        }

        inner.occupant = None;
        Some(Self::next_timestamp(&mut inner))
    }

    /// Clears the slot if the given connection is the one bound to it.
    /// Returns the occupying teacher id and the teardown timestamp. Used on
    /// transport disconnect; a stale connection (already re-bound away)
    /// cannot tear the session down.
    pub async fn stop_connection(&self, conn_id: &str) -> Option<(String, u64)> {
        let mut inner = self.inner.write().await;
        let teacher_id = match inner.occupant.as_ref() {
            Some(occupancy) if occupancy.conn_id == conn_id => occupancy.teacher_id.clone(),
            _ => return None,
        };

        inner.occupant = None;
        let timestamp = Self::next_timestamp(&mut inner);
        Some((teacher_id, timestamp))
    }

    pub async fn occupant(&self) -> Option<Occupancy> {
        let inner = self.inner.read().await;
        inner.occupant.clone()
    }

    pub async fn is_live(&self, teacher_id: &str) -> bool {
        let inner = self.inner.read().await;
        inner
            .occupant
            .as_ref()
            .map_or(false, |occupancy| occupancy.teacher_id == teacher_id)
    }

    /// Sets the audio flag for the occupying teacher. Returns false (and
    /// changes nothing) if that teacher is not live.
    pub async fn set_audio(&self, teacher_id: &str, enabled: bool) -> bool {
        let mut inner = self.inner.write().await;
        match inner.occupant.as_mut() {
            Some(occupancy) if occupancy.teacher_id == teacher_id => {
                occupancy.audio_enabled = enabled;
                true
            }
            _ => false,
        }
    }
}
