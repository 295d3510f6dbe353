//! Process-scoped store of publish sessions
//!
//! Sessions are keyed by session ID with a secondary participant index.
//! `create` holds the participant's index entry for the whole check-and-insert,
//! which serializes creation per participant without a global lock.

use super::session::{SessionId, SessionState, StreamSession};
use crate::{Error, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

/// Shared handle to one session's mutable record
pub(crate) type SessionHandle = Arc<Mutex<StreamSession>>;

/// Registry of active streaming sessions
pub struct SessionRegistry {
    /// Active sessions by ID
    sessions: DashMap<SessionId, SessionHandle>,

    /// participant_id -> session_id of its non-terminal session
    by_participant: DashMap<String, SessionId>,

    /// Recently removed session IDs, kept so a repeated stop is recognised
    closed: DashMap<SessionId, Instant>,

    /// Registered sessions; a slot is reserved here before insertion
    occupied: AtomicUsize,

    /// Maximum number of concurrent sessions (0 = unlimited)
    max_sessions: usize,
}

impl SessionRegistry {
    /// Create a new registry
    ///
    /// # Arguments
    ///
    /// * `max_sessions` - Maximum number of concurrent sessions (0 = unlimited)
    pub fn new(max_sessions: usize) -> Self {
        info!("Creating session registry (max_sessions: {})", max_sessions);

        Self {
            sessions: DashMap::new(),
            by_participant: DashMap::new(),
            closed: DashMap::new(),
            occupied: AtomicUsize::new(0),
            max_sessions,
        }
    }

    /// Create a session for a participant
    ///
    /// # Errors
    ///
    /// * `InvalidRequest` - participant or exam ID is blank
    /// * `Conflict` - the participant already has a non-terminal session
    /// * `CapacityExceeded` - `max_sessions` reached
    pub fn create(&self, participant_id: &str, exam_id: &str) -> Result<SessionId> {
        let participant_id = participant_id.trim();
        let exam_id = exam_id.trim();
        if participant_id.is_empty() || exam_id.is_empty() {
            return Err(Error::InvalidRequest(
                "participantId and examId are required".to_string(),
            ));
        }

        match self.by_participant.entry(participant_id.to_string()) {
            Entry::Occupied(mut entry) => {
                let existing = entry.get().clone();
                if self.is_active(&existing) {
                    return Err(Error::Conflict {
                        participant_id: participant_id.to_string(),
                        session_id: existing,
                    });
                }
                // Stale index entry: the session closed but has not been removed yet
                let session_id = self.insert_session(participant_id, exam_id)?;
                entry.insert(session_id.clone());
                Ok(session_id)
            }
            Entry::Vacant(entry) => {
                let session_id = self.insert_session(participant_id, exam_id)?;
                entry.insert(session_id.clone());
                Ok(session_id)
            }
        }
    }

    fn insert_session(&self, participant_id: &str, exam_id: &str) -> Result<SessionId> {
        self.reserve_slot()?;

        let session_id = uuid::Uuid::new_v4().to_string();
        let session = StreamSession::new(
            session_id.clone(),
            participant_id.to_string(),
            exam_id.to_string(),
        );
        info!(
            session_id = %session_id,
            participant_id = %participant_id,
            exam_id = %exam_id,
            stream_name = %session.stream_name(),
            "Created stream session"
        );
        self.sessions
            .insert(session_id.clone(), Arc::new(Mutex::new(session)));
        Ok(session_id)
    }

    fn reserve_slot(&self) -> Result<()> {
        let max_sessions = self.max_sessions;
        self.occupied
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |occupied| {
                (max_sessions == 0 || occupied < max_sessions).then_some(occupied + 1)
            })
            .map(|_| ())
            .map_err(|_| Error::CapacityExceeded(max_sessions))
    }

    fn is_active(&self, session_id: &str) -> bool {
        match self.handle(session_id) {
            Ok(handle) => !handle.lock().state().is_terminal(),
            Err(_) => false,
        }
    }

    /// Get a snapshot of a session
    pub fn get(&self, session_id: &str) -> Result<StreamSession> {
        Ok(self.handle(session_id)?.lock().clone())
    }

    /// Shared handle for state mutation by the lifecycle controller
    pub(crate) fn handle(&self, session_id: &str) -> Result<SessionHandle> {
        self.sessions
            .get(session_id)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| Error::NotFound(session_id.to_string()))
    }

    /// Remove a session, freeing its participant slot
    ///
    /// Returns the final record, or `None` if the session was not registered.
    pub fn remove(&self, session_id: &str) -> Option<StreamSession> {
        if !self.sessions.contains_key(session_id) {
            return None;
        }
        // Tombstone before removal: a lookup must always find one of the two
        self.closed.insert(session_id.to_string(), Instant::now());
        let (_, handle) = self.sessions.remove(session_id)?;
        self.occupied.fetch_sub(1, Ordering::AcqRel);
        let session = handle.lock().clone();

        self.by_participant
            .remove_if(session.participant_id(), |_, current| current == session_id);

        info!(
            session_id = %session_id,
            participant_id = %session.participant_id(),
            state = %session.state(),
            "Removed stream session"
        );
        Some(session)
    }

    /// Record a heartbeat
    ///
    /// # Errors
    ///
    /// `NotFound` if the session is not registered.
    pub fn touch_heartbeat(&self, session_id: &str) -> Result<()> {
        let handle = self.handle(session_id)?;
        handle.lock().touch(Instant::now());
        debug!("Heartbeat for session {}", session_id);
        Ok(())
    }

    /// Whether the session was removed within the retention window
    pub fn is_closed(&self, session_id: &str) -> bool {
        self.closed.contains_key(session_id)
    }

    /// Forget closed session IDs older than `retention`
    pub fn prune_closed(&self, retention: Duration) -> usize {
        let now = Instant::now();
        let before = self.closed.len();
        self.closed
            .retain(|_, closed_at| now.saturating_duration_since(*closed_at) < retention);
        before.saturating_sub(self.closed.len())
    }

    /// Active session ID for a participant, if any
    pub fn session_for_participant(&self, participant_id: &str) -> Option<SessionId> {
        self.by_participant
            .get(participant_id)
            .map(|entry| entry.value().clone())
    }

    /// Find the session publishing under a stream name
    pub fn find_by_stream_name(&self, stream_name: &str) -> Option<StreamSession> {
        self.handles()
            .into_iter()
            .map(|handle| handle.lock().clone())
            .find(|session| session.stream_name() == stream_name)
    }

    /// Snapshots of all registered sessions
    pub fn list(&self) -> Vec<StreamSession> {
        self.handles()
            .into_iter()
            .map(|handle| handle.lock().clone())
            .collect()
    }

    /// IDs of sessions in `state` whose last heartbeat is older than `timeout`
    pub fn expired(&self, states: &[SessionState], timeout: Duration) -> Vec<SessionId> {
        let now = Instant::now();
        self.list()
            .into_iter()
            .filter(|session| states.contains(&session.state()))
            .filter(|session| session.heartbeat_age(now) > timeout)
            .map(|session| session.session_id().to_string())
            .collect()
    }

    /// Number of registered sessions
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    // Clone the handles out first so no map guard is held while locking a session
    fn handles(&self) -> Vec<SessionHandle> {
        self.sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new(0)
    }
}
