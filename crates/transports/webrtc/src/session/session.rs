//! Publish session record and its state machine

use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Session identifier (UUID v4 string)
pub type SessionId = String;

/// Session state
///
/// `Idle -> Negotiating -> Live -> Stopping -> Closed`, plus the early exits
/// listed in [`SessionState::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// Created, waiting for the publisher's offer
    Idle,
    /// Offer forwarded to the media server, answer pending
    Negotiating,
    /// Media server accepted the publish
    Live,
    /// Tear-down in progress
    Stopping,
    /// Terminal
    Closed,
}

impl SessionState {
    /// Whether this state still counts as the participant's active session
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed)
    }

    pub fn can_transition_to(&self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (Idle, Negotiating)
                | (Idle, Stopping)
                | (Negotiating, Live)
                | (Negotiating, Stopping)
                | (Negotiating, Closed)
                | (Live, Stopping)
                | (Stopping, Closed)
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Negotiating => "negotiating",
            SessionState::Live => "live",
            SessionState::Stopping => "stopping",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Media server path name for a participant's stream
///
/// Format: `{exam_id}_{participant_id}` with every character outside
/// `[A-Za-z0-9_]` replaced by `_`, so the result always passes
/// [`is_valid_stream_name`].
pub fn stream_name(exam_id: &str, participant_id: &str) -> String {
    format!("{}_{}", sanitize(exam_id), sanitize(participant_id))
}

/// Whether `name` is usable as a media server path segment
pub fn is_valid_stream_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(is_stream_name_char)
}

fn is_stream_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn sanitize(raw: &str) -> String {
    raw.chars()
        .map(|c| if is_stream_name_char(c) { c } else { '_' })
        .collect()
}

/// One participant's live media publish
#[derive(Debug, Clone)]
pub struct StreamSession {
    session_id: SessionId,
    participant_id: String,
    exam_id: String,
    stream_name: String,
    state: SessionState,
    created_at: DateTime<Utc>,
    last_heartbeat_at: Instant,
    live_since: Option<DateTime<Utc>>,
    analysis_started: bool,
}

impl StreamSession {
    pub(crate) fn new(session_id: SessionId, participant_id: String, exam_id: String) -> Self {
        let stream_name = stream_name(&exam_id, &participant_id);
        Self {
            session_id,
            participant_id,
            exam_id,
            stream_name,
            state: SessionState::Idle,
            created_at: Utc::now(),
            last_heartbeat_at: Instant::now(),
            live_since: None,
            analysis_started: false,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn participant_id(&self) -> &str {
        &self.participant_id
    }

    pub fn exam_id(&self) -> &str {
        &self.exam_id
    }

    pub fn stream_name(&self) -> &str {
        &self.stream_name
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn last_heartbeat_at(&self) -> Instant {
        self.last_heartbeat_at
    }

    pub fn live_since(&self) -> Option<DateTime<Utc>> {
        self.live_since
    }

    pub fn analysis_started(&self) -> bool {
        self.analysis_started
    }

    /// Time since the last heartbeat (or since creation if none arrived yet)
    pub fn heartbeat_age(&self, now: Instant) -> Duration {
        now.saturating_duration_since(self.last_heartbeat_at)
    }

    pub(crate) fn touch(&mut self, now: Instant) {
        self.last_heartbeat_at = now;
    }

    pub(crate) fn set_analysis_started(&mut self, started: bool) {
        self.analysis_started = started;
    }

    /// Move to `next`, rejecting edges the state machine does not allow
    pub(crate) fn transition(&mut self, next: SessionState) -> Result<SessionState> {
        let previous = self.state;
        if !previous.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                session_id: self.session_id.clone(),
                from: previous.to_string(),
                to: next.to_string(),
            });
        }

        debug!(
            "Session {} state transition: {:?} -> {:?}",
            self.session_id, previous, next
        );
        self.state = next;
        if next == SessionState::Live {
            self.live_since = Some(Utc::now());
            // Liveness is measured from the moment the publish is accepted
            self.last_heartbeat_at = Instant::now();
        }
        Ok(previous)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.session_id.clone(),
            participant_id: self.participant_id.clone(),
            exam_id: self.exam_id.clone(),
            stream_name: self.stream_name.clone(),
            state: self.state,
            created_at: self.created_at,
            live_since: self.live_since,
            heartbeat_age_ms: self.heartbeat_age(Instant::now()).as_millis() as u64,
            analysis_started: self.analysis_started,
        }
    }
}

/// Serializable view of a session for API responses
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub session_id: SessionId,
    pub participant_id: String,
    pub exam_id: String,
    pub stream_name: String,
    pub state: SessionState,
    pub created_at: DateTime<Utc>,
    pub live_since: Option<DateTime<Utc>>,
    pub heartbeat_age_ms: u64,
    pub analysis_started: bool,
}
