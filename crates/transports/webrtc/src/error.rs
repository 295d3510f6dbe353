//! Error types for the proctoring stream core

/// Result type alias using the stream core Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while managing publish sessions
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Invalid configuration parameter
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Malformed or incomplete caller request
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// A non-terminal session already exists for the participant
    #[error("Participant {participant_id} already has an active session ({session_id})")]
    Conflict {
        participant_id: String,
        session_id: String,
    },

    /// Session not found
    #[error("Session not found: {0}")]
    NotFound(String),

    /// Media server unreachable or rejected the request
    #[error("Media server error: {0}")]
    Upstream(String),

    /// Upstream negotiation exceeded its deadline
    #[error("Operation timeout: {0}")]
    Timeout(String),

    /// Negotiation failed; the session is closed and must be restarted
    #[error("Negotiation failed for session {session_id}: {source}")]
    NegotiationFailed {
        session_id: String,
        #[source]
        source: Box<Error>,
    },

    /// Offer or answer is not valid SDP
    #[error("SDP negotiation error: {0}")]
    InvalidSdp(String),

    /// Operation not allowed in the session's current state
    #[error("Invalid session state: {0}")]
    InvalidState(String),

    /// Illegal state machine edge
    #[error("Invalid state transition for session {session_id}: {from} -> {to}")]
    InvalidTransition {
        session_id: String,
        from: String,
        to: String,
    },

    /// Session was stopped while an operation was in flight
    #[error("Session closed: {0}")]
    SessionClosed(String),

    /// Registry reached its configured session limit
    #[error("Maximum number of sessions reached ({0})")]
    CapacityExceeded(usize),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Check if this error is worth retrying (ICE relay only)
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Upstream(_) | Error::Timeout(_) | Error::Http(_))
    }

    /// Check if this error was caused by the caller rather than the system
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Error::InvalidRequest(_)
                | Error::InvalidSdp(_)
                | Error::Conflict { .. }
                | Error::NotFound(_)
                | Error::InvalidState(_)
                | Error::InvalidTransition { .. }
                | Error::SessionClosed(_)
        )
    }

    /// Innermost error, looking through `NegotiationFailed`
    pub fn root_cause(&self) -> &Error {
        match self {
            Error::NegotiationFailed { source, .. } => source.root_cause(),
            other => other,
        }
    }

    pub(crate) fn negotiation_failed(session_id: &str, source: Error) -> Self {
        Error::NegotiationFailed {
            session_id: session_id.to_string(),
            source: Box::new(source),
        }
    }
}
