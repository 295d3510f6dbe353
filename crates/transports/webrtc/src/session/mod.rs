//! Session management
//!
//! Tracks one publish session per participant and its lifecycle state.

pub mod registry;
#[allow(clippy::module_inception)]
pub mod session;

pub use registry::SessionRegistry;
pub use session::{
    is_valid_stream_name, stream_name, SessionId, SessionSnapshot, SessionState, StreamSession,
};
