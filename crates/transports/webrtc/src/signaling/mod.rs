//! Signaling between publishers and the media server
//!
//! - `sdp` validates offers and answers
//! - `ice` builds and parses trickle ICE fragments (RFC 8840)
//! - `media_server` forwards WHIP/WHEP requests upstream
//! - `coordinator` ties them together per session

pub mod coordinator;
pub mod ice;
pub mod media_server;
pub mod sdp;

pub use coordinator::{IceSubmission, SignalingCoordinator, SignalingExchange};
pub use ice::{parse_trickle_fragment, IceCandidate, TRICKLE_ICE_CONTENT_TYPE};
pub use media_server::{MediaAnswer, MediaMtxClient, MediaServer};
pub use sdp::SDP_CONTENT_TYPE;
