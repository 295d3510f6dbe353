//! Publish-session core for live exam proctoring
//!
//! A student's browser publishes camera and microphone over WebRTC to a
//! MediaMTX media server. This crate does not touch media: it owns the
//! publish session lifecycle and brokers signaling (offer/answer/ICE)
//! between the browser and the media server.
//!
//! # Features
//!
//! - **One stream per participant**: concurrent starts for the same
//!   participant are rejected with `Conflict`
//! - **WHIP/WHEP proxying**: offers forwarded to MediaMTX, legacy path fallback
//! - **Trickle ICE**: buffered until the answer, de-duplicated, retried
//! - **Heartbeat expiry**: silent publishers are stopped by a background sweep
//! - **Analysis hand-off**: the AI service is told when RTSP output appears
//!
//! # Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │  Browser (WHIP publisher)                              │
//! │  ↓ start / WHIP offer / trickle ICE / heartbeat        │
//! │  StreamLifecycleController                             │
//! │  ├─ SessionRegistry (sessions, participant index)      │
//! │  ├─ SignalingCoordinator (offer/answer/ICE exchange)   │
//! │  │   └─ MediaServer → MediaMTX (WHIP/WHEP, PATCH, DEL) │
//! │  ├─ AnalysisNotifier → AI service (RTSP start/stop)    │
//! │  └─ HeartbeatSweeper (periodic expiry)                 │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```
//! use proctor_webrtc::ProctorConfig;
//!
//! let mut config = ProctorConfig::default();
//! config.lifecycle.heartbeat_timeout_secs = 20;
//!
//! assert!(config.validate().is_ok());
//! assert_eq!(config.lifecycle.heartbeat_timeout().as_secs(), 20);
//! ```
//!
//! ## Async Usage
//!
//! ```no_run
//! use proctor_webrtc::{MediaMtxClient, NoopNotifier, ProctorConfig, StreamLifecycleController};
//! use std::sync::Arc;
//!
//! # async fn example() -> proctor_webrtc::Result<()> {
//! let config = ProctorConfig::default();
//! let media_server = Arc::new(MediaMtxClient::new(&config.media_server)?);
//! let controller = StreamLifecycleController::new(&config, media_server, Arc::new(NoopNotifier))?;
//!
//! let started = controller.start("20240001", "exam-1", None).await?;
//! println!("Publish to {}", started.whip_url);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all)]

mod background;
pub mod config;
pub mod endpoints;
pub mod error;
pub mod lifecycle;
pub mod monitor;
pub mod session;
pub mod signaling;

pub use config::{
    AnalysisConfig, HttpConfig, IceRelayConfig, LifecycleConfig, MediaServerConfig, ProctorConfig,
};
pub use endpoints::EndpointBuilder;
pub use error::{Error, Result};
pub use lifecycle::{
    HeartbeatSweeper, StartedStream, StopOutcome, StreamLifecycleController, SweepReport,
};
pub use monitor::{AnalysisNotifier, HttpAnalysisNotifier, NoopNotifier};
pub use session::{
    is_valid_stream_name, stream_name, SessionId, SessionRegistry, SessionSnapshot, SessionState,
    StreamSession,
};
pub use signaling::{
    IceCandidate, IceSubmission, MediaAnswer, MediaMtxClient, MediaServer, SignalingCoordinator,
    SignalingExchange,
};
