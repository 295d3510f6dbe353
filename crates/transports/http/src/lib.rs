//! HTTP API for the proctoring stream service
//!
//! Exposes the publish-session lifecycle to browsers and the exam backend.
//!
//! # Features
//!
//! - **Session control**: POST /api/webrtc/start, /stop, /heartbeat
//! - **WHIP proxy**: POST /api/webrtc/whip, PATCH/DELETE /api/webrtc/whip/:id
//! - **WHEP proxy**: POST /api/webrtc/whep for monitoring dashboards
//! - **Introspection**: GET /api/webrtc/sessions/:id and GET /health
//!
//! Errors are returned as `{"errorType": ..., "message": ...}` with a status
//! derived from the core error (409 conflict, 404 unknown session,
//! 502/504 media server failures).
//!
//! # Usage
//!
//! ```ignore
//! use proctor_http::HttpServer;
//!
//! let controller = Arc::new(StreamLifecycleController::new(&config, media_server, notifier)?);
//! let server = HttpServer::new("0.0.0.0:4001", controller)?;
//! server.serve().await?;
//! ```

pub mod error;
pub mod server;

// Re-export main types
pub use error::{Error, ErrorResponse, Result};
pub use server::HttpServer;
