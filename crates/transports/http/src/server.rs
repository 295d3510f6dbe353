//! HTTP API server
//!
//! Provides HTTP endpoints for publish sessions:
//! - POST /api/webrtc/start - Create a session (optionally with an offer)
//! - POST /api/webrtc/stop - Stop a session
//! - POST /api/webrtc/heartbeat - Publisher keep-alive
//! - POST /api/webrtc/whip?session=ID - WHIP publish (SDP offer -> answer)
//! - PATCH /api/webrtc/whip/:id - Trickle ICE
//! - DELETE /api/webrtc/whip/:id - WHIP tear-down
//! - POST /api/webrtc/whep?stream=NAME - WHEP playback for monitors
//! - GET /api/webrtc/sessions[/:id] - Session snapshots
//! - GET /health - Health check

use crate::error::{bad_request, json_rejection, map_core_error, ApiError, Error, Result};
use axum::{
    extract::{rejection::JsonRejection, Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use proctor_webrtc::signaling::{parse_trickle_fragment, SDP_CONTENT_TYPE, TRICKLE_ICE_CONTENT_TYPE};
use proctor_webrtc::{
    IceCandidate, IceSubmission, SessionSnapshot, StartedStream, StreamLifecycleController,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

/// HTTP server state shared across handlers
#[derive(Clone)]
struct ServerState {
    /// Session lifecycle owner
    controller: Arc<StreamLifecycleController>,
}

/// HTTP API server
pub struct HttpServer {
    /// Server bind address
    bind_address: SocketAddr,
    /// Shared server state
    state: ServerState,
}

impl HttpServer {
    /// Create a new HTTP server
    ///
    /// # Arguments
    ///
    /// * `bind_address` - Address to bind to (e.g., "0.0.0.0:4001")
    /// * `controller` - Lifecycle controller the handlers drive
    ///
    /// # Returns
    ///
    /// * `Ok(HttpServer)` - Server created successfully
    /// * `Err(Error)` - Bind address does not parse
    pub fn new(bind_address: &str, controller: Arc<StreamLifecycleController>) -> Result<Self> {
        let bind_address = bind_address
            .parse()
            .map_err(|e| Error::ServerError(format!("Invalid bind address: {}", e)))?;

        Ok(Self {
            bind_address,
            state: ServerState { controller },
        })
    }

    /// Build the router with all endpoints
    pub fn build_router(&self) -> Router {
        Router::new()
            .route("/health", get(health_handler))
            .route("/api/webrtc/start", post(start_handler))
            .route("/api/webrtc/stop", post(stop_handler))
            .route("/api/webrtc/heartbeat", post(heartbeat_handler))
            .route("/api/webrtc/whip", post(whip_handler))
            .route(
                "/api/webrtc/whip/:session_id",
                patch(whip_patch_handler).delete(whip_delete_handler),
            )
            .route("/api/webrtc/whep", post(whep_handler))
            .route("/api/webrtc/sessions", get(list_sessions_handler))
            .route("/api/webrtc/sessions/:session_id", get(session_handler))
            .with_state(self.state.clone())
            .layer(
                tower::ServiceBuilder::new()
                    .layer(tower_http::trace::TraceLayer::new_for_http())
                    .layer(tower_http::cors::CorsLayer::permissive()),
            )
    }

    /// Start the HTTP server
    ///
    /// This method blocks until the server is shut down.
    pub async fn serve(self) -> Result<()> {
        self.serve_with_shutdown(std::future::pending()).await
    }

    /// Start the HTTP server, draining connections once `shutdown` resolves
    pub async fn serve_with_shutdown<F>(self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tracing::info!("Starting HTTP server on {}", self.bind_address);

        let router = self.build_router();

        let listener = tokio::net::TcpListener::bind(self.bind_address)
            .await
            .map_err(|e| Error::ServerError(format!("Failed to bind: {}", e)))?;

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(|e| Error::ServerError(format!("Server error: {}", e)))?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}

// Handler implementations

/// Response body for GET /health
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    active_sessions: usize,
}

/// Health check endpoint
async fn health_handler(State(state): State<ServerState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        active_sessions: state.controller.active_sessions(),
    })
}

/// Request body for POST /api/webrtc/start
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StartRequest {
    #[serde(alias = "participant_id")]
    participant_id: String,
    #[serde(alias = "exam_id")]
    exam_id: String,
    /// Optional SDP offer to negotiate inline
    #[serde(default)]
    offer: Option<String>,
}

/// Request body for stop/heartbeat
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SessionRequest {
    #[serde(alias = "session_id")]
    session_id: String,
}

/// POST /api/webrtc/start - Create a publish session
async fn start_handler(
    State(state): State<ServerState>,
    payload: std::result::Result<Json<StartRequest>, JsonRejection>,
) -> std::result::Result<Json<StartedStream>, ApiError> {
    let Json(request) = payload.map_err(json_rejection)?;
    let started = state
        .controller
        .start(
            &request.participant_id,
            &request.exam_id,
            request.offer.as_deref(),
        )
        .await
        .map_err(map_core_error)?;

    tracing::info!(
        "Started stream {} for participant {}",
        started.stream_name,
        request.participant_id
    );
    Ok(Json(started))
}

/// POST /api/webrtc/stop - Stop a session (idempotent)
async fn stop_handler(
    State(state): State<ServerState>,
    payload: std::result::Result<Json<SessionRequest>, JsonRejection>,
) -> std::result::Result<StatusCode, ApiError> {
    let Json(request) = payload.map_err(json_rejection)?;
    state
        .controller
        .stop(&request.session_id)
        .await
        .map_err(map_core_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/webrtc/heartbeat - Publisher keep-alive
async fn heartbeat_handler(
    State(state): State<ServerState>,
    payload: std::result::Result<Json<SessionRequest>, JsonRejection>,
) -> std::result::Result<StatusCode, ApiError> {
    let Json(request) = payload.map_err(json_rejection)?;
    state
        .controller
        .heartbeat(&request.session_id)
        .map_err(map_core_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Query for POST /api/webrtc/whip
///
/// `stream` is accepted for clients that only know the stream name.
#[derive(Debug, Deserialize)]
struct WhipQuery {
    session: Option<String>,
    stream: Option<String>,
}

/// POST /api/webrtc/whip - Forward a publish offer, return the answer
async fn whip_handler(
    State(state): State<ServerState>,
    Query(query): Query<WhipQuery>,
    headers: HeaderMap,
    offer: String,
) -> std::result::Result<impl IntoResponse, ApiError> {
    require_content_type(&headers, SDP_CONTENT_TYPE)?;

    let session_id = match (query.session, query.stream) {
        (Some(session_id), _) => session_id,
        (None, Some(stream_name)) => state
            .controller
            .registry()
            .find_by_stream_name(&stream_name)
            .map(|session| session.session_id().to_string())
            .ok_or_else(|| {
                map_core_error(proctor_webrtc::Error::NotFound(format!(
                    "stream {}",
                    stream_name
                )))
            })?,
        (None, None) => return Err(bad_request("session query parameter is required")),
    };

    let answer = state
        .controller
        .negotiate(&session_id, &offer)
        .await
        .map_err(map_core_error)?;

    Ok((
        StatusCode::CREATED,
        [
            (header::CONTENT_TYPE, SDP_CONTENT_TYPE.to_string()),
            (header::LOCATION, format!("/api/webrtc/whip/{}", session_id)),
        ],
        answer,
    ))
}

/// PATCH /api/webrtc/whip/:session_id - Trickle ICE candidates
async fn whip_patch_handler(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
    headers: HeaderMap,
    fragment: String,
) -> std::result::Result<StatusCode, ApiError> {
    require_content_type(&headers, TRICKLE_ICE_CONTENT_TYPE)?;

    let candidates = parse_trickle_fragment(&fragment).map_err(map_core_error)?;
    let relayed = submit_fragment(&session_id, candidates, |candidate| {
        state.controller.submit_ice_candidate(&session_id, candidate)
    })
    .map_err(map_core_error)?;

    tracing::debug!("Accepted {} ICE candidates for session {}", relayed, session_id);
    Ok(StatusCode::NO_CONTENT)
}

/// Submit a fragment's candidates in order, returning how many were queued
///
/// Fails only if the first candidate is refused. Once some are queued, a
/// later failure (the session stopping mid-fragment) drops the rest with a
/// warning.
fn submit_fragment(
    session_id: &str,
    candidates: Vec<IceCandidate>,
    mut submit: impl FnMut(IceCandidate) -> proctor_webrtc::Result<IceSubmission>,
) -> proctor_webrtc::Result<usize> {
    let total = candidates.len();
    let mut processed = 0;
    let mut relayed = 0;

    for candidate in candidates {
        match submit(candidate) {
            Ok(submission) => {
                processed += 1;
                if matches!(submission, IceSubmission::Relayed | IceSubmission::Buffered) {
                    relayed += 1;
                }
            }
            Err(e) if processed == 0 => return Err(e),
            Err(e) => {
                tracing::warn!(
                    "Dropped {} of {} ICE candidates for session {}: {}",
                    total - processed,
                    total,
                    session_id,
                    e
                );
                break;
            }
        }
    }
    Ok(relayed)
}

/// DELETE /api/webrtc/whip/:session_id - WHIP tear-down
async fn whip_delete_handler(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    state
        .controller
        .stop(&session_id)
        .await
        .map_err(map_core_error)?;
    Ok(StatusCode::NO_CONTENT)
}

/// Query for POST /api/webrtc/whep
#[derive(Debug, Deserialize)]
struct WhepQuery {
    stream: String,
}

/// POST /api/webrtc/whep - Playback offer for a live stream
async fn whep_handler(
    State(state): State<ServerState>,
    Query(query): Query<WhepQuery>,
    headers: HeaderMap,
    offer: String,
) -> std::result::Result<impl IntoResponse, ApiError> {
    require_content_type(&headers, SDP_CONTENT_TYPE)?;

    let answer = state
        .controller
        .subscribe(&query.stream, &offer)
        .await
        .map_err(map_core_error)?;

    Ok((
        StatusCode::CREATED,
        [(header::CONTENT_TYPE, SDP_CONTENT_TYPE)],
        answer,
    ))
}

/// GET /api/webrtc/sessions - All registered sessions
async fn list_sessions_handler(State(state): State<ServerState>) -> Json<Vec<SessionSnapshot>> {
    Json(state.controller.sessions())
}

/// GET /api/webrtc/sessions/:session_id - One session
async fn session_handler(
    State(state): State<ServerState>,
    Path(session_id): Path<String>,
) -> std::result::Result<Json<SessionSnapshot>, ApiError> {
    state
        .controller
        .session(&session_id)
        .map(Json)
        .map_err(map_core_error)
}

/// Reject bodies with an explicit, different content type
fn require_content_type(headers: &HeaderMap, expected: &str) -> std::result::Result<(), ApiError> {
    let Some(value) = headers.get(header::CONTENT_TYPE) else {
        return Ok(());
    };
    let matches = value
        .to_str()
        .map(|v| {
            v.split(';')
                .next()
                .is_some_and(|mime| mime.trim().eq_ignore_ascii_case(expected))
        })
        .unwrap_or(false);

    if matches {
        Ok(())
    } else {
        let (_, body) = bad_request(format!("expected Content-Type {}", expected));
        Err((StatusCode::UNSUPPORTED_MEDIA_TYPE, body))
    }
}
