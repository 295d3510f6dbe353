//! Start/stop orchestration and the per-session state machine
//!
//! The controller is the only writer of session state. It drives
//! `Idle -> Negotiating -> Live -> Stopping -> Closed` around calls into the
//! [`SignalingCoordinator`], and tells the analysis service when a stream
//! appears or disappears.

use crate::background::BackgroundTasks;
use crate::config::{LifecycleConfig, ProctorConfig};
use crate::endpoints::EndpointBuilder;
use crate::monitor::AnalysisNotifier;
use crate::session::{SessionId, SessionRegistry, SessionSnapshot, SessionState};
use crate::signaling::{IceCandidate, IceSubmission, MediaServer, SignalingCoordinator};
use crate::{Error, Result};
use dashmap::DashMap;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Result of a successful `start`
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StartedStream {
    pub session_id: SessionId,
    pub stream_name: String,
    pub whip_url: String,
    pub whep_url: String,
    pub rtsp_url: String,
    pub state: SessionState,
    /// Present when `start` carried an offer
    #[serde(skip_serializing_if = "Option::is_none")]
    pub answer_sdp: Option<String>,
}

/// Result of `stop`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// The session was torn down by this call
    Stopped { previous: SessionState },
    /// The session was already closed or being closed
    AlreadyClosed,
}

/// Work done by one heartbeat sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Sessions stopped for missing heartbeats
    pub expired: Vec<SessionId>,
    /// Tombstones past their retention
    pub pruned_tombstones: usize,
    /// Signaling exchanges left without a session
    pub pruned_exchanges: usize,
}

/// Owns the lifecycle of every publish session
pub struct StreamLifecycleController {
    registry: Arc<SessionRegistry>,
    coordinator: Arc<SignalingCoordinator>,
    notifier: Arc<dyn AnalysisNotifier>,
    endpoints: EndpointBuilder,
    config: LifecycleConfig,
    analysis_autostart: bool,
    /// In-flight analysis start per live session; stop waits on it
    analysis_starts: DashMap<SessionId, JoinHandle<()>>,
    /// Shared with the coordinator: teardown calls run here
    background: Arc<BackgroundTasks>,
}

impl StreamLifecycleController {
    /// Wire the registry, coordinator and endpoints from configuration
    pub fn new(
        config: &ProctorConfig,
        media_server: Arc<dyn MediaServer>,
        notifier: Arc<dyn AnalysisNotifier>,
    ) -> Result<Self> {
        config.validate()?;

        let registry = Arc::new(SessionRegistry::new(config.lifecycle.max_sessions));
        let coordinator = Arc::new(SignalingCoordinator::new(
            Arc::clone(&registry),
            media_server,
            config.ice_relay.clone(),
            config.lifecycle.negotiation_timeout(),
        ));

        info!(
            heartbeat_timeout_secs = config.lifecycle.heartbeat_timeout_secs,
            negotiation_timeout_secs = config.lifecycle.negotiation_timeout_secs,
            analysis_autostart = config.analysis.autostart,
            "Stream lifecycle controller ready"
        );

        let background = Arc::clone(coordinator.background());
        Ok(Self {
            registry,
            coordinator,
            notifier,
            endpoints: EndpointBuilder::from_config(config)?,
            config: config.lifecycle.clone(),
            analysis_autostart: config.analysis.autostart,
            analysis_starts: DashMap::new(),
            background,
        })
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn coordinator(&self) -> &Arc<SignalingCoordinator> {
        &self.coordinator
    }

    pub fn config(&self) -> &LifecycleConfig {
        &self.config
    }

    /// Create a publish session for a participant
    ///
    /// With an offer the session is negotiated inline; without one it stays
    /// Idle until the WHIP request arrives.
    ///
    /// # Errors
    ///
    /// * `Conflict` - the participant already has an active session
    /// * `NegotiationFailed` - the inline negotiation failed (session closed)
    pub async fn start(
        &self,
        participant_id: &str,
        exam_id: &str,
        offer_sdp: Option<&str>,
    ) -> Result<StartedStream> {
        let session_id = self.registry.create(participant_id, exam_id)?;
        let session = self.registry.get(&session_id)?;

        let urls = self.endpoints.whip_url(&session_id).and_then(|whip_url| {
            let whep_url = self.endpoints.whep_url(session.stream_name())?;
            let rtsp_url = self.endpoints.rtsp_url(session.stream_name())?;
            Ok((whip_url, whep_url, rtsp_url))
        });
        let (whip_url, whep_url, rtsp_url) = match urls {
            Ok(urls) => urls,
            Err(e) => {
                self.registry.remove(&session_id);
                return Err(e);
            }
        };

        let answer_sdp = match offer_sdp {
            Some(offer) => Some(self.negotiate(&session_id, offer).await?),
            None => None,
        };
        let state = self.registry.get(&session_id)?.state();

        Ok(StartedStream {
            session_id,
            stream_name: session.stream_name().to_string(),
            whip_url,
            whep_url,
            rtsp_url,
            state,
            answer_sdp,
        })
    }

    /// Negotiate an Idle session with the media server
    ///
    /// On success the session is Live. On failure it is Closed and removed,
    /// and the error is `NegotiationFailed` wrapping the cause. No retry is
    /// attempted; the caller must `start` again.
    ///
    /// # Errors
    ///
    /// * `NotFound` - unknown session
    /// * `InvalidState` - the session is not Idle
    /// * `NegotiationFailed` - upstream, timeout or SDP failure
    /// * `SessionClosed` - `stop` ran while the negotiation was in flight
    pub async fn negotiate(&self, session_id: &str, offer_sdp: &str) -> Result<String> {
        {
            let handle = self.registry.handle(session_id)?;
            let mut session = handle.lock();
            if session.state() != SessionState::Idle {
                return Err(Error::InvalidState(format!(
                    "session {} is {}, expected idle",
                    session_id,
                    session.state()
                )));
            }
            session.transition(SessionState::Negotiating)?;
        }

        match self.coordinator.negotiate(session_id, offer_sdp).await {
            Ok(answer) => self.promote(session_id, answer),
            Err(cause) => self.fail_negotiation(session_id, cause),
        }
    }

    fn promote(&self, session_id: &str, answer: String) -> Result<String> {
        let promoted = self.registry.handle(session_id).ok().and_then(|handle| {
            let mut session = handle.lock();
            session.transition(SessionState::Live).ok()?;
            // Registered under the session lock: a stop that sees Live also
            // sees the start task
            if self.analysis_autostart {
                self.spawn_analysis_start(session_id, session.stream_name());
            }
            Some((session.stream_name().to_string(), session.participant_id().to_string()))
        });

        let Some((stream_name, participant_id)) = promoted else {
            debug!("Session {} stopped during negotiation, discarding answer", session_id);
            self.coordinator.release(session_id);
            return Err(Error::SessionClosed(session_id.to_string()));
        };

        info!(
            session_id = %session_id,
            participant_id = %participant_id,
            stream_name = %stream_name,
            "Stream is live"
        );
        Ok(answer)
    }

    fn fail_negotiation(&self, session_id: &str, cause: Error) -> Result<String> {
        let closed = self.registry.handle(session_id).ok().is_some_and(|handle| {
            let mut session = handle.lock();
            session.state() == SessionState::Negotiating
                && session.transition(SessionState::Closed).is_ok()
        });

        if !closed {
            // stop() took over the session while we were waiting
            debug!("Session {} stopped during failed negotiation: {}", session_id, cause);
            return Err(Error::SessionClosed(session_id.to_string()));
        }

        self.coordinator.release(session_id);
        self.registry.remove(session_id);
        warn!(
            session_id = %session_id,
            error = %cause,
            "Negotiation failed, session closed"
        );
        Err(Error::negotiation_failed(session_id, cause))
    }

    fn spawn_analysis_start(&self, session_id: &str, stream_name: &str) {
        let rtsp_url = match self.endpoints.rtsp_url(stream_name) {
            Ok(url) => url,
            Err(e) => {
                warn!("Cannot build RTSP URL for {}: {}", stream_name, e);
                return;
            }
        };
        let notifier = Arc::clone(&self.notifier);
        let registry = Arc::clone(&self.registry);
        let session_id = session_id.to_string();
        let stream_name = stream_name.to_string();

        let task = tokio::spawn({
            let session_id = session_id.clone();
            async move {
                match notifier.stream_started(&stream_name, &rtsp_url).await {
                    Ok(accepted) => {
                        if let Ok(handle) = registry.handle(&session_id) {
                            let mut session = handle.lock();
                            if session.state() == SessionState::Live {
                                session.set_analysis_started(accepted);
                            }
                        }
                    }
                    Err(e) => warn!("Failed to start analysis for {}: {}", stream_name, e),
                }
            }
        });
        self.analysis_starts.insert(session_id, task);
    }

    /// Tell the analysis service to stop, after its start call has settled
    fn spawn_analysis_stop(
        &self,
        session_id: &str,
        stream_name: String,
        start: Option<JoinHandle<()>>,
    ) {
        let notifier = Arc::clone(&self.notifier);
        let session_id = session_id.to_string();

        self.background.spawn(async move {
            if let Some(start) = start {
                let _ = start.await;
            }
            if let Err(e) = notifier.stream_stopped(&stream_name, &session_id).await {
                warn!("Failed to stop analysis for {}: {}", stream_name, e);
            }
        });
    }

    /// Relay an ICE candidate for a session
    pub fn submit_ice_candidate(
        &self,
        session_id: &str,
        candidate: IceCandidate,
    ) -> Result<IceSubmission> {
        self.coordinator.submit_ice_candidate(session_id, candidate)
    }

    /// Proxy a WHEP playback offer for a live stream
    pub async fn subscribe(&self, stream_name: &str, offer_sdp: &str) -> Result<String> {
        self.coordinator.subscribe(stream_name, offer_sdp).await
    }

    /// Record a heartbeat from the publisher
    ///
    /// # Errors
    ///
    /// * `NotFound` - unknown session
    /// * `SessionClosed` - the session was recently stopped
    pub fn heartbeat(&self, session_id: &str) -> Result<()> {
        match self.registry.touch_heartbeat(session_id) {
            Err(Error::NotFound(_)) if self.registry.is_closed(session_id) => {
                Err(Error::SessionClosed(session_id.to_string()))
            }
            other => other,
        }
    }

    /// Current view of a session
    pub fn session(&self, session_id: &str) -> Result<SessionSnapshot> {
        Ok(self.registry.get(session_id)?.snapshot())
    }

    pub fn sessions(&self) -> Vec<SessionSnapshot> {
        self.registry
            .list()
            .iter()
            .map(|session| session.snapshot())
            .collect()
    }

    pub fn active_sessions(&self) -> usize {
        self.registry.len()
    }

    /// Tear a session down and release it from the registry
    ///
    /// Stopping a session that is already closed (or being closed) is a
    /// no-op. The session is Closed and removed on return; the media server
    /// DELETE and the analysis stop call finish in the background (see
    /// [`drain`](Self::drain)).
    ///
    /// # Errors
    ///
    /// `NotFound` if the session was never registered or its tombstone expired.
    pub async fn stop(&self, session_id: &str) -> Result<StopOutcome> {
        let handle = match self.registry.handle(session_id) {
            Ok(handle) => handle,
            Err(Error::NotFound(_)) if self.registry.is_closed(session_id) => {
                debug!("Session {} already closed", session_id);
                return Ok(StopOutcome::AlreadyClosed);
            }
            Err(e) => return Err(e),
        };

        let (previous, stream_name) = {
            let mut session = handle.lock();
            if matches!(session.state(), SessionState::Stopping | SessionState::Closed) {
                return Ok(StopOutcome::AlreadyClosed);
            }
            let previous = session.transition(SessionState::Stopping)?;
            (previous, session.stream_name().to_string())
        };

        let analysis_start = self
            .analysis_starts
            .remove(session_id)
            .map(|(_, task)| task);
        self.coordinator.release(session_id);

        if let Err(e) = handle.lock().transition(SessionState::Closed) {
            warn!("Unexpected state while closing {}: {}", session_id, e);
        }
        self.registry.remove(session_id);

        if self.analysis_autostart && previous == SessionState::Live {
            self.spawn_analysis_stop(session_id, stream_name.clone(), analysis_start);
        }

        info!(
            session_id = %session_id,
            stream_name = %stream_name,
            previous_state = %previous,
            "Stream stopped"
        );
        Ok(StopOutcome::Stopped { previous })
    }

    /// Wait for background teardown calls, bounded by the negotiation timeout
    ///
    /// Calls still running at the deadline are aborted.
    pub async fn drain(&self) {
        let pending = self.background.pending();
        if pending == 0 {
            return;
        }

        debug!("Waiting for {} teardown calls", pending);
        let aborted = self
            .background
            .drain(self.config.negotiation_timeout())
            .await;
        if aborted > 0 {
            warn!("Abandoned {} teardown calls", aborted);
        }
    }

    /// Stop sessions whose heartbeat expired and prune stale bookkeeping
    ///
    /// Live and Idle sessions are reaped; Negotiating sessions are bounded
    /// by the negotiation timeout instead.
    pub async fn sweep_once(&self) -> SweepReport {
        let candidates = self.registry.expired(
            &[SessionState::Live, SessionState::Idle],
            self.config.heartbeat_timeout(),
        );

        let mut expired = Vec::with_capacity(candidates.len());
        for session_id in candidates {
            warn!(
                session_id = %session_id,
                timeout_secs = self.config.heartbeat_timeout_secs,
                "Heartbeat timeout, stopping session"
            );
            match self.stop(&session_id).await {
                Ok(StopOutcome::Stopped { .. }) => expired.push(session_id),
                Ok(StopOutcome::AlreadyClosed) => {}
                Err(e) => warn!("Failed to stop expired session {}: {}", session_id, e),
            }
        }

        let report = SweepReport {
            expired,
            pruned_tombstones: self.registry.prune_closed(self.config.closed_retention()),
            pruned_exchanges: self.coordinator.prune_orphans(),
        };

        if report != SweepReport::default() {
            debug!(
                "Sweep: {} expired, {} tombstones pruned, {} exchanges pruned",
                report.expired.len(),
                report.pruned_tombstones,
                report.pruned_exchanges
            );
        }
        report
    }
}
