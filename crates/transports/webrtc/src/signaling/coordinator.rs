//! Offer/answer/ICE mediation between publishers and the media server
//!
//! The coordinator owns one [`SignalingExchange`] per session. It does not
//! drive the session state machine; the lifecycle controller does that around
//! calls into this type.

use super::ice::{ice_ufrag, trickle_fragment, IceCandidate};
use super::media_server::MediaServer;
use super::sdp::{parse_answer, parse_offer};
use crate::background::BackgroundTasks;
use crate::config::IceRelayConfig;
use crate::session::{is_valid_stream_name, SessionId, SessionRegistry, SessionState};
use crate::{Error, Result};
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Offer/answer/ICE state for one session
#[derive(Debug, Clone, Default)]
pub struct SignalingExchange {
    offer_sdp: Option<String>,
    answer_sdp: Option<String>,
    resource_url: Option<String>,
    ice_ufrag: Option<String>,
    /// Candidates received before the media server resource existed
    pending: Vec<IceCandidate>,
    /// Candidate keys handed to a relay task that has not finished yet
    in_flight: HashSet<String>,
    /// Candidate keys the media server acknowledged
    delivered: HashSet<String>,
}

impl SignalingExchange {
    pub fn offer_sdp(&self) -> Option<&str> {
        self.offer_sdp.as_deref()
    }

    pub fn answer_sdp(&self) -> Option<&str> {
        self.answer_sdp.as_deref()
    }

    pub fn resource_url(&self) -> Option<&str> {
        self.resource_url.as_deref()
    }

    pub fn pending_candidates(&self) -> usize {
        self.pending.len()
    }

    pub fn delivered_candidates(&self) -> usize {
        self.delivered.len()
    }

    fn is_known(&self, key: &str) -> bool {
        self.delivered.contains(key)
            || self.in_flight.contains(key)
            || self.pending.iter().any(|c| candidate_key(c) == key)
    }
}

/// What happened to a submitted ICE candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IceSubmission {
    /// Handed to a relay task
    Relayed,
    /// Held until the media server answers
    Buffered,
    /// Already buffered, in flight or delivered
    Duplicate,
    /// Empty candidate (end-of-candidates) or no resource to deliver to
    Ignored,
}

/// Mediates offer/answer/ICE exchange with the media server
pub struct SignalingCoordinator {
    registry: Arc<SessionRegistry>,
    media_server: Arc<dyn MediaServer>,
    exchanges: Arc<DashMap<SessionId, SignalingExchange>>,
    relay_policy: IceRelayConfig,
    negotiation_timeout: Duration,
    /// Resource DELETEs, which never hold up the caller
    background: Arc<BackgroundTasks>,
}

impl SignalingCoordinator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        media_server: Arc<dyn MediaServer>,
        relay_policy: IceRelayConfig,
        negotiation_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            media_server,
            exchanges: Arc::new(DashMap::new()),
            relay_policy,
            negotiation_timeout,
            background: Arc::new(BackgroundTasks::new()),
        }
    }

    pub(crate) fn background(&self) -> &Arc<BackgroundTasks> {
        &self.background
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    /// Forward a publish offer and return the media server's answer
    ///
    /// Candidates buffered before the answer are flushed once the WHIP
    /// resource is known.
    ///
    /// # Errors
    ///
    /// * `NotFound` - unknown session
    /// * `InvalidSdp` - offer does not parse or has no media
    /// * `InvalidState` - the session already has an answer
    /// * `Upstream` - media server unreachable or rejected the offer
    /// * `Timeout` - no answer within the negotiation timeout
    /// * `SessionClosed` - the exchange was released while waiting
    pub async fn negotiate(&self, session_id: &str, offer_sdp: &str) -> Result<String> {
        let session = self.registry.get(session_id)?;
        let offer = parse_offer(offer_sdp)?;

        {
            let mut exchange = self.exchanges.entry(session_id.to_string()).or_default();
            if exchange.answer_sdp.is_some() {
                return Err(Error::InvalidState(format!(
                    "session {} has already been negotiated",
                    session_id
                )));
            }
            exchange.ice_ufrag = ice_ufrag(&offer.sdp);
            exchange.offer_sdp = Some(offer.sdp);
        }

        info!(
            session_id = %session_id,
            stream_name = %session.stream_name(),
            "Forwarding publish offer to media server"
        );

        let published = tokio::time::timeout(
            self.negotiation_timeout,
            self.media_server.publish(session.stream_name(), offer_sdp),
        )
        .await;

        let answer = match published {
            Ok(Ok(answer)) => answer,
            Ok(Err(e)) => {
                self.exchanges.remove(session_id);
                return Err(e);
            }
            Err(_) => {
                self.exchanges.remove(session_id);
                return Err(Error::Timeout(format!(
                    "media server did not answer within {}s",
                    self.negotiation_timeout.as_secs_f64()
                )));
            }
        };

        if let Err(e) = parse_answer(&answer.answer_sdp) {
            self.exchanges.remove(session_id);
            self.discard(session_id, answer.resource_url);
            return Err(e);
        }

        let stored = self.exchanges.get_mut(session_id).map(|mut exchange| {
            exchange.answer_sdp = Some(answer.answer_sdp.clone());
            exchange.resource_url = answer.resource_url.clone();
            let pending = std::mem::take(&mut exchange.pending);
            if exchange.resource_url.is_some() {
                for candidate in &pending {
                    exchange.in_flight.insert(candidate_key(candidate));
                }
            }
            (pending, exchange.ice_ufrag.clone())
        });

        let Some((pending, ufrag)) = stored else {
            self.discard(session_id, answer.resource_url);
            return Err(Error::SessionClosed(session_id.to_string()));
        };

        match answer.resource_url {
            Some(resource_url) if !pending.is_empty() => {
                debug!(
                    "Flushing {} buffered ICE candidates for session {}",
                    pending.len(),
                    session_id
                );
                self.spawn_relay(session_id.to_string(), resource_url, ufrag, pending);
            }
            None if !pending.is_empty() => {
                warn!(
                    "Media server returned no resource for session {}; dropping {} buffered candidates",
                    session_id,
                    pending.len()
                );
            }
            _ => {}
        }

        Ok(answer.answer_sdp)
    }

    /// Queue an ICE candidate for delivery to the media server
    ///
    /// Delivery is asynchronous and at-least-once; resubmitting a candidate
    /// the media server already acknowledged is a no-op.
    pub fn submit_ice_candidate(
        &self,
        session_id: &str,
        candidate: IceCandidate,
    ) -> Result<IceSubmission> {
        let state = self.registry.get(session_id)?.state();
        if matches!(state, SessionState::Stopping | SessionState::Closed) {
            return Err(Error::SessionClosed(session_id.to_string()));
        }

        if candidate.candidate.trim().is_empty() {
            debug!("End of candidates for session {}", session_id);
            return Ok(IceSubmission::Ignored);
        }

        let key = candidate_key(&candidate);
        let relay = {
            let mut exchange = self.exchanges.entry(session_id.to_string()).or_default();
            if exchange.is_known(&key) {
                return Ok(IceSubmission::Duplicate);
            }

            let answered = exchange.answer_sdp.is_some();
            match (answered, exchange.resource_url.clone()) {
                (false, _) => {
                    exchange.pending.push(candidate);
                    return Ok(IceSubmission::Buffered);
                }
                (true, None) => return Ok(IceSubmission::Ignored),
                (true, Some(resource_url)) => {
                    exchange.in_flight.insert(key);
                    (resource_url, exchange.ice_ufrag.clone())
                }
            }
        };

        let (resource_url, ufrag) = relay;
        self.spawn_relay(session_id.to_string(), resource_url, ufrag, vec![candidate]);
        Ok(IceSubmission::Relayed)
    }

    /// Proxy a WHEP playback offer for a live stream
    ///
    /// # Errors
    ///
    /// * `InvalidRequest` - malformed stream name
    /// * `NotFound` - no live session publishes under `stream_name`
    /// * `InvalidSdp`, `Upstream`, `Timeout` - as for [`negotiate`](Self::negotiate)
    pub async fn subscribe(&self, stream_name: &str, offer_sdp: &str) -> Result<String> {
        if !is_valid_stream_name(stream_name) {
            return Err(Error::InvalidRequest(format!(
                "Invalid stream name: {:?}",
                stream_name
            )));
        }

        match self.registry.find_by_stream_name(stream_name) {
            Some(session) if session.state() == SessionState::Live => {}
            _ => return Err(Error::NotFound(format!("live stream {}", stream_name))),
        }

        parse_offer(offer_sdp)?;

        let answer = tokio::time::timeout(
            self.negotiation_timeout,
            self.media_server.play(stream_name, offer_sdp),
        )
        .await
        .map_err(|_| {
            Error::Timeout(format!(
                "media server did not answer playback of {} within {}s",
                stream_name,
                self.negotiation_timeout.as_secs_f64()
            ))
        })??;

        parse_answer(&answer.answer_sdp)?;
        info!(stream_name = %stream_name, "Playback session established");
        Ok(answer.answer_sdp)
    }

    /// Drop a session's exchange and delete its media server resource
    ///
    /// Returns whether an exchange existed. The DELETE runs in the
    /// background; failures are logged.
    pub fn release(&self, session_id: &str) -> bool {
        let Some((_, exchange)) = self.exchanges.remove(session_id) else {
            return false;
        };
        self.discard(session_id, exchange.resource_url);
        true
    }

    /// Snapshot of a session's exchange
    pub fn exchange(&self, session_id: &str) -> Option<SignalingExchange> {
        self.exchanges
            .get(session_id)
            .map(|entry| entry.value().clone())
    }

    /// Drop exchanges whose session is no longer registered
    pub fn prune_orphans(&self) -> usize {
        let before = self.exchanges.len();
        self.exchanges
            .retain(|session_id, _| self.registry.get(session_id).is_ok());
        before.saturating_sub(self.exchanges.len())
    }

    fn discard(&self, session_id: &str, resource_url: Option<String>) {
        let Some(resource_url) = resource_url else {
            return;
        };
        let media_server = Arc::clone(&self.media_server);
        let session_id = session_id.to_string();

        self.background.spawn(async move {
            if let Err(e) = media_server.unpublish(&resource_url).await {
                warn!(
                    "Failed to release media server resource for session {}: {}",
                    session_id, e
                );
            }
        });
    }

    fn spawn_relay(
        &self,
        session_id: SessionId,
        resource_url: String,
        ufrag: Option<String>,
        batch: Vec<IceCandidate>,
    ) {
        let media_server = Arc::clone(&self.media_server);
        let exchanges = Arc::clone(&self.exchanges);
        let policy = self.relay_policy.clone();

        tokio::spawn(async move {
            let fragment = trickle_fragment(ufrag.as_deref(), &batch);
            let keys: Vec<String> = batch.iter().map(candidate_key).collect();
            let mut failures = 0u32;

            loop {
                match media_server.trickle(&resource_url, &fragment).await {
                    Ok(()) => {
                        if let Some(mut exchange) = exchanges.get_mut(&session_id) {
                            for key in &keys {
                                exchange.in_flight.remove(key);
                                exchange.delivered.insert(key.clone());
                            }
                        }
                        debug!(
                            "Relayed {} ICE candidates for session {}",
                            keys.len(),
                            session_id
                        );
                        return;
                    }
                    Err(e) => {
                        failures += 1;
                        let released = !exchanges.contains_key(&session_id);
                        if released || !e.is_retryable() || !policy.should_retry(failures) {
                            if let Some(mut exchange) = exchanges.get_mut(&session_id) {
                                for key in &keys {
                                    exchange.in_flight.remove(key);
                                }
                            }
                            if !released {
                                warn!(
                                    "Giving up on {} ICE candidates for session {} after {} attempts: {}",
                                    keys.len(),
                                    session_id,
                                    failures,
                                    e
                                );
                            }
                            return;
                        }

                        let delay = policy.backoff(failures - 1);
                        debug!(
                            "ICE relay for session {} failed (attempt {}), retrying in {:?}: {}",
                            session_id, failures, delay, e
                        );
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        });
    }
}

/// Identity of a candidate for de-duplication
fn candidate_key(candidate: &IceCandidate) -> String {
    let line = candidate.candidate.trim();
    let line = line.strip_prefix("a=").unwrap_or(line);
    let line = line.strip_prefix("candidate:").unwrap_or(line);
    format!("{}|{}", candidate.sdp_mid.as_deref().unwrap_or(""), line)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(value: &str) -> IceCandidate {
        IceCandidate {
            candidate: value.to_string(),
            sdp_mid: Some("0".to_string()),
            sdp_mline_index: Some(0),
            username_fragment: None,
        }
    }

    #[test]
    fn test_candidate_key_normalizes_prefix() {
        let a = candidate("candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host");
        let b = candidate("a=candidate:1 1 udp 2122260223 10.0.0.1 5000 typ host");
        let c = candidate("1 1 udp 2122260223 10.0.0.1 5000 typ host ");
        assert_eq!(candidate_key(&a), candidate_key(&b));
        assert_eq!(candidate_key(&a), candidate_key(&c));

        let mut other_mid = a.clone();
        other_mid.sdp_mid = Some("1".to_string());
        assert_ne!(candidate_key(&a), candidate_key(&other_mid));
    }

    #[test]
    fn test_exchange_known_candidates() {
        let mut exchange = SignalingExchange::default();
        let pending = candidate("candidate:1 1 udp 1 10.0.0.1 5000 typ host");
        let key = candidate_key(&pending);
        assert!(!exchange.is_known(&key));

        exchange.pending.push(pending);
        assert!(exchange.is_known(&key));

        exchange.pending.clear();
        exchange.delivered.insert(key.clone());
        assert!(exchange.is_known(&key));
        assert_eq!(exchange.delivered_candidates(), 1);
    }
}
