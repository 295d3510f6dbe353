//! In-process stand-ins for the media server and the analysis service

use async_trait::async_trait;
use parking_lot::Mutex;
use proctor_webrtc::{AnalysisNotifier, Error, MediaAnswer, MediaServer, Result};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::ANSWER;

/// Scripted media server that records every request
#[derive(Default)]
pub struct FakeMediaServer {
    publishes: Mutex<Vec<String>>,
    plays: Mutex<Vec<String>>,
    trickles: Mutex<Vec<(String, String)>>,
    unpublished: Mutex<Vec<String>>,
    trickle_attempts: AtomicUsize,
    script: Mutex<Script>,
}

#[derive(Default)]
struct Script {
    publish_delay: Option<Duration>,
    unpublish_delay: Option<Duration>,
    publish_error: Option<String>,
    trickle_failures: usize,
}

impl FakeMediaServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every publish answer
    pub fn with_publish_delay(self, delay: Duration) -> Self {
        self.script.lock().publish_delay = Some(delay);
        self
    }

    /// Delay every DELETE of a publish resource
    pub fn with_unpublish_delay(self, delay: Duration) -> Self {
        self.script.lock().unpublish_delay = Some(delay);
        self
    }

    /// Reject every publish with an upstream error
    pub fn rejecting_publish(self, message: &str) -> Self {
        self.script.lock().publish_error = Some(message.to_string());
        self
    }

    /// Fail the first `count` trickle PATCHes
    pub fn with_trickle_failures(self, count: usize) -> Self {
        self.script.lock().trickle_failures = count;
        self
    }

    pub fn resource_url(stream_name: &str) -> String {
        format!("http://mediamtx.test/{}/whip/resource", stream_name)
    }

    /// Stream names published so far
    pub fn publishes(&self) -> Vec<String> {
        self.publishes.lock().clone()
    }

    pub fn plays(&self) -> Vec<String> {
        self.plays.lock().clone()
    }

    /// Successfully delivered `(resource_url, fragment)` pairs
    pub fn trickles(&self) -> Vec<(String, String)> {
        self.trickles.lock().clone()
    }

    pub fn trickle_attempts(&self) -> usize {
        self.trickle_attempts.load(Ordering::SeqCst)
    }

    pub fn unpublished(&self) -> Vec<String> {
        self.unpublished.lock().clone()
    }
}

#[async_trait]
impl MediaServer for FakeMediaServer {
    async fn publish(&self, stream_name: &str, _offer_sdp: &str) -> Result<MediaAnswer> {
        self.publishes.lock().push(stream_name.to_string());

        let (delay, error) = {
            let script = self.script.lock();
            (script.publish_delay, script.publish_error.clone())
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if let Some(message) = error {
            return Err(Error::Upstream(message));
        }

        Ok(MediaAnswer {
            answer_sdp: ANSWER.to_string(),
            resource_url: Some(Self::resource_url(stream_name)),
        })
    }

    async fn play(&self, stream_name: &str, _offer_sdp: &str) -> Result<MediaAnswer> {
        self.plays.lock().push(stream_name.to_string());
        Ok(MediaAnswer {
            answer_sdp: ANSWER.to_string(),
            resource_url: None,
        })
    }

    async fn trickle(&self, resource_url: &str, fragment: &str) -> Result<()> {
        self.trickle_attempts.fetch_add(1, Ordering::SeqCst);
        {
            let mut script = self.script.lock();
            if script.trickle_failures > 0 {
                script.trickle_failures -= 1;
                return Err(Error::Upstream("503 Service Unavailable".to_string()));
            }
        }
        self.trickles
            .lock()
            .push((resource_url.to_string(), fragment.to_string()));
        Ok(())
    }

    async fn unpublish(&self, resource_url: &str) -> Result<()> {
        let delay = self.script.lock().unpublish_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.unpublished.lock().push(resource_url.to_string());
        Ok(())
    }
}

/// Analysis notifier that records calls and accepts everything
///
/// Calls are recorded once they complete, after any configured delay.
#[derive(Default)]
pub struct RecordingNotifier {
    started: Mutex<Vec<(String, String)>>,
    stopped: Mutex<Vec<(String, String)>>,
    events: Mutex<Vec<&'static str>>,
    start_delay: Option<Duration>,
    stop_delay: Option<Duration>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every start notification
    pub fn with_start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = Some(delay);
        self
    }

    /// Delay every stop notification
    pub fn with_stop_delay(mut self, delay: Duration) -> Self {
        self.stop_delay = Some(delay);
        self
    }

    /// `"start"` / `"stop"` in completion order
    pub fn events(&self) -> Vec<&'static str> {
        self.events.lock().clone()
    }

    /// `(stream_name, rtsp_url)` pairs
    pub fn started(&self) -> Vec<(String, String)> {
        self.started.lock().clone()
    }

    /// `(stream_name, session_id)` pairs
    pub fn stopped(&self) -> Vec<(String, String)> {
        self.stopped.lock().clone()
    }
}

#[async_trait]
impl AnalysisNotifier for RecordingNotifier {
    async fn stream_started(&self, stream_name: &str, rtsp_url: &str) -> Result<bool> {
        if let Some(delay) = self.start_delay {
            tokio::time::sleep(delay).await;
        }
        self.started
            .lock()
            .push((stream_name.to_string(), rtsp_url.to_string()));
        self.events.lock().push("start");
        Ok(true)
    }

    async fn stream_stopped(&self, stream_name: &str, session_id: &str) -> Result<bool> {
        if let Some(delay) = self.stop_delay {
            tokio::time::sleep(delay).await;
        }
        self.stopped
            .lock()
            .push((stream_name.to_string(), session_id.to_string()));
        self.events.lock().push("stop");
        Ok(true)
    }
}
