//! Notifications to the AI emotion-analysis service
//!
//! When a stream goes live the analysis service is asked to start consuming
//! its RTSP output; on stop it is asked to let go. Inference itself happens
//! entirely on the other side.

use crate::config::AnalysisConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Consumer of live stream notifications
#[async_trait]
pub trait AnalysisNotifier: Send + Sync {
    /// Ask the analysis service to start pulling `rtsp_url`
    ///
    /// Returns whether the service accepted the stream.
    async fn stream_started(&self, stream_name: &str, rtsp_url: &str) -> Result<bool>;

    /// Tell the analysis service the stream is gone
    async fn stream_stopped(&self, stream_name: &str, session_id: &str) -> Result<bool>;
}

/// Notifier used when analysis is disabled
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl AnalysisNotifier for NoopNotifier {
    async fn stream_started(&self, _stream_name: &str, _rtsp_url: &str) -> Result<bool> {
        Ok(false)
    }

    async fn stream_stopped(&self, _stream_name: &str, _session_id: &str) -> Result<bool> {
        Ok(false)
    }
}

#[derive(Debug, Serialize)]
struct StartRequest<'a> {
    stream_name: &'a str,
    rtsp_url: &'a str,
}

#[derive(Debug, Serialize)]
struct StopRequest<'a> {
    stream_name: &'a str,
    session_id: &'a str,
}

#[derive(Debug, Deserialize)]
struct AnalysisReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the analysis service's RTSP endpoints
pub struct HttpAnalysisNotifier {
    start_url: Url,
    stop_url: Url,
    client: reqwest::Client,
}

impl HttpAnalysisNotifier {
    pub fn new(base_url: &str, request_timeout: Duration) -> Result<Self> {
        let base = Url::parse(base_url).map_err(|e| {
            Error::InvalidConfig(format!("Invalid analysis service URL {}: {}", base_url, e))
        })?;
        let join = |path: &str| {
            base.join(path).map_err(|e| {
                Error::InvalidConfig(format!("Invalid analysis service URL {}: {}", base_url, e))
            })
        };

        Ok(Self {
            start_url: join("/api/rtsp/start")?,
            stop_url: join("/api/rtsp/stop")?,
            client: reqwest::Client::builder().timeout(request_timeout).build()?,
        })
    }

    /// Build from configuration; `None` when no analysis service is configured
    pub fn from_config(config: &AnalysisConfig) -> Result<Option<Self>> {
        match config.base_url.as_deref() {
            Some(base_url) => Ok(Some(Self::new(
                base_url,
                Duration::from_millis(config.request_timeout_ms),
            )?)),
            None => Ok(None),
        }
    }

    async fn post<T: Serialize + Sync>(&self, url: &Url, body: &T) -> Result<bool> {
        let response = self.client.post(url.clone()).json(body).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(Error::Upstream(format!(
                "analysis service returned {} for {}",
                status, url
            )));
        }

        let reply: AnalysisReply = response.json().await?;
        if !reply.success {
            warn!(
                "Analysis service declined request to {}: {}",
                url,
                reply.message.as_deref().unwrap_or("no message")
            );
        }
        Ok(reply.success)
    }
}

#[async_trait]
impl AnalysisNotifier for HttpAnalysisNotifier {
    async fn stream_started(&self, stream_name: &str, rtsp_url: &str) -> Result<bool> {
        debug!("Requesting analysis of {} from {}", stream_name, rtsp_url);
        let accepted = self
            .post(
                &self.start_url,
                &StartRequest {
                    stream_name,
                    rtsp_url,
                },
            )
            .await?;
        if accepted {
            info!(stream_name = %stream_name, rtsp_url = %rtsp_url, "Analysis started");
        }
        Ok(accepted)
    }

    async fn stream_stopped(&self, stream_name: &str, session_id: &str) -> Result<bool> {
        let accepted = self
            .post(
                &self.stop_url,
                &StopRequest {
                    stream_name,
                    session_id,
                },
            )
            .await?;
        if accepted {
            info!(stream_name = %stream_name, session_id = %session_id, "Analysis stopped");
        }
        Ok(accepted)
    }
}
