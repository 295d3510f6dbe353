//! Outbound signaling to the media server
//!
//! The [`MediaServer`] trait is the seam between session coordination and
//! the concrete WHIP/WHEP endpoints. [`MediaMtxClient`] speaks to MediaMTX:
//!
//! - `POST {base}/{stream}/whip` publish (legacy `{base}/whip/{stream}` on 404)
//! - `POST {base}/{stream}/whep` play (legacy `{base}/whep/{stream}` on 404)
//! - `PATCH {location}` trickle ICE
//! - `DELETE {location}` tear down

use super::ice::TRICKLE_ICE_CONTENT_TYPE;
use super::sdp::SDP_CONTENT_TYPE;
use crate::config::MediaServerConfig;
use crate::{Error, Result};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, LOCATION};
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// Answer returned by a WHIP/WHEP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaAnswer {
    /// Answer SDP
    pub answer_sdp: String,

    /// Absolute URL of the created resource (from the `Location` header)
    pub resource_url: Option<String>,
}

/// Media server signaling operations
#[async_trait]
pub trait MediaServer: Send + Sync {
    /// Forward a publish offer for `stream_name`
    async fn publish(&self, stream_name: &str, offer_sdp: &str) -> Result<MediaAnswer>;

    /// Forward a playback offer for `stream_name`
    async fn play(&self, stream_name: &str, offer_sdp: &str) -> Result<MediaAnswer>;

    /// Deliver a trickle ICE fragment to an existing resource
    async fn trickle(&self, resource_url: &str, fragment: &str) -> Result<()>;

    /// Delete a resource; deleting an already gone resource succeeds
    async fn unpublish(&self, resource_url: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Whip,
    Whep,
}

impl Direction {
    fn as_str(&self) -> &'static str {
        match self {
            Direction::Whip => "whip",
            Direction::Whep => "whep",
        }
    }
}

/// MediaMTX WHIP/WHEP client
pub struct MediaMtxClient {
    base_url: Url,
    client: reqwest::Client,
}

impl MediaMtxClient {
    /// Create a client from configuration
    pub fn new(config: &MediaServerConfig) -> Result<Self> {
        let mut base_url = Url::parse(&config.base_url).map_err(|e| {
            Error::InvalidConfig(format!("Invalid media server URL {}: {}", config.base_url, e))
        })?;
        // Keep any path prefix when joining relative endpoints
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.request_timeout_ms))
            .build()?;

        info!("Media server client targeting {}", base_url);
        Ok(Self { base_url, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, stream_name: &str, direction: Direction, legacy: bool) -> Result<Url> {
        let path = if legacy {
            format!("{}/{}", direction.as_str(), stream_name)
        } else {
            format!("{}/{}", stream_name, direction.as_str())
        };
        self.resolve(&path)
    }

    /// Resolve a `Location` header or relative path against the base URL
    fn resolve(&self, location: &str) -> Result<Url> {
        self.base_url
            .join(location)
            .map_err(|e| Error::Upstream(format!("Invalid media server URL {}: {}", location, e)))
    }

    async fn send_offer(&self, url: Url, offer_sdp: &str) -> Result<reqwest::Response> {
        self.client
            .post(url.clone())
            .header(CONTENT_TYPE, SDP_CONTENT_TYPE)
            .header(ACCEPT, SDP_CONTENT_TYPE)
            .body(offer_sdp.to_string())
            .send()
            .await
            .map_err(|e| transport_error(&url, e))
    }

    async fn exchange(
        &self,
        stream_name: &str,
        offer_sdp: &str,
        direction: Direction,
    ) -> Result<MediaAnswer> {
        let primary = self.endpoint(stream_name, direction, false)?;
        debug!(
            "{} offer for {} ({} bytes) -> {}",
            direction.as_str(),
            stream_name,
            offer_sdp.len(),
            primary
        );

        let mut response = self.send_offer(primary, offer_sdp).await?;

        if response.status() == StatusCode::NOT_FOUND {
            let fallback = self.endpoint(stream_name, direction, true)?;
            debug!(
                "{} endpoint returned 404, retrying legacy path {}",
                direction.as_str(),
                fallback
            );
            response = self.send_offer(fallback, offer_sdp).await?;
        }

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                "Media server rejected {} for {}: {} {}",
                direction.as_str(),
                stream_name,
                status,
                body
            );
            return Err(Error::Upstream(format!(
                "{} failed: {} {}",
                direction.as_str().to_uppercase(),
                status,
                body.trim()
            )));
        }

        let resource_url = match response.headers().get(LOCATION) {
            Some(value) => {
                let location = value
                    .to_str()
                    .map_err(|e| Error::Upstream(format!("Unreadable Location header: {}", e)))?;
                Some(self.resolve(location)?.to_string())
            }
            None => None,
        };
        let answer_sdp = response.text().await?;

        info!(
            stream_name = %stream_name,
            direction = direction.as_str(),
            answer_bytes = answer_sdp.len(),
            resource_url = resource_url.as_deref().unwrap_or("N/A"),
            "Media server answered"
        );

        Ok(MediaAnswer {
            answer_sdp,
            resource_url,
        })
    }
}

#[async_trait]
impl MediaServer for MediaMtxClient {
    async fn publish(&self, stream_name: &str, offer_sdp: &str) -> Result<MediaAnswer> {
        self.exchange(stream_name, offer_sdp, Direction::Whip).await
    }

    async fn play(&self, stream_name: &str, offer_sdp: &str) -> Result<MediaAnswer> {
        self.exchange(stream_name, offer_sdp, Direction::Whep).await
    }

    async fn trickle(&self, resource_url: &str, fragment: &str) -> Result<()> {
        let url = self.resolve(resource_url)?;
        let response = self
            .client
            .patch(url.clone())
            .header(CONTENT_TYPE, TRICKLE_ICE_CONTENT_TYPE)
            .body(fragment.to_string())
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(Error::Upstream(format!(
                "ICE PATCH failed: {} {}",
                status,
                body.trim()
            )))
        }
    }

    async fn unpublish(&self, resource_url: &str) -> Result<()> {
        let url = self.resolve(resource_url)?;
        let response = self
            .client
            .delete(url.clone())
            .send()
            .await
            .map_err(|e| transport_error(&url, e))?;

        match response.status() {
            status if status.is_success() => {
                debug!("Deleted media server resource {}", url);
                Ok(())
            }
            StatusCode::NOT_FOUND => {
                debug!("Media server resource {} already gone", url);
                Ok(())
            }
            status => Err(Error::Upstream(format!("DELETE {} failed: {}", url, status))),
        }
    }
}

fn transport_error(url: &Url, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout(format!("media server request to {} timed out", url))
    } else {
        Error::Upstream(format!("media server unreachable at {}: {}", url, e))
    }
}
