//! Client-facing URLs handed out by `start`

use crate::config::ProctorConfig;
use crate::{Error, Result};
use url::Url;

/// Builds WHIP/WHEP/RTSP URLs for a session
#[derive(Debug, Clone)]
pub struct EndpointBuilder {
    public_url: Url,
    rtsp_base_url: Url,
}

impl EndpointBuilder {
    pub fn new(public_url: &str, rtsp_base_url: &str) -> Result<Self> {
        Ok(Self {
            public_url: parse_base(public_url)?,
            rtsp_base_url: parse_base(rtsp_base_url)?,
        })
    }

    pub fn from_config(config: &ProctorConfig) -> Result<Self> {
        Self::new(&config.http.public_url, &config.media_server.rtsp_base_url)
    }

    /// `{public}/api/webrtc/whip?session={session_id}`
    pub fn whip_url(&self, session_id: &str) -> Result<String> {
        let mut url = self.join("api/webrtc/whip")?;
        url.query_pairs_mut().append_pair("session", session_id);
        Ok(url.to_string())
    }

    /// `{public}/api/webrtc/whep?stream={stream_name}`
    pub fn whep_url(&self, stream_name: &str) -> Result<String> {
        let mut url = self.join("api/webrtc/whep")?;
        url.query_pairs_mut().append_pair("stream", stream_name);
        Ok(url.to_string())
    }

    /// `{rtsp_base}/{stream_name}`, the address the analysis service pulls
    pub fn rtsp_url(&self, stream_name: &str) -> Result<String> {
        let mut url = self.rtsp_base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                Error::InvalidConfig(format!("RTSP base URL {} cannot take a path", self.rtsp_base_url))
            })?
            .pop_if_empty()
            .push(stream_name);
        Ok(url.to_string())
    }

    fn join(&self, path: &str) -> Result<Url> {
        self.public_url
            .join(path)
            .map_err(|e| Error::InvalidConfig(format!("Invalid public URL path {}: {}", path, e)))
    }
}

fn parse_base(raw: &str) -> Result<Url> {
    let mut url =
        Url::parse(raw).map_err(|e| Error::InvalidConfig(format!("Invalid URL {}: {}", raw, e)))?;
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}
