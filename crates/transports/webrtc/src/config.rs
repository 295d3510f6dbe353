//! Configuration types for the proctoring stream service

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use url::Url;

/// Main configuration, loadable from TOML
///
/// Every section has defaults, so a file only needs the keys it overrides.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProctorConfig {
    /// MediaMTX (WHIP/WHEP) endpoint settings
    pub media_server: MediaServerConfig,

    /// AI analysis service notifications
    pub analysis: AnalysisConfig,

    /// Session lifecycle timers and limits
    pub lifecycle: LifecycleConfig,

    /// Trickle-ICE relay retry policy
    pub ice_relay: IceRelayConfig,

    /// Inbound HTTP API
    pub http: HttpConfig,
}

/// Media server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MediaServerConfig {
    /// HTTP base URL of the media server's WebRTC listener (default: http://127.0.0.1:8889)
    pub base_url: String,

    /// RTSP base URL the analysis service reads streams from (default: rtsp://127.0.0.1:8554)
    pub rtsp_base_url: String,

    /// Per-request timeout for WHIP/WHEP/ICE calls in milliseconds (default: 10000)
    pub request_timeout_ms: u64,
}

/// AI analysis service configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisConfig {
    /// Base URL of the analysis service; notifications are disabled when unset
    pub base_url: Option<String>,

    /// Ask the analysis service to start consuming RTSP as soon as a stream is live
    /// (default: false, avoids racing a publish that has not settled yet)
    pub autostart: bool,

    /// Request timeout in milliseconds (default: 5000)
    pub request_timeout_ms: u64,
}

/// Session lifecycle configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// Seconds without heartbeat before a session is stopped (default: 30)
    pub heartbeat_timeout_secs: u64,

    /// Interval between heartbeat sweeps in seconds (default: 5)
    pub sweep_interval_secs: u64,

    /// Upper bound on one upstream negotiation in seconds (default: 10)
    pub negotiation_timeout_secs: u64,

    /// How long closed session IDs are remembered for idempotent stop (default: 300)
    pub closed_retention_secs: u64,

    /// Maximum concurrent sessions (0 = unlimited)
    pub max_sessions: usize,
}

/// Trickle-ICE relay retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IceRelayConfig {
    /// Delivery attempts per candidate batch (default: 4)
    pub max_attempts: u32,

    /// Initial backoff delay in milliseconds (default: 200)
    pub backoff_initial_ms: u64,

    /// Maximum backoff delay in milliseconds (default: 2000)
    pub backoff_max_ms: u64,

    /// Backoff multiplier (default: 2.0)
    pub backoff_multiplier: f64,
}

/// Inbound HTTP API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Server bind address (default: 0.0.0.0:4001)
    pub bind_address: String,

    /// Public URL browsers use to reach this service (default: http://localhost:4001)
    pub public_url: String,
}

impl Default for MediaServerConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8889".to_string(),
            rtsp_base_url: "rtsp://127.0.0.1:8554".to_string(),
            request_timeout_ms: 10_000,
        }
    }
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            autostart: false,
            request_timeout_ms: 5_000,
        }
    }
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            heartbeat_timeout_secs: 30,
            sweep_interval_secs: 5,
            negotiation_timeout_secs: 10,
            closed_retention_secs: 300,
            max_sessions: 0,
        }
    }
}

impl Default for IceRelayConfig {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            backoff_initial_ms: 200,
            backoff_max_ms: 2_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:4001".to_string(),
            public_url: "http://localhost:4001".to_string(),
        }
    }
}

impl LifecycleConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_secs)
    }

    pub fn closed_retention(&self) -> Duration {
        Duration::from_secs(self.closed_retention_secs)
    }
}

impl IceRelayConfig {
    /// Backoff before retry number `attempt` (0-indexed), exponential and clamped
    pub fn backoff(&self, attempt: u32) -> Duration {
        let backoff_ms =
            (self.backoff_initial_ms as f64) * self.backoff_multiplier.powi(attempt as i32);
        let backoff_ms = backoff_ms.min(self.backoff_max_ms as f64);
        Duration::from_millis(backoff_ms as u64)
    }

    /// Check if another attempt is allowed after `attempt` failures
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}

impl ProctorConfig {
    /// Parse a TOML document
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::InvalidConfig(format!("Invalid TOML: {}", e)))
    }

    /// Load and parse a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml_str(&raw)
    }

    /// Validate configuration parameters
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - any URL does not parse or uses the wrong scheme
    /// - `heartbeat_timeout_secs`, `sweep_interval_secs` or `negotiation_timeout_secs` is 0
    /// - `sweep_interval_secs` exceeds `heartbeat_timeout_secs`
    /// - `ice_relay.max_attempts` is 0 or `backoff_multiplier` is below 1.0
    pub fn validate(&self) -> Result<()> {
        require_scheme("media_server.base_url", &self.media_server.base_url, &["http", "https"])?;
        require_scheme("media_server.rtsp_base_url", &self.media_server.rtsp_base_url, &["rtsp", "rtsps"])?;
        require_scheme("http.public_url", &self.http.public_url, &["http", "https"])?;
        if let Some(ref base_url) = self.analysis.base_url {
            require_scheme("analysis.base_url", base_url, &["http", "https"])?;
        }

        if self.http.bind_address.parse::<std::net::SocketAddr>().is_err() {
            return Err(Error::InvalidConfig(format!(
                "http.bind_address must be host:port, got {}",
                self.http.bind_address
            )));
        }

        let lifecycle = &self.lifecycle;
        if lifecycle.heartbeat_timeout_secs == 0
            || lifecycle.sweep_interval_secs == 0
            || lifecycle.negotiation_timeout_secs == 0
        {
            return Err(Error::InvalidConfig(
                "lifecycle timeouts and sweep interval must be non-zero".to_string(),
            ));
        }
        if lifecycle.sweep_interval_secs > lifecycle.heartbeat_timeout_secs {
            return Err(Error::InvalidConfig(format!(
                "sweep_interval_secs ({}) must not exceed heartbeat_timeout_secs ({})",
                lifecycle.sweep_interval_secs, lifecycle.heartbeat_timeout_secs
            )));
        }

        if self.ice_relay.max_attempts == 0 {
            return Err(Error::InvalidConfig(
                "ice_relay.max_attempts must be at least 1".to_string(),
            ));
        }
        if self.ice_relay.backoff_multiplier < 1.0 {
            return Err(Error::InvalidConfig(format!(
                "ice_relay.backoff_multiplier must be >= 1.0, got {}",
                self.ice_relay.backoff_multiplier
            )));
        }

        Ok(())
    }
}

fn require_scheme(field: &str, raw: &str, schemes: &[&str]) -> Result<Url> {
    let url = Url::parse(raw)
        .map_err(|e| Error::InvalidConfig(format!("{} is not a valid URL ({}): {}", field, raw, e)))?;
    if !schemes.contains(&url.scheme()) {
        return Err(Error::InvalidConfig(format!(
            "{} must use one of {:?}, got {}",
            field, schemes, raw
        )));
    }
    Ok(url)
}
