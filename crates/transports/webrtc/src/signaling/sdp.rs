//! SDP offer/answer validation

use crate::{Error, Result};
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;

/// Content type of WHIP/WHEP offer and answer bodies
pub const SDP_CONTENT_TYPE: &str = "application/sdp";

/// Parse a publisher offer; it must carry at least one media section
pub fn parse_offer(sdp: &str) -> Result<RTCSessionDescription> {
    if sdp.trim().is_empty() {
        return Err(Error::InvalidSdp("offer is empty".to_string()));
    }

    let description = RTCSessionDescription::offer(sdp.to_string())
        .map_err(|e| Error::InvalidSdp(format!("offer does not parse: {}", e)))?;
    let media_sections = media_section_count(&description)
        .map_err(|e| Error::InvalidSdp(format!("offer does not parse: {}", e)))?;
    if media_sections == 0 {
        return Err(Error::InvalidSdp("offer has no media sections".to_string()));
    }

    Ok(description)
}

/// Parse a media server answer
///
/// A malformed answer is the media server's fault, so it maps to `Upstream`.
pub fn parse_answer(sdp: &str) -> Result<RTCSessionDescription> {
    RTCSessionDescription::answer(sdp.to_string())
        .map_err(|e| Error::Upstream(format!("media server returned an invalid answer: {}", e)))
}

fn media_section_count(description: &RTCSessionDescription) -> std::result::Result<usize, webrtc::Error> {
    Ok(description.unmarshal()?.media_descriptions.len())
}
