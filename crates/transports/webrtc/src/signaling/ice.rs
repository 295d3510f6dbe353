//! Trickle ICE (RFC 8840) fragments
//!
//! Candidates travel between the browser, this service and the media server
//! as `application/trickle-ice-sdpfrag` bodies on the WHIP resource.

use crate::{Error, Result};

pub use webrtc::ice_transport::ice_candidate::RTCIceCandidateInit as IceCandidate;

/// Content type of trickle ICE PATCH bodies
pub const TRICKLE_ICE_CONTENT_TYPE: &str = "application/trickle-ice-sdpfrag";

/// Extract the first `a=ice-ufrag` value from an SDP blob
pub fn ice_ufrag(sdp: &str) -> Option<String> {
    sdp.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("a=ice-ufrag:"))
        .map(|ufrag| ufrag.trim().to_string())
}

/// Build a trickle ICE fragment for a batch of candidates
///
/// Candidates are grouped into one `m=` section per consecutive `sdpMid`.
pub fn trickle_fragment(ufrag: Option<&str>, candidates: &[IceCandidate]) -> String {
    let mut fragment = String::new();
    if let Some(ufrag) = ufrag {
        fragment.push_str(&format!("a=ice-ufrag:{}\r\n", ufrag));
    }

    let mut current_mid: Option<String> = None;
    for candidate in candidates {
        let mid = candidate
            .sdp_mid
            .clone()
            .or_else(|| candidate.sdp_mline_index.map(|index| index.to_string()))
            .unwrap_or_else(|| "0".to_string());

        if current_mid.as_deref() != Some(mid.as_str()) {
            fragment.push_str("m=audio 9 RTP/AVP 0\r\n");
            fragment.push_str(&format!("a=mid:{}\r\n", mid));
            current_mid = Some(mid);
        }

        let line = candidate.candidate.trim();
        if line.starts_with("candidate:") {
            fragment.push_str(&format!("a={}\r\n", line));
        } else {
            fragment.push_str(&format!("a=candidate:{}\r\n", line));
        }
    }

    fragment
}

/// Parse a trickle ICE fragment received from a publisher
///
/// `a=end-of-candidates` and unknown attributes are ignored.
pub fn parse_trickle_fragment(body: &str) -> Result<Vec<IceCandidate>> {
    let mut candidates = Vec::new();
    let mut ufrag: Option<String> = None;
    let mut mid: Option<String> = None;
    let mut mline_index: Option<u16> = None;

    for line in body.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if line.starts_with("m=") {
            mline_index = Some(mline_index.map_or(0, |index| index + 1));
            mid = None;
        } else if let Some(value) = line.strip_prefix("a=ice-ufrag:") {
            ufrag = Some(value.trim().to_string());
        } else if let Some(value) = line.strip_prefix("a=mid:") {
            mid = Some(value.trim().to_string());
        } else if let Some(candidate) = line.strip_prefix("a=") {
            if candidate.starts_with("candidate:") {
                candidates.push(IceCandidate {
                    candidate: candidate.to_string(),
                    sdp_mid: mid.clone(),
                    sdp_mline_index: mline_index,
                    username_fragment: ufrag.clone(),
                });
            }
        } else {
            return Err(Error::InvalidRequest(format!(
                "Unexpected line in trickle ICE fragment: {}",
                line
            )));
        }
    }

    Ok(candidates)
}
