//! SDP Negotiator: picks the jointly-supported codec out of an offer and
//! extracts the track direction. Does not touch ICE or DTLS state.

use rsa_protocol::CodecKind;

use crate::error::StreamError;

const DEFAULT_H264_PROFILE: &str = "42e01f";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrackDirection {
    SendOnly,
    SendRecv,
}

#[derive(Debug, Clone)]
pub struct Negotiated {
    pub codec: CodecKind,
    pub direction: TrackDirection,
}

struct OfferCodecs {
    has_h264: bool,
    has_vp8: bool,
}

/// Walk the offer's media descriptions and decide on a codec and direction
/// given what the registry supports. `supports` is typically
/// [`crate::encoder::EncoderRegistry::supports`].
pub fn negotiate(
    sdp: &str,
    supports: impl Fn(CodecKind) -> bool,
) -> Result<Negotiated, StreamError> {
    let codecs = scan_codecs(sdp);

    let codec = if codecs.has_vp8 && supports(CodecKind::Vp8) {
        CodecKind::Vp8
    } else if codecs.has_h264 && supports(CodecKind::H264) {
        CodecKind::H264
    } else {
        return Err(StreamError::NegotiationFailed("no matching codec".to_string()));
    };

    let direction = extract_direction(sdp)?;

    Ok(Negotiated { codec, direction })
}

fn scan_codecs(sdp: &str) -> OfferCodecs {
    let mut has_h264 = false;
    let mut has_vp8 = false;
    let mut in_video_media = false;

    for line in sdp.lines() {
        let line = line.trim_end_matches('\r');

        if let Some(rest) = line.strip_prefix("m=") {
            in_video_media = rest.starts_with("video");
            continue;
        }
        if !in_video_media {
            continue;
        }

        if let Some(rtpmap) = line.strip_prefix("a=rtpmap:") {
            if !has_vp8 && rtpmap.to_ascii_uppercase().contains("VP8/") {
                has_vp8 = true;
            }
        }

        if let Some(fmtp) = line.strip_prefix("a=fmtp:") {
            if !has_h264
                && fmtp.contains("packetization-mode=1")
                && extract_profile_level_id(fmtp).as_deref() == Some(DEFAULT_H264_PROFILE)
            {
                has_h264 = true;
            }
        }
    }

    OfferCodecs { has_h264, has_vp8 }
}

fn extract_profile_level_id(fmtp: &str) -> Option<String> {
    fmtp.split(';')
        .map(str::trim)
        .find_map(|kv| kv.strip_prefix("profile-level-id="))
        .map(str::to_string)
}

fn extract_direction(sdp: &str) -> Result<TrackDirection, StreamError> {
    let mut in_video_media = false;

    for line in sdp.lines() {
        let line = line.trim_end_matches('\r');

        if let Some(rest) = line.strip_prefix("m=") {
            in_video_media = rest.starts_with("video");
            continue;
        }
        if !in_video_media {
            continue;
        }

        match line {
            "a=recvonly" => return Ok(TrackDirection::SendOnly),
            "a=sendrecv" => return Ok(TrackDirection::SendRecv),
            _ => {}
        }
    }

    Err(StreamError::NegotiationFailed("unsupported transceiver direction".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    const H264_RECVONLY: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
a=recvonly\r\n\
a=rtpmap:96 H264/90000\r\n\
a=fmtp:96 packetization-mode=1;profile-level-id=42e01f\r\n";

    const VP8_SENDRECV: &str = "v=0\r\n\
o=- 0 0 IN IP4 127.0.0.1\r\n\
s=-\r\n\
t=0 0\r\n\
m=video 9 UDP/TLS/RTP/SAVPF 97\r\n\
a=sendrecv\r\n\
a=rtpmap:97 VP8/90000\r\n";

    #[test]
    fn picks_h264_when_vp8_not_registered() {
        let result = negotiate(H264_RECVONLY, |k| k == CodecKind::H264).unwrap();
        assert_eq!(result.codec, CodecKind::H264);
        assert_eq!(result.direction, TrackDirection::SendOnly);
    }

    #[test]
    fn prefers_vp8_when_both_registered_and_offered() {
        let both = format!(
            "{}m=video 9 UDP/TLS/RTP/SAVPF 96 97\r\na=sendrecv\r\na=rtpmap:96 H264/90000\r\na=fmtp:96 packetization-mode=1;profile-level-id=42e01f\r\na=rtpmap:97 VP8/90000\r\n",
            "v=0\r\no=- 0 0 IN IP4 127.0.0.1\r\ns=-\r\nt=0 0\r\n"
        );
        let result = negotiate(&both, |_| true).unwrap();
        assert_eq!(result.codec, CodecKind::Vp8);
    }

    #[test]
    fn falls_back_to_h264_when_vp8_unregistered() {
        let result = negotiate(VP8_SENDRECV, |k| k == CodecKind::H264).unwrap();
        assert_eq!(result.codec, CodecKind::H264);
    }

    #[test]
    fn fails_when_no_codec_matches() {
        let err = negotiate(H264_RECVONLY, |_| false).unwrap_err();
        assert!(err.to_string().contains("no matching codec"));
    }

    #[test]
    fn fails_on_missing_direction() {
        let sdp = "v=0\r\nm=video 9 UDP/TLS/RTP/SAVPF 96\r\na=rtpmap:96 H264/90000\r\na=fmtp:96 packetization-mode=1;profile-level-id=42e01f\r\n";
        let err = negotiate(sdp, |_| true).unwrap_err();
        assert!(err.to_string().contains("unsupported transceiver direction"));
    }
}
