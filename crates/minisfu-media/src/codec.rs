//! Codec descriptors
//!
//! A descriptor pairs a negotiated payload type number with the capability
//! the transport uses to pick a packetizer. The capability is derived from
//! kind and name only; the payload type is whatever the remote party offered.

use std::fmt;

use webrtc::rtp_transceiver::rtp_codec::{
    RTCRtpCodecCapability, RTCRtpCodecParameters, RTPCodecType,
};
use webrtc::rtp_transceiver::RTCPFeedback;

/// Canonical codec names as they appear in `a=rtpmap` lines
pub const G722: &str = "G722";
pub const OPUS: &str = "opus";
pub const VP8: &str = "VP8";
pub const VP9: &str = "VP9";
pub const H264: &str = "H264";

/// Default payload types, used only when no offer dictates the numbering
pub const DEFAULT_PAYLOAD_TYPE_G722: u8 = 9;
pub const DEFAULT_PAYLOAD_TYPE_OPUS: u8 = 111;
pub const DEFAULT_PAYLOAD_TYPE_VP8: u8 = 96;
pub const DEFAULT_PAYLOAD_TYPE_VP9: u8 = 98;
pub const DEFAULT_PAYLOAD_TYPE_H264: u8 = 102;

const OPUS_FMTP: &str = "minptime=10;useinbandfec=1";
const H264_FMTP: &str = "level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f";

/// Media kind of a codec
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CodecKind {
    Audio,
    Video,
}

impl CodecKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            CodecKind::Audio => "audio",
            CodecKind::Video => "video",
        }
    }
}

impl fmt::Display for CodecKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<CodecKind> for RTPCodecType {
    fn from(kind: CodecKind) -> Self {
        match kind {
            CodecKind::Audio => RTPCodecType::Audio,
            CodecKind::Video => RTPCodecType::Video,
        }
    }
}

/// One codec as negotiated with one party
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecDescriptor {
    pub kind: CodecKind,
    pub name: &'static str,
    pub payload_type: u8,
    pub clock_rate: u32,
    /// Channel count, 0 for video
    pub channels: u16,
    pub fmtp: String,
}

impl CodecDescriptor {
    fn new(
        kind: CodecKind,
        name: &'static str,
        payload_type: u8,
        clock_rate: u32,
        channels: u16,
        fmtp: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            name,
            payload_type,
            clock_rate,
            channels,
            fmtp: fmtp.into(),
        }
    }

    pub fn g722(payload_type: u8, clock_rate: u32) -> Self {
        Self::new(CodecKind::Audio, G722, payload_type, clock_rate, 0, "")
    }

    /// RFC 7587 requires opus streams to advertise exactly 2 channels.
    pub fn opus(payload_type: u8, clock_rate: u32) -> Self {
        Self::new(CodecKind::Audio, OPUS, payload_type, clock_rate, 2, OPUS_FMTP)
    }

    pub fn vp8(payload_type: u8, clock_rate: u32) -> Self {
        Self::new(CodecKind::Video, VP8, payload_type, clock_rate, 0, "")
    }

    pub fn vp9(payload_type: u8, clock_rate: u32) -> Self {
        Self::new(CodecKind::Video, VP9, payload_type, clock_rate, 0, "")
    }

    pub fn h264(payload_type: u8, clock_rate: u32) -> Self {
        Self::new(CodecKind::Video, H264, payload_type, clock_rate, 0, H264_FMTP)
    }

    /// Build the descriptor for a codec name seen in a session description.
    ///
    /// Names are matched case-insensitively and stored in canonical spelling.
    /// Video codecs keep the offered format parameters when there are any.
    /// Returns `None` for codecs this relay cannot carry.
    pub fn from_sdp(name: &str, payload_type: u8, clock_rate: u32, fmtp: &str) -> Option<Self> {
        let mut descriptor = if name.eq_ignore_ascii_case(G722) {
            Self::g722(payload_type, clock_rate)
        } else if name.eq_ignore_ascii_case(OPUS) {
            Self::opus(payload_type, clock_rate)
        } else if name.eq_ignore_ascii_case(VP8) {
            Self::vp8(payload_type, clock_rate)
        } else if name.eq_ignore_ascii_case(VP9) {
            Self::vp9(payload_type, clock_rate)
        } else if name.eq_ignore_ascii_case(H264) {
            Self::h264(payload_type, clock_rate)
        } else {
            return None;
        };

        if descriptor.kind == CodecKind::Video && !fmtp.is_empty() {
            descriptor.fmtp = fmtp.to_string();
        }

        Some(descriptor)
    }

    /// `<kind>/<name>`, e.g. `video/VP8`
    pub fn mime_type(&self) -> String {
        format!("{}/{}", self.kind, self.name)
    }

    /// Capability handed to the transport; its MIME type selects the packetizer.
    pub fn capability(&self) -> RTCRtpCodecCapability {
        RTCRtpCodecCapability {
            mime_type: self.mime_type(),
            clock_rate: self.clock_rate,
            channels: self.channels,
            sdp_fmtp_line: self.fmtp.clone(),
            rtcp_feedback: self.rtcp_feedback(),
        }
    }

    pub fn parameters(&self) -> RTCRtpCodecParameters {
        RTCRtpCodecParameters {
            capability: self.capability(),
            payload_type: self.payload_type,
            ..Default::default()
        }
    }

    /// Video codecs must accept PLI, or periodic keyframe requests are ignored.
    fn rtcp_feedback(&self) -> Vec<RTCPFeedback> {
        match self.kind {
            CodecKind::Audio => vec![],
            CodecKind::Video => vec![
                RTCPFeedback {
                    typ: "nack".to_string(),
                    parameter: String::new(),
                },
                RTCPFeedback {
                    typ: "nack".to_string(),
                    parameter: "pli".to_string(),
                },
                RTCPFeedback {
                    typ: "ccm".to_string(),
                    parameter: "fir".to_string(),
                },
            ],
        }
    }
}

impl fmt::Display for CodecDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} (pt {})", self.name, self.clock_rate, self.payload_type)
    }
}
