//! Resolve a remote session description into a codec registry
//!
//! Payload type numbers above 95 are dynamic: every browser picks its own.
//! A relay has to answer with the numbers the remote used, so the registry
//! for a connection is built from that connection's own offer.

use std::io::Cursor;

use webrtc::sdp::description::session::SessionDescription;

use crate::codec::CodecDescriptor;
use crate::error::{MediaError, Result};
use crate::registry::CodecRegistry;

/// Highest valid RTP payload type (7 bits)
const MAX_PAYLOAD_TYPE: u8 = 127;

/// Parse raw session description text
pub fn parse_description(sdp: &str) -> Result<SessionDescription> {
    let mut reader = Cursor::new(sdp.as_bytes());
    SessionDescription::unmarshal(&mut reader)
        .map_err(|e| MediaError::InvalidDescription(e.to_string()))
}

/// Build a registry holding exactly the payload types the description uses.
///
/// Every format of every RTP media section must be a payload type number
/// with a codec mapping in the same description. Formats naming codecs the
/// relay cannot carry (rtx, red, ulpfec, ...) are skipped. Sections that do
/// not carry RTP, such as SCTP data channels, are ignored entirely.
pub fn resolve(description: &SessionDescription) -> Result<CodecRegistry> {
    let mut registry = CodecRegistry::new();

    for (section, media) in description.media_descriptions.iter().enumerate() {
        if !media.media_name.protos.iter().any(|p| p == "RTP") {
            tracing::debug!(
                "Skipping non-RTP media section {} ({})",
                section,
                media.media_name.media
            );
            continue;
        }

        for format in &media.media_name.formats {
            let payload_type = format
                .parse::<u8>()
                .ok()
                .filter(|pt| *pt <= MAX_PAYLOAD_TYPE)
                .ok_or_else(|| MediaError::MalformedDescription {
                    section,
                    format: format.clone(),
                })?;

            let codec = description
                .get_codec_for_payload_type(payload_type)
                .map_err(|_| MediaError::UnresolvableCodec {
                    section,
                    payload_type,
                })?;

            match CodecDescriptor::from_sdp(&codec.name, payload_type, codec.clock_rate, &codec.fmtp)
            {
                Some(descriptor) => {
                    registry.register(descriptor);
                }
                None => {
                    tracing::trace!(
                        "Ignoring unsupported codec {} at payload type {}",
                        codec.name,
                        payload_type
                    );
                }
            }
        }
    }

    Ok(registry)
}

/// Payload type the description advertises first for `codec_name`.
///
/// This is what each connecting party is asked for, so two parties may end up
/// with different numbers for the same codec.
pub fn preferred_payload_type(codec_name: &str, description: &SessionDescription) -> Result<u8> {
    let registry = resolve(description)?;
    registry
        .by_name(codec_name)
        .first()
        .map(|c| c.payload_type)
        .ok_or_else(|| MediaError::CodecNotFound(codec_name.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{CodecKind, G722, H264, OPUS, VP8, VP9};

    const HEADER: &str = "v=0\r\n\
        o=- 4215775240449105457 2 IN IP4 127.0.0.1\r\n\
        s=-\r\n\
        t=0 0\r\n";

    fn description(media: &str) -> SessionDescription {
        parse_description(&format!("{}{}", HEADER, media)).unwrap()
    }

    const CHROME_VIDEO: &str = "m=video 9 UDP/TLS/RTP/SAVPF 96 97 102 98\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:0\r\n\
        a=sendonly\r\n\
        a=rtpmap:96 VP8/90000\r\n\
        a=rtcp-fb:96 nack pli\r\n\
        a=rtpmap:97 rtx/90000\r\n\
        a=fmtp:97 apt=96\r\n\
        a=rtpmap:102 H264/90000\r\n\
        a=fmtp:102 level-asymmetry-allowed=1;packetization-mode=1;profile-level-id=42001f\r\n\
        a=rtpmap:98 VP9/90000\r\n\
        a=fmtp:98 profile-id=0\r\n";

    const FIREFOX_AUDIO_VIDEO: &str = "m=audio 9 UDP/TLS/RTP/SAVPF 109 9 0\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:0\r\n\
        a=rtpmap:109 opus/48000/2\r\n\
        a=fmtp:109 maxplaybackrate=48000;stereo=1;useinbandfec=1\r\n\
        a=rtpmap:9 G722/8000/1\r\n\
        a=rtpmap:0 PCMU/8000\r\n\
        m=video 9 UDP/TLS/RTP/SAVPF 120 121\r\n\
        c=IN IP4 0.0.0.0\r\n\
        a=mid:1\r\n\
        a=recvonly\r\n\
        a=rtpmap:120 VP8/90000\r\n\
        a=fmtp:120 max-fs=12288;max-fr=60\r\n\
        a=rtpmap:121 VP9/90000\r\n";

    #[test]
    fn test_resolve_keeps_remote_numbering() {
        let registry = resolve(&description(CHROME_VIDEO)).unwrap();
        let mapping: Vec<_> = registry.iter().map(|c| (c.payload_type, c.name)).collect();
        assert_eq!(mapping, vec![(96, VP8), (102, H264), (98, VP9)]);
        assert!(registry.by_kind(CodecKind::Audio).is_empty());
    }

    #[test]
    fn test_resolve_multiple_sections() {
        let registry = resolve(&description(FIREFOX_AUDIO_VIDEO)).unwrap();
        let mapping: Vec<_> = registry.iter().map(|c| (c.payload_type, c.name)).collect();
        assert_eq!(mapping, vec![(109, OPUS), (9, G722), (120, VP8), (121, VP9)]);

        let vp8 = registry.by_payload_type(120).unwrap();
        assert_eq!(vp8.clock_rate, 90000);
        assert_eq!(vp8.fmtp, "max-fs=12288;max-fr=60");
    }

    #[test]
    fn test_resolve_is_deterministic() {
        let sd = description(FIREFOX_AUDIO_VIDEO);
        let first: Vec<_> = resolve(&sd).unwrap().iter().cloned().collect();
        let second: Vec<_> = resolve(&sd).unwrap().iter().cloned().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn test_preferred_payload_type() {
        assert_eq!(preferred_payload_type(VP8, &description(CHROME_VIDEO)).unwrap(), 96);
        assert_eq!(
            preferred_payload_type(VP8, &description(FIREFOX_AUDIO_VIDEO)).unwrap(),
            120
        );
        assert_eq!(
            preferred_payload_type(OPUS, &description(FIREFOX_AUDIO_VIDEO)).unwrap(),
            109
        );
    }

    #[test]
    fn test_preferred_payload_type_first_advertised_wins() {
        let sd = description(
            "m=video 9 UDP/TLS/RTP/SAVPF 100 96\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=rtpmap:100 VP8/90000\r\n\
             a=rtpmap:96 VP8/90000\r\n",
        );
        assert_eq!(preferred_payload_type(VP8, &sd).unwrap(), 100);
    }

    #[test]
    fn test_preferred_payload_type_missing_codec() {
        let sd = description(
            "m=video 9 UDP/TLS/RTP/SAVPF 102\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=rtpmap:102 H264/90000\r\n",
        );
        match preferred_payload_type(VP8, &sd) {
            Err(MediaError::CodecNotFound(name)) => assert_eq!(name, VP8),
            other => panic!("expected CodecNotFound, got {:?}", other),
        }
    }

    #[test]
    fn test_malformed_format() {
        let sd = description(
            "m=video 9 UDP/TLS/RTP/SAVPF 96 vp8\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=rtpmap:96 VP8/90000\r\n",
        );
        match resolve(&sd) {
            Err(MediaError::MalformedDescription { section, format }) => {
                assert_eq!(section, 0);
                assert_eq!(format, "vp8");
            }
            other => panic!("expected MalformedDescription, got {:?}", other),
        }
    }

    #[test]
    fn test_unresolvable_payload_type() {
        let sd = description(
            "m=audio 9 UDP/TLS/RTP/SAVPF 111\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=rtpmap:111 opus/48000/2\r\n\
             m=video 9 UDP/TLS/RTP/SAVPF 96 127\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=rtpmap:96 VP8/90000\r\n",
        );
        match resolve(&sd) {
            Err(MediaError::UnresolvableCodec {
                section,
                payload_type,
            }) => {
                assert_eq!(section, 1);
                assert_eq!(payload_type, 127);
            }
            other => panic!("expected UnresolvableCodec, got {:?}", other),
        }
    }

    #[test]
    fn test_data_channel_section_is_ignored() {
        let sd = description(
            "m=video 9 UDP/TLS/RTP/SAVPF 96\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=rtpmap:96 VP8/90000\r\n\
             m=application 9 UDP/DTLS/SCTP webrtc-datachannel\r\n\
             c=IN IP4 0.0.0.0\r\n\
             a=sctp-port:5000\r\n",
        );
        assert_eq!(resolve(&sd).unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_description_text() {
        assert!(matches!(
            parse_description("this is not sdp"),
            Err(MediaError::InvalidDescription(_))
        ));
    }
}
