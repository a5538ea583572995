//! Transport adapters over webrtc-rs peer connections and tracks

use std::sync::{Arc, Weak};

use async_trait::async_trait;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtcp::payload_feedbacks::picture_loss_indication::PictureLossIndication;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocalWriter;
use webrtc::track::track_remote::TrackRemote;
use webrtc::util::marshal::{Marshal, MarshalSize};

use super::transport::{FeedbackChannel, InboundStream, OutboundSink, TransportError};

/// The publisher's remote track, read as raw RTP packets
pub struct RemoteTrackStream {
    track: Arc<TrackRemote>,
}

impl RemoteTrackStream {
    pub fn new(track: Arc<TrackRemote>) -> Self {
        Self { track }
    }
}

#[async_trait]
impl InboundStream for RemoteTrackStream {
    fn ssrc(&self) -> u32 {
        self.track.ssrc()
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError> {
        let (packet, _attributes) = self.track.read_rtp().await?;

        let needed = packet.marshal_size();
        if needed > buf.len() {
            return Err(TransportError::BufferTooSmall {
                needed,
                available: buf.len(),
            });
        }

        packet
            .marshal_to(buf)
            .map_err(|e| TransportError::Packet(e.to_string()))
    }
}

/// A subscriber's local track. The transport rewrites the payload type to
/// whatever that subscriber negotiated.
pub struct LocalTrackSink {
    track: Arc<TrackLocalStaticRTP>,
}

impl LocalTrackSink {
    pub fn new(track: Arc<TrackLocalStaticRTP>) -> Self {
        Self { track }
    }
}

#[async_trait]
impl OutboundSink for LocalTrackSink {
    async fn write(&self, packet: &[u8]) -> Result<usize, TransportError> {
        match self.track.write(packet).await {
            Ok(n) => Ok(n),
            // Closed pipe or closed connection: nobody is reading this track
            Err(e) if e.to_string().contains("closed") => Err(TransportError::NoActiveSink),
            Err(e) => Err(e.into()),
        }
    }
}

/// RTCP path back to the publisher
pub struct PeerFeedback {
    peer_connection: Weak<RTCPeerConnection>,
}

impl PeerFeedback {
    pub fn new(peer_connection: Weak<RTCPeerConnection>) -> Self {
        Self { peer_connection }
    }
}

#[async_trait]
impl FeedbackChannel for PeerFeedback {
    async fn request_keyframe(&self, media_ssrc: u32) -> Result<(), TransportError> {
        let peer_connection = self
            .peer_connection
            .upgrade()
            .ok_or(TransportError::Closed)?;

        peer_connection
            .write_rtcp(&[Box::new(PictureLossIndication {
                sender_ssrc: 0,
                media_ssrc,
            })])
            .await?;

        Ok(())
    }
}
