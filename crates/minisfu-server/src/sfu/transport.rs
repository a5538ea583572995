//! Transport seams of the relay
//!
//! The relay only needs three operations from the transport: read one packet
//! from the publisher, write one packet to a subscriber, and send a keyframe
//! request back to the publisher.

use async_trait::async_trait;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    /// The sink exists but nothing downstream is listening yet
    #[error("No active sink")]
    NoActiveSink,

    #[error("Connection closed")]
    Closed,

    #[error("Packet of {needed} bytes does not fit a {available} byte buffer")]
    BufferTooSmall { needed: usize, available: usize },

    #[error("Packet error: {0}")]
    Packet(String),

    #[error("WebRTC error: {0}")]
    Webrtc(#[from] webrtc::Error),
}

/// The publisher's media stream
#[async_trait]
pub trait InboundStream: Send {
    /// Synchronization source of the stream
    fn ssrc(&self) -> u32;

    /// Read the next packet into `buf`, returning its length.
    /// Any error is permanent.
    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, TransportError>;
}

/// A subscriber's write target
#[async_trait]
pub trait OutboundSink: Send + Sync {
    async fn write(&self, packet: &[u8]) -> Result<usize, TransportError>;
}

/// Feedback path towards the publisher
#[async_trait]
pub trait FeedbackChannel: Send + Sync {
    /// Ask the sender of `media_ssrc` for a fresh keyframe (PLI)
    async fn request_keyframe(&self, media_ssrc: u32) -> Result<(), TransportError>;
}

