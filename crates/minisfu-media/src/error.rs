use thiserror::Error;

/// Failures while negotiating codecs for one party
#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Invalid session description: {0}")]
    InvalidDescription(String),

    #[error("Malformed description: media section {section} has non-numeric format {format:?}")]
    MalformedDescription { section: usize, format: String },

    #[error("Unresolvable codec: media section {section} references payload type {payload_type} without a codec mapping")]
    UnresolvableCodec { section: usize, payload_type: u8 },

    #[error("Codec not found: {0}")]
    CodecNotFound(String),

    #[error("Payload type not found: {0}")]
    PayloadTypeNotFound(u8),

    #[error("WebRTC error: {0}")]
    Webrtc(#[from] webrtc::Error),
}

pub type Result<T> = std::result::Result<T, MediaError>;
