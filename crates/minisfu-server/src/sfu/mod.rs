//! SFU (Selective Forwarding Unit) for a single published stream
//!
//! One publisher's RTP stream is read packet by packet and written unchanged
//! to every subscriber, without any processing or transcoding. A keyframe
//! request is sent to the publisher on a fixed interval.

mod keyframe;
mod relay;
mod rtc;
mod session;
mod transport;

pub use keyframe::{KeyframeScheduler, DEFAULT_KEYFRAME_INTERVAL};
pub use relay::{
    RelayConfig, RelayError, RelayHandle, RelaySession, SinkFailurePolicy, DEFAULT_MTU,
};
pub use rtc::{LocalTrackSink, PeerFeedback, RemoteTrackStream};
pub use session::{IceConfig, Negotiated, SfuError, SfuSessionManager};
pub use transport::{FeedbackChannel, InboundStream, OutboundSink, TransportError};
