//! Codec negotiation for minisfu
//!
//! This crate provides:
//! - Codec descriptors and the per-connection codec registry
//! - Resolution of a remote session description into the payload type
//!   numbers that party actually used

pub mod codec;
pub mod error;
pub mod registry;
pub mod sdp;

pub use codec::*;
pub use error::{MediaError, Result};
pub use registry::CodecRegistry;
