//! Shared signalling and status types for minisfu
//!
//! These are the JSON shapes exchanged over the HTTP signalling surface.

pub mod messages;
pub mod types;

pub use messages::*;
pub use types::*;
