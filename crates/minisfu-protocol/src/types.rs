use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Lifecycle of the relay session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RelayState {
    /// No publisher stream has been established yet
    #[default]
    AwaitingPublisher,
    /// The forwarding loop is running
    Active,
    /// The publisher stream ended or the loop failed; nothing is forwarded anymore
    Terminated,
}

impl fmt::Display for RelayState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RelayState::AwaitingPublisher => write!(f, "awaiting_publisher"),
            RelayState::Active => write!(f, "active"),
            RelayState::Terminated => write!(f, "terminated"),
        }
    }
}

/// Identity of one attached subscriber sink
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriberId(pub Uuid);

impl SubscriberId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriberId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Snapshot of the relay reported by `GET /status`
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayStatus {
    pub state: RelayState,
    pub ssrc: Option<u32>,
    pub codec: Option<String>,
    pub payload_type: Option<u8>,
    pub subscribers: usize,
    pub evicted_subscribers: usize,
    pub packets_forwarded: u64,
    pub bytes_forwarded: u64,
    pub started_at: Option<DateTime<Utc>>,
}
