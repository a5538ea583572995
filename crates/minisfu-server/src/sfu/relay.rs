//! Relay session
//!
//! Reads packets from the single publisher stream and writes each one,
//! unchanged, to every attached subscriber sink.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use minisfu_media::CodecDescriptor;
use minisfu_protocol::{RelayState, RelayStatus, SubscriberId};
use serde::Deserialize;
use thiserror::Error;
use tokio::sync::{broadcast, watch, RwLock};
use tokio::task::JoinHandle;

use super::keyframe::{KeyframeScheduler, DEFAULT_KEYFRAME_INTERVAL};
use super::transport::{FeedbackChannel, InboundStream, OutboundSink, TransportError};

/// Read buffer size; stays under a typical path MTU after SRTP/DTLS/UDP overhead
pub const DEFAULT_MTU: usize = 1400;

const EVICTION_CHANNEL_CAPACITY: usize = 64;

/// What a hard write failure on one sink does to the relay
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SinkFailurePolicy {
    /// Stop relaying to everyone
    #[default]
    Terminate,
    /// Detach the failing sink and keep relaying to the rest
    Evict,
}

#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub mtu: usize,
    pub keyframe_interval: Duration,
    pub sink_failure_policy: SinkFailurePolicy,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            mtu: DEFAULT_MTU,
            keyframe_interval: DEFAULT_KEYFRAME_INTERVAL,
            sink_failure_policy: SinkFailurePolicy::default(),
        }
    }
}

#[derive(Error, Debug)]
pub enum RelayError {
    #[error("Inbound stream ended: {0}")]
    StreamEnded(#[source] TransportError),

    #[error("Write to subscriber {subscriber} failed: {source}")]
    SinkWriteFailed {
        subscriber: SubscriberId,
        #[source]
        source: TransportError,
    },

    #[error("Relay session was already started")]
    AlreadyStarted,

    #[error("Relay task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

struct AttachedSink {
    id: SubscriberId,
    codec: CodecDescriptor,
    sink: Arc<dyn OutboundSink>,
}

#[derive(Default)]
struct Counters {
    packets: AtomicU64,
    bytes: AtomicU64,
    evicted: AtomicUsize,
}

/// One publisher stream and the sinks it is fanned out to
pub struct RelaySession {
    codec: CodecDescriptor,
    ssrc: u32,
    config: RelayConfig,
    sinks: RwLock<Vec<AttachedSink>>,
    state: watch::Sender<RelayState>,
    evictions: broadcast::Sender<SubscriberId>,
    counters: Counters,
    started_at: OnceLock<DateTime<Utc>>,
}

/// Tasks spawned by [`RelaySession::start`]
pub struct RelayHandle {
    pub forwarder: JoinHandle<Result<(), RelayError>>,
    pub keyframes: JoinHandle<u64>,
}

impl RelayHandle {
    /// Wait for the relay to terminate. Returns why it stopped.
    pub async fn wait(self) -> Result<(), RelayError> {
        let result = self.forwarder.await?;
        self.keyframes.await?;
        result
    }
}

impl RelaySession {
    pub fn new(codec: CodecDescriptor, ssrc: u32, config: RelayConfig) -> Arc<Self> {
        let (state, _) = watch::channel(RelayState::AwaitingPublisher);
        let (evictions, _) = broadcast::channel(EVICTION_CHANNEL_CAPACITY);

        Arc::new(Self {
            codec,
            ssrc,
            config,
            sinks: RwLock::new(Vec::new()),
            state,
            evictions,
            counters: Counters::default(),
            started_at: OnceLock::new(),
        })
    }

    pub fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Codec negotiated with the publisher
    pub fn codec(&self) -> &CodecDescriptor {
        &self.codec
    }

    pub fn state(&self) -> RelayState {
        *self.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<RelayState> {
        self.state.subscribe()
    }

    /// Ids of sinks removed under [`SinkFailurePolicy::Evict`], as they happen
    pub fn subscribe_evictions(&self) -> broadcast::Receiver<SubscriberId> {
        self.evictions.subscribe()
    }

    /// Spawn the forwarding loop and the keyframe scheduler for this session
    pub fn start<S>(self: &Arc<Self>, inbound: S, feedback: Arc<dyn FeedbackChannel>) -> RelayHandle
    where
        S: InboundStream + 'static,
    {
        // Subscribe before the forwarder runs so a fast termination is not missed
        let state = self.subscribe_state();
        let keyframes =
            KeyframeScheduler::new(self.config.keyframe_interval).spawn(self.ssrc, feedback, state);

        let session = Arc::clone(self);
        let forwarder = tokio::spawn(async move { session.run(inbound).await });

        RelayHandle {
            forwarder,
            keyframes,
        }
    }

    /// Add a subscriber sink. Takes effect from the next packet on.
    ///
    /// The sink's codec is recorded as negotiated; it is not checked against
    /// the publisher's.
    pub async fn attach(&self, sink: Arc<dyn OutboundSink>, codec: CodecDescriptor) -> SubscriberId {
        let id = SubscriberId::new();

        let mut sinks = self.sinks.write().await;
        tracing::info!(
            "Attached subscriber {} to SSRC {} with {} ({} sinks)",
            id,
            self.ssrc,
            codec,
            sinks.len() + 1
        );
        sinks.push(AttachedSink { id, codec, sink });

        id
    }

    /// Remove one sink. Returns false if it was not attached.
    pub async fn detach(&self, id: SubscriberId) -> bool {
        let mut sinks = self.sinks.write().await;
        let before = sinks.len();
        sinks.retain(|s| s.id != id);

        let removed = sinks.len() != before;
        if removed {
            tracing::info!(
                "Detached subscriber {} from SSRC {} ({} sinks)",
                id,
                self.ssrc,
                sinks.len()
            );
        }
        removed
    }

    /// Remove every sink, returning their ids in attach order
    pub async fn detach_all(&self) -> Vec<SubscriberId> {
        self.sinks.write().await.drain(..).map(|s| s.id).collect()
    }

    pub async fn subscriber_count(&self) -> usize {
        self.sinks.read().await.len()
    }

    /// Codec negotiated with one subscriber
    pub async fn subscriber_codec(&self, id: SubscriberId) -> Option<CodecDescriptor> {
        self.sinks
            .read()
            .await
            .iter()
            .find(|s| s.id == id)
            .map(|s| s.codec.clone())
    }

    /// Run the forwarding loop until the inbound stream ends or a sink fails
    /// fatally. The session is `Terminated` when this returns.
    pub async fn run<S: InboundStream>(&self, mut inbound: S) -> Result<(), RelayError> {
        let started = self.state.send_if_modified(|state| {
            if *state == RelayState::AwaitingPublisher {
                *state = RelayState::Active;
                true
            } else {
                false
            }
        });
        if !started {
            return Err(RelayError::AlreadyStarted);
        }
        let _ = self.started_at.set(Utc::now());

        tracing::info!(
            "Relaying SSRC {} ({}) with {} byte buffer",
            self.ssrc,
            self.codec,
            self.config.mtu
        );

        let mut buf = vec![0u8; self.config.mtu];

        let result = loop {
            let n = match inbound.read(&mut buf).await {
                Ok(n) => n,
                Err(e) => break Err(RelayError::StreamEnded(e)),
            };

            if let Err(e) = self.forward(&buf[..n]).await {
                break Err(e);
            }

            let count = self.counters.packets.load(Ordering::Relaxed);
            if count % 100 == 1 {
                tracing::debug!(
                    "Forwarded packet {} from SSRC {} ({} bytes)",
                    count,
                    self.ssrc,
                    n
                );
            }
        };

        self.state.send_replace(RelayState::Terminated);

        match &result {
            Err(RelayError::StreamEnded(e)) => {
                tracing::info!("Inbound stream {} ended: {}", self.ssrc, e)
            }
            Err(e) => tracing::error!("Relay for SSRC {} stopped: {}", self.ssrc, e),
            Ok(()) => {}
        }

        result
    }

    /// Write one packet to every attached sink, in attach order
    async fn forward(&self, packet: &[u8]) -> Result<(), RelayError> {
        let mut failed = Vec::new();

        {
            let sinks = self.sinks.read().await;
            for attached in sinks.iter() {
                match attached.sink.write(packet).await {
                    Ok(_) | Err(TransportError::NoActiveSink) => {}
                    Err(e) => match self.config.sink_failure_policy {
                        SinkFailurePolicy::Terminate => {
                            return Err(RelayError::SinkWriteFailed {
                                subscriber: attached.id,
                                source: e,
                            });
                        }
                        SinkFailurePolicy::Evict => {
                            tracing::warn!("Evicting subscriber {}: {}", attached.id, e);
                            failed.push(attached.id);
                        }
                    },
                }
            }
        }

        if !failed.is_empty() {
            self.sinks.write().await.retain(|s| !failed.contains(&s.id));
            self.counters.evicted.fetch_add(failed.len(), Ordering::Relaxed);
            for id in failed {
                let _ = self.evictions.send(id);
            }
        }

        self.counters.packets.fetch_add(1, Ordering::Relaxed);
        self.counters
            .bytes
            .fetch_add(packet.len() as u64, Ordering::Relaxed);

        Ok(())
    }

    pub async fn status(&self) -> RelayStatus {
        RelayStatus {
            state: self.state(),
            ssrc: Some(self.ssrc),
            codec: Some(self.codec.name.to_string()),
            payload_type: Some(self.codec.payload_type),
            subscribers: self.subscriber_count().await,
            evicted_subscribers: self.counters.evicted.load(Ordering::Relaxed),
            packets_forwarded: self.counters.packets.load(Ordering::Relaxed),
            bytes_forwarded: self.counters.bytes.load(Ordering::Relaxed),
            started_at: self.started_at.get().copied(),
        }
    }
}
