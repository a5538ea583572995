//! SFU Session Manager
//!
//! Negotiates each connecting party's peer connection and owns the single
//! relay session between the publisher and its subscribers.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Duration;

use minisfu_media::{sdp, CodecDescriptor, CodecRegistry, MediaError};
use minisfu_protocol::{RelayState, RelayStatus, SubscriberId};
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Mutex, RwLock};

use webrtc::api::interceptor_registry::register_default_interceptors;
use webrtc::api::media_engine::MediaEngine;
use webrtc::api::setting_engine::SettingEngine;
use webrtc::api::APIBuilder;
use webrtc::ice_transport::ice_server::RTCIceServer;
use webrtc::interceptor::registry::Registry;
use webrtc::peer_connection::configuration::RTCConfiguration;
use webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState;
use webrtc::peer_connection::sdp::session_description::RTCSessionDescription;
use webrtc::peer_connection::RTCPeerConnection;
use webrtc::rtp_transceiver::rtp_codec::RTPCodecType;
use webrtc::track::track_local::track_local_static_rtp::TrackLocalStaticRTP;
use webrtc::track::track_local::TrackLocal;
use webrtc::track::track_remote::TrackRemote;

use super::relay::{RelayConfig, RelaySession};
use super::rtc::{LocalTrackSink, PeerFeedback, RemoteTrackStream};

const STREAM_ID: &str = "minisfu";

#[derive(Error, Debug)]
pub enum SfuError {
    #[error(transparent)]
    Media(#[from] MediaError),

    #[error("A publisher is already connected")]
    PublisherAlreadyConnected,

    #[error("No publisher is streaming yet")]
    NoPublisher,

    #[error("Peer connection has no local description")]
    MissingLocalDescription,

    #[error("WebRTC error: {0}")]
    Webrtc(#[from] webrtc::Error),
}

/// ICE settings applied to every peer connection
#[derive(Debug, Clone)]
pub struct IceConfig {
    pub stun_servers: Vec<String>,
    /// Silence before a connection counts as disconnected
    pub disconnected_timeout: Duration,
    /// Further silence before a disconnected connection counts as failed
    pub failed_timeout: Duration,
    pub keepalive_interval: Duration,
    /// Gather 127.0.0.1 candidates, for parties on the same host
    pub include_loopback: bool,
}

impl Default for IceConfig {
    fn default() -> Self {
        Self {
            stun_servers: vec![],
            disconnected_timeout: Duration::from_secs(5),
            failed_timeout: Duration::from_secs(25),
            keepalive_interval: Duration::from_secs(2),
            include_loopback: false,
        }
    }
}

impl IceConfig {
    fn ice_servers(&self) -> Vec<RTCIceServer> {
        self.stun_servers
            .iter()
            .map(|url| RTCIceServer {
                urls: vec![url.clone()],
                ..Default::default()
            })
            .collect()
    }

    fn setting_engine(&self) -> SettingEngine {
        let mut settings = SettingEngine::default();
        settings.set_ice_timeouts(
            Some(self.disconnected_timeout),
            Some(self.failed_timeout),
            Some(self.keepalive_interval),
        );
        settings.set_include_loopback_candidate(self.include_loopback);
        settings
    }
}

/// Result of one offer/answer exchange
#[derive(Debug, Clone)]
pub struct Negotiated {
    pub answer_sdp: String,
    pub codec: CodecDescriptor,
    pub subscriber_id: Option<SubscriberId>,
}

/// Global SFU session manager
pub struct SfuSessionManager {
    ice: IceConfig,
    /// Codec every party is asked for, e.g. `VP8`
    codec_name: String,
    relay_config: RelayConfig,
    relay: RwLock<Option<Arc<RelaySession>>>,
    publisher: Mutex<Option<Arc<RTCPeerConnection>>>,
    subscribers: RwLock<HashMap<SubscriberId, Arc<RTCPeerConnection>>>,
}

impl SfuSessionManager {
    pub fn new(ice: IceConfig, codec_name: impl Into<String>, relay_config: RelayConfig) -> Self {
        Self {
            ice,
            codec_name: codec_name.into(),
            relay_config,
            relay: RwLock::new(None),
            publisher: Mutex::new(None),
            subscribers: RwLock::new(HashMap::new()),
        }
    }

    /// The current relay session, if a publisher track has arrived
    pub async fn relay(&self) -> Option<Arc<RelaySession>> {
        self.relay.read().await.clone()
    }

    pub async fn status(&self) -> RelayStatus {
        match self.relay().await {
            Some(relay) => relay.status().await,
            None => RelayStatus::default(),
        }
    }

    /// Subscriber peer connections currently held open
    pub async fn connected_subscribers(&self) -> usize {
        self.subscribers.read().await.len()
    }

    /// Negotiate the publisher's peer connection. The relay session starts
    /// once the publisher's first matching track arrives.
    pub async fn accept_publisher(self: &Arc<Self>, offer_sdp: &str) -> Result<Negotiated, SfuError> {
        let mut publisher = self.publisher.lock().await;

        if let Some(previous) = publisher.as_ref() {
            let finished = match self.relay().await {
                Some(relay) => relay.state() == RelayState::Terminated,
                None => is_down(previous.connection_state()),
            };
            if !finished {
                return Err(SfuError::PublisherAlreadyConnected);
            }
            if let Some(previous) = publisher.take() {
                if let Err(e) = previous.close().await {
                    tracing::warn!("Error closing previous publisher connection: {}", e);
                }
            }
            *self.relay.write().await = None;
        }

        let (peer_connection, codec) = self.new_peer_connection("publisher", offer_sdp).await?;

        // A failed publisher is closed so its track reads end and the relay terminates
        let pc = Arc::downgrade(&peer_connection);
        watch_connection_state(&peer_connection, "publisher", move |state| {
            if state == RTCPeerConnectionState::Failed {
                let pc = pc.clone();
                tokio::spawn(async move {
                    if let Some(pc) = pc.upgrade() {
                        tracing::info!("Closing failed publisher connection");
                        if let Err(e) = pc.close().await {
                            tracing::warn!("Error closing publisher connection: {}", e);
                        }
                    }
                });
            }
        });

        peer_connection
            .add_transceiver_from_kind(codec.kind.into(), None)
            .await?;

        let manager = Arc::downgrade(self);
        let pc = Arc::downgrade(&peer_connection);
        let track_codec = codec.clone();
        peer_connection.on_track(Box::new(move |track, _receiver, _transceiver| {
            let manager = manager.clone();
            let pc = pc.clone();
            let codec = track_codec.clone();

            Box::pin(async move {
                if let Some(manager) = manager.upgrade() {
                    manager.publish_track(track, pc, codec).await;
                }
            })
        }));

        let answer_sdp = match self.answer(&peer_connection, offer_sdp).await {
            Ok(sdp) => sdp,
            Err(e) => {
                let _ = peer_connection.close().await;
                return Err(e);
            }
        };

        *publisher = Some(peer_connection);
        tracing::info!("Publisher negotiated {}", codec);

        Ok(Negotiated {
            answer_sdp,
            codec,
            subscriber_id: None,
        })
    }

    /// Negotiate a subscriber and attach its sink to the running relay
    pub async fn accept_subscriber(self: &Arc<Self>, offer_sdp: &str) -> Result<Negotiated, SfuError> {
        let relay = self
            .relay()
            .await
            .filter(|r| r.state() != RelayState::Terminated)
            .ok_or(SfuError::NoPublisher)?;

        let (peer_connection, codec) = self.new_peer_connection("subscriber", offer_sdp).await?;
        watch_connection_state(&peer_connection, "subscriber", |_| {});

        let track = Arc::new(TrackLocalStaticRTP::new(
            codec.capability(),
            codec.kind.to_string(),
            STREAM_ID.to_string(),
        ));

        let rtp_sender = peer_connection
            .add_track(Arc::clone(&track) as Arc<dyn TrackLocal + Send + Sync>)
            .await?;

        // Incoming RTCP has to be drained for interceptors (NACK, reports) to run
        tokio::spawn(async move {
            let mut rtcp_buf = vec![0u8; 1500];
            while let Ok((_, _)) = rtp_sender.read(&mut rtcp_buf).await {}
        });

        let answer_sdp = match self.answer(&peer_connection, offer_sdp).await {
            Ok(sdp) => sdp,
            Err(e) => {
                let _ = peer_connection.close().await;
                return Err(e);
            }
        };

        let subscriber_id = relay
            .attach(Arc::new(LocalTrackSink::new(track)), codec.clone())
            .await;
        self.subscribers
            .write()
            .await
            .insert(subscriber_id, Arc::clone(&peer_connection));

        let manager = Arc::downgrade(self);
        watch_connection_state(&peer_connection, "subscriber", move |_| {
            let manager = manager.clone();
            tokio::spawn(async move {
                if let Some(manager) = manager.upgrade() {
                    manager.close_subscriber(subscriber_id).await;
                }
            });
        });

        // The relay may have ended while candidates were gathered
        if relay.state() == RelayState::Terminated {
            relay.detach(subscriber_id).await;
            self.close_subscriber(subscriber_id).await;
            return Err(SfuError::NoPublisher);
        }

        Ok(Negotiated {
            answer_sdp,
            codec,
            subscriber_id: Some(subscriber_id),
        })
    }

    /// Detach a subscriber from the relay and close its peer connection
    async fn close_subscriber(&self, id: SubscriberId) {
        let peer_connection = self.subscribers.write().await.remove(&id);

        if let Some(relay) = self.relay().await {
            relay.detach(id).await;
        }

        if let Some(peer_connection) = peer_connection {
            tracing::info!("Closing subscriber {}", id);
            if let Err(e) = peer_connection.close().await {
                tracing::warn!("Error closing subscriber {}: {}", id, e);
            }
        }
    }

    /// Build a peer connection whose media engine knows only the configured
    /// codec, numbered the way this party's offer numbers it.
    async fn new_peer_connection(
        &self,
        role: &'static str,
        offer_sdp: &str,
    ) -> Result<(Arc<RTCPeerConnection>, CodecDescriptor), SfuError> {
        let description = sdp::parse_description(offer_sdp)?;
        let codec = sdp::resolve(&description)?
            .by_name(&self.codec_name)
            .first()
            .map(|c| (*c).clone())
            .ok_or_else(|| MediaError::CodecNotFound(self.codec_name.clone()))?;

        tracing::info!(
            "Resolved {} payload type {} for {}",
            self.codec_name,
            codec.payload_type,
            role
        );

        let mut registry = CodecRegistry::new();
        registry.register(codec.clone());

        let mut media_engine = MediaEngine::default();
        registry.register_with(&mut media_engine)?;

        let mut interceptors = Registry::new();
        interceptors = register_default_interceptors(interceptors, &mut media_engine)?;

        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(interceptors)
            .with_setting_engine(self.ice.setting_engine())
            .build();

        let config = RTCConfiguration {
            ice_servers: self.ice.ice_servers(),
            ..Default::default()
        };

        let peer_connection = Arc::new(api.new_peer_connection(config).await?);

        Ok((peer_connection, codec))
    }

    /// Apply the offer and return a complete (non-trickle) answer
    async fn answer(
        &self,
        peer_connection: &Arc<RTCPeerConnection>,
        offer_sdp: &str,
    ) -> Result<String, SfuError> {
        let offer = RTCSessionDescription::offer(offer_sdp.to_string())?;
        peer_connection.set_remote_description(offer).await?;

        let answer = peer_connection.create_answer(None).await?;

        let mut gather_complete = peer_connection.gathering_complete_promise().await;
        peer_connection.set_local_description(answer).await?;
        let _ = gather_complete.recv().await;

        peer_connection
            .local_description()
            .await
            .map(|description| description.sdp)
            .ok_or(SfuError::MissingLocalDescription)
    }

    async fn publish_track(
        self: &Arc<Self>,
        track: Arc<TrackRemote>,
        peer_connection: Weak<RTCPeerConnection>,
        codec: CodecDescriptor,
    ) {
        let ssrc = track.ssrc();

        if track.kind() != RTPCodecType::from(codec.kind) {
            tracing::info!(
                "Ignoring {} track {} from publisher; relaying {} only",
                track.kind(),
                ssrc,
                codec.kind
            );
            return;
        }

        let mut current = self.relay.write().await;
        if let Some(relay) = current.as_ref() {
            if relay.state() != RelayState::Terminated {
                tracing::warn!(
                    "Ignoring track {}: already relaying SSRC {}",
                    ssrc,
                    relay.ssrc()
                );
                return;
            }
        }

        tracing::info!(
            "Publisher track {} arrived (payload type {})",
            ssrc,
            track.payload_type()
        );

        let relay = RelaySession::new(codec, ssrc, self.relay_config.clone());
        let handle = relay.start(
            RemoteTrackStream::new(track),
            Arc::new(PeerFeedback::new(peer_connection)),
        );
        *current = Some(Arc::clone(&relay));
        drop(current);

        let mut evictions = relay.subscribe_evictions();
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                match evictions.recv().await {
                    Ok(id) => match manager.upgrade() {
                        Some(manager) => manager.close_subscriber(id).await,
                        None => break,
                    },
                    Err(RecvError::Lagged(missed)) => {
                        tracing::warn!("Missed {} subscriber evictions on SSRC {}", missed, ssrc);
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        });

        // Subscribers of an ended relay are closed
        let manager = Arc::downgrade(self);
        tokio::spawn(async move {
            if let Err(e) = handle.wait().await {
                tracing::info!("Relay for SSRC {} terminated: {}", ssrc, e);
            }

            let detached = relay.detach_all().await;
            if let Some(manager) = manager.upgrade() {
                for id in detached {
                    manager.close_subscriber(id).await;
                }
            }
        });
    }
}

fn is_down(state: RTCPeerConnectionState) -> bool {
    matches!(
        state,
        RTCPeerConnectionState::Failed | RTCPeerConnectionState::Closed
    )
}

/// Log every state change of `peer_connection` and call `on_down` once it
/// fails or closes. Replaces any handler set earlier.
fn watch_connection_state<F>(peer_connection: &RTCPeerConnection, role: &'static str, on_down: F)
where
    F: Fn(RTCPeerConnectionState) + Send + Sync + 'static,
{
    peer_connection.on_peer_connection_state_change(Box::new(
        move |state: RTCPeerConnectionState| {
            tracing::info!("{} peer connection state: {}", role, state);
            if is_down(state) {
                on_down(state);
            }
            Box::pin(async {})
        },
    ));
}
