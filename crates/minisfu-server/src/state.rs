use crate::sfu::{IceConfig, RelayConfig, SfuSessionManager, SinkFailurePolicy};
use anyhow::{bail, Context};
use minisfu_media::CodecDescriptor;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub bind_address: String,
    pub stun_servers: Vec<String>,
    pub ice_disconnected_timeout_ms: u64,
    pub ice_failed_timeout_ms: u64,
    pub ice_keepalive_interval_ms: u64,
    pub ice_include_loopback: bool,
    /// Codec every party is negotiated onto
    pub codec: String,
    pub keyframe_interval_ms: u64,
    pub mtu: usize,
    pub sink_failure_policy: SinkFailurePolicy,
}

impl Config {
    /// Defaults, then `minisfu.toml` if present, then `MINISFU_*` variables
    pub fn load() -> anyhow::Result<Self> {
        let settings = config::Config::builder()
            .set_default("bind_address", "0.0.0.0:8080")?
            .set_default("stun_servers", vec!["stun:stun.l.google.com:19302"])?
            .set_default("ice_disconnected_timeout_ms", 5000_i64)?
            .set_default("ice_failed_timeout_ms", 25000_i64)?
            .set_default("ice_keepalive_interval_ms", 2000_i64)?
            .set_default("ice_include_loopback", false)?
            .set_default("codec", "VP8")?
            .set_default("keyframe_interval_ms", 3000_i64)?
            .set_default("mtu", 1400_i64)?
            .set_default("sink_failure_policy", "terminate")?
            .add_source(config::File::with_name("minisfu").required(false))
            .add_source(
                config::Environment::with_prefix("MINISFU")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("stun_servers"),
            )
            .build()
            .context("Failed to read configuration")?;

        let config: Config = settings
            .try_deserialize()
            .context("Invalid configuration")?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if CodecDescriptor::from_sdp(&self.codec, 0, 0, "").is_none() {
            bail!("Unsupported codec {:?}; expected one of G722, opus, VP8, VP9, H264", self.codec);
        }
        if self.mtu == 0 {
            bail!("mtu must be greater than zero");
        }
        if self.keyframe_interval_ms == 0 {
            bail!("keyframe_interval_ms must be greater than zero");
        }
        if self.ice_keepalive_interval_ms >= self.ice_disconnected_timeout_ms {
            bail!("ice_keepalive_interval_ms must be shorter than ice_disconnected_timeout_ms");
        }
        Ok(())
    }

    pub fn ice_config(&self) -> IceConfig {
        IceConfig {
            stun_servers: self.stun_servers.clone(),
            disconnected_timeout: Duration::from_millis(self.ice_disconnected_timeout_ms),
            failed_timeout: Duration::from_millis(self.ice_failed_timeout_ms),
            keepalive_interval: Duration::from_millis(self.ice_keepalive_interval_ms),
            include_loopback: self.ice_include_loopback,
        }
    }

    pub fn relay_config(&self) -> RelayConfig {
        RelayConfig {
            mtu: self.mtu,
            keyframe_interval: Duration::from_millis(self.keyframe_interval_ms),
            sink_failure_policy: self.sink_failure_policy,
        }
    }
}

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub sfu: Arc<SfuSessionManager>,
}

impl AppState {
    pub fn new(config: Config) -> Self {
        let sfu = Arc::new(SfuSessionManager::new(
            config.ice_config(),
            config.codec.clone(),
            config.relay_config(),
        ));

        Self { config, sfu }
    }
}
