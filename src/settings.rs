//! Static endpoint configuration: which peers to bootstrap discovery from,
//! which organisations belong to each channel and the timeouts and cache
//! lifetimes the client operates under.
use crate::msp_id::MspId;
use crate::Result;

use config::{Config, File};
use serde::Deserialize;

use tokio::time::Duration;

use std::collections::HashMap;
use std::net::SocketAddr;

// For explanation, see issue: https://github.com/serde-rs/serde/issues/368
fn default_dial_timeout_ms() -> u64 {
    3000
}
fn default_request_timeout_ms() -> u64 {
    5000
}
fn default_discovery_ttl_ms() -> u64 {
    10_000
}
fn default_greylist_ttl_ms() -> u64 {
    10_000
}
fn default_sweep_interval_ms() -> u64 {
    5000
}
fn default_idle_timeout_ms() -> u64 {
    30_000
}

/// Per-channel configuration: the anchor peers discovery queries go to, the
/// organisations admitted to the channel and, optionally, dedicated targets
/// for chaincode policy queries.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ChannelSettings {
    pub anchor_peers: Vec<SocketAddr>,
    pub msps: Vec<MspId>,
    #[serde(default)]
    pub policy_targets: Vec<SocketAddr>,
}

impl ChannelSettings {
    /// Targets for `lscc` queries; falls back to the anchor peers when no
    /// dedicated targets are configured.
    pub fn policy_targets(&self) -> &[SocketAddr] {
        if self.policy_targets.is_empty() {
            &self.anchor_peers
        } else {
            &self.policy_targets
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientConfig {
    pub msp_id: MspId,
    #[serde(default)]
    pub bootstrap_peers: Vec<SocketAddr>,
    #[serde(default)]
    pub channels: HashMap<String, ChannelSettings>,
    #[serde(default = "default_dial_timeout_ms")]
    pub dial_timeout_ms: u64,
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,
    #[serde(default = "default_discovery_ttl_ms")]
    pub discovery_ttl_ms: u64,
    #[serde(default = "default_greylist_ttl_ms")]
    pub greylist_ttl_ms: u64,
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    #[serde(default = "default_idle_timeout_ms")]
    pub idle_timeout_ms: u64,
}

impl ClientConfig {
    pub fn new(msp_id: MspId) -> Self {
        ClientConfig {
            msp_id,
            bootstrap_peers: vec![],
            channels: HashMap::new(),
            dial_timeout_ms: default_dial_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            discovery_ttl_ms: default_discovery_ttl_ms(),
            greylist_ttl_ms: default_greylist_ttl_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            idle_timeout_ms: default_idle_timeout_ms(),
        }
    }

    /// Loads the configuration from a JSON/TOML/YAML file.
    pub fn from_file(path: &str) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

/// Read-only configuration surface the runtime components depend on.
pub trait EndpointConfig: Send + Sync {
    fn local_msp_id(&self) -> &MspId;
    fn bootstrap_peers(&self) -> Vec<SocketAddr>;
    fn channel(&self, channel_id: &str) -> Option<&ChannelSettings>;
    fn dial_timeout(&self) -> Duration;
    fn request_timeout(&self) -> Duration;
    fn discovery_ttl(&self) -> Duration;
    fn greylist_ttl(&self) -> Duration;
    fn sweep_interval(&self) -> Duration;
    fn idle_timeout(&self) -> Duration;
}

impl EndpointConfig for ClientConfig {
    fn local_msp_id(&self) -> &MspId {
        &self.msp_id
    }

    fn bootstrap_peers(&self) -> Vec<SocketAddr> {
        self.bootstrap_peers.clone()
    }

    fn channel(&self, channel_id: &str) -> Option<&ChannelSettings> {
        self.channels.get(channel_id)
    }

    fn dial_timeout(&self) -> Duration {
        Duration::from_millis(self.dial_timeout_ms)
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    fn discovery_ttl(&self) -> Duration {
        Duration::from_millis(self.discovery_ttl_ms)
    }

    fn greylist_ttl(&self) -> Duration {
        Duration::from_millis(self.greylist_ttl_ms)
    }

    fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    fn idle_timeout(&self) -> Duration {
        Duration::from_millis(self.idle_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_applied() {
        let config = ClientConfig::new("Org1MSP".into());
        assert_eq!(config.dial_timeout(), Duration::from_millis(3000));
        assert_eq!(config.discovery_ttl(), Duration::from_millis(10_000));
        assert!(config.bootstrap_peers().is_empty());
    }

    #[test]
    fn policy_targets_fall_back_to_anchors() {
        let mut settings = ChannelSettings::default();
        settings.anchor_peers = vec!["127.0.0.1:9000".parse().unwrap()];
        assert_eq!(settings.policy_targets(), settings.anchor_peers.as_slice());

        settings.policy_targets = vec!["127.0.0.1:9001".parse().unwrap()];
        assert_eq!(settings.policy_targets()[0], "127.0.0.1:9001".parse().unwrap());
    }

    #[test]
    fn loads_from_json_file() {
        let dir = std::env::temp_dir().join(format!("fabric-select-cfg-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("client.json");
        std::fs::write(
            &path,
            r#"{
                "msp_id": "Org1MSP",
                "bootstrap_peers": ["127.0.0.1:9000"],
                "channels": {
                    "mychannel": {
                        "anchor_peers": ["127.0.0.1:9000", "127.0.0.1:9001"],
                        "msps": ["Org1MSP", "Org2MSP"]
                    }
                },
                "discovery_ttl_ms": 1234
            }"#,
        )
        .unwrap();

        let config = ClientConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.local_msp_id(), &MspId::new("Org1MSP"));
        assert_eq!(config.discovery_ttl(), Duration::from_millis(1234));
        // Unset fields keep their defaults.
        assert_eq!(config.dial_timeout(), Duration::from_millis(3000));
        let channel = config.channel("mychannel").unwrap();
        assert_eq!(channel.anchor_peers.len(), 2);
        assert_eq!(channel.msps.len(), 2);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
