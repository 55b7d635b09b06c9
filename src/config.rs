//! `client.conf` parsing (§6): the interface list, worker count, option
//! enable flags, idle timeout, and the MP_JOIN initiator's configured
//! secondary source address, as a TOML file loaded via `serde`+`toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error as ThisError;

use crate::ipv4_addr::Ipv4Address;

#[derive(Debug, ThisError)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },
}

fn deserialize_addr<'de, D>(deserializer: D) -> Result<Ipv4Address, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let s = String::deserialize(deserializer)?;
    s.parse().map_err(serde::de::Error::custom)
}

fn deserialize_addr_list<'de, D>(deserializer: D) -> Result<Vec<Ipv4Address>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = Vec::<String>::deserialize(deserializer)?;
    raw.iter()
        .map(|s| s.parse().map_err(serde::de::Error::custom))
        .collect()
}

/// The engine's operating configuration, loaded once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// The local interface addresses a listener bound to `ANY` may accept
    /// connections on (§4.8's listener match rule).
    #[serde(deserialize_with = "deserialize_addr_list")]
    pub interfaces: Vec<Ipv4Address>,

    /// How many worker engine contexts to run, each owning a disjoint shard
    /// of flows and its own MPTCP directory (§5).
    #[serde(default = "default_worker_count")]
    pub worker_count: usize,

    #[serde(default = "default_true")]
    pub sack_enabled: bool,

    #[serde(default = "default_true")]
    pub timestamps_enabled: bool,

    /// Idle timeout, in seconds, for a flow with no activity.
    #[serde(default = "default_idle_timeout_secs")]
    pub idle_timeout_secs: u64,

    /// The local address the MP_JOIN initiator opens its additional
    /// subflow from; out of scope is choosing *which remote* address to
    /// join (that's the path manager, explicitly excluded per §1).
    #[serde(deserialize_with = "deserialize_addr")]
    pub secondary_source_address: Ipv4Address,
}

fn default_worker_count() -> usize {
    1
}

fn default_true() -> bool {
    true
}

fn default_idle_timeout_secs() -> u64 {
    600
}

impl Config {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    /// Loads and parses a config file from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_a_minimal_config() {
        let toml = r#"
            interfaces = ["10.0.0.1", "10.0.0.2"]
            secondary_source_address = "10.0.0.2"
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.interfaces, vec![Ipv4Address::new([10, 0, 0, 1]), Ipv4Address::new([10, 0, 0, 2])]);
        assert_eq!(config.secondary_source_address, Ipv4Address::new([10, 0, 0, 2]));
        assert_eq!(config.worker_count, 1);
        assert!(config.sack_enabled);
        assert!(config.timestamps_enabled);
        assert_eq!(config.idle_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn rejects_a_malformed_address() {
        let toml = r#"
            interfaces = ["not-an-address"]
            secondary_source_address = "10.0.0.2"
        "#;
        assert!(toml::from_str::<Config>(toml).is_err());
    }

    #[test]
    fn overrides_are_honored() {
        let toml = r#"
            interfaces = ["10.0.0.1"]
            secondary_source_address = "10.0.0.2"
            worker_count = 4
            sack_enabled = false
            timestamps_enabled = false
            idle_timeout_secs = 30
        "#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.worker_count, 4);
        assert!(!config.sack_enabled);
        assert!(!config.timestamps_enabled);
        assert_eq!(config.idle_timeout(), Duration::from_secs(30));
    }
}
