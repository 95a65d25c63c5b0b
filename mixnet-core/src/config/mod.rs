//! Session configuration for the mix network.
//!
//! A session is described by a fixed, ordered chain of mix servers, a fixed
//! (unordered) set of clients, and a handful of timing/cover-traffic knobs.
//! Configuration is loaded from YAML, matching the original operator tooling.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

mod error;

pub use error::ConfigError;

/// A single chain or client peer entry: stable id plus network address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerEntry {
    pub id: String,
    pub address: String,
}

/// Full session configuration, as loaded from a YAML config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Number of messages a mix server must collect before releasing a round.
    /// Must equal `clients.len()`.
    pub messages_per_round: usize,

    /// Seconds between client emission ticks.
    #[serde(default = "default_round_duration")]
    pub round_duration: f64,

    /// Canonical plaintext used for cover traffic; recipients filter it out.
    #[serde(default = "default_dummy_payload")]
    pub dummy_payload: String,

    /// Mix chain in forwarding order: `mix_servers[0]` is the entry mix.
    pub mix_servers: Vec<PeerEntry>,

    /// Clients participating in the session. Order carries no meaning.
    pub clients: Vec<PeerEntry>,

    /// Logging configuration, present regardless of the mixing Non-goals.
    #[serde(default)]
    pub logging: LoggingConfig,
}

fn default_round_duration() -> f64 {
    1.0
}

fn default_dummy_payload() -> String {
    "dummy".to_string()
}

/// Logging knobs, mirrored on the `logging` crate's `LogConfig`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

impl Config {
    /// Load and validate a configuration from a YAML file.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileReadError(e.to_string()))?;
        Self::from_yaml_str(&contents)
    }

    /// Parse and validate a configuration from a YAML string.
    pub fn from_yaml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self =
            serde_yaml::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Serialize this configuration back to a YAML file.
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ConfigError> {
        let contents =
            serde_yaml::to_string(self).map_err(|e| ConfigError::SerializeError(e.to_string()))?;
        std::fs::write(path, contents).map_err(|e| ConfigError::FileWriteError(e.to_string()))?;
        Ok(())
    }

    /// Look up a mix server's position in the chain by id.
    pub fn mix_index(&self, id: &str) -> Option<usize> {
        self.mix_servers.iter().position(|m| m.id == id)
    }

    /// Whether `address` belongs to a known client (used to route a peeled
    /// hop to the delivery buffer instead of onward to the next mix).
    pub fn is_client_address(&self, address: &str) -> bool {
        self.clients.iter().any(|c| c.address == address)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mix_servers.is_empty() {
            return Err(ConfigError::ValidationFailed(
                "mix_servers must not be empty".to_string(),
            ));
        }
        if self.messages_per_round != self.clients.len() {
            return Err(ConfigError::ValidationFailed(format!(
                "messages_per_round ({}) must equal the number of clients ({})",
                self.messages_per_round,
                self.clients.len()
            )));
        }
        if self.round_duration <= 0.0 {
            return Err(ConfigError::ValidationFailed(
                "round_duration must be positive".to_string(),
            ));
        }

        let mut ids = HashSet::new();
        let mut addrs = HashSet::new();
        for peer in self.mix_servers.iter().chain(self.clients.iter()) {
            if !ids.insert(peer.id.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate peer id: {}",
                    peer.id
                )));
            }
            if !addrs.insert(peer.address.as_str()) {
                return Err(ConfigError::ValidationFailed(format!(
                    "duplicate peer address: {}",
                    peer.address
                )));
            }
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::ValidationFailed(format!(
                "invalid log level: {}",
                self.logging.level
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
pub fn sample_config() -> Config {
    Config {
        messages_per_round: 2,
        round_duration: 1.0,
        dummy_payload: "dummy".to_string(),
        mix_servers: vec![
            PeerEntry {
                id: "s1".to_string(),
                address: "127.0.0.1:50051".to_string(),
            },
            PeerEntry {
                id: "s2".to_string(),
                address: "127.0.0.1:50052".to_string(),
            },
            PeerEntry {
                id: "s3".to_string(),
                address: "127.0.0.1:50053".to_string(),
            },
        ],
        clients: vec![
            PeerEntry {
                id: "c1".to_string(),
                address: "127.0.0.1:50061".to_string(),
            },
            PeerEntry {
                id: "c2".to_string(),
                address: "127.0.0.1:50062".to_string(),
            },
        ],
        logging: LoggingConfig::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sample_validates() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn rejects_mismatched_round_size() {
        let mut config = sample_config();
        config.messages_per_round = 99;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ValidationFailed(_))
        ));
    }

    #[test]
    fn rejects_empty_chain() {
        let mut config = sample_config();
        config.mix_servers.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_duplicate_ids() {
        let mut config = sample_config();
        config.clients[1].id = config.clients[0].id.clone();
        assert!(config.validate().is_err());
    }

    #[test]
    fn round_trips_through_yaml() {
        let config = sample_config();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed = Config::from_yaml_str(&yaml).unwrap();
        assert_eq!(parsed.mix_servers.len(), config.mix_servers.len());
        assert_eq!(parsed.clients.len(), config.clients.len());
    }

    #[test]
    fn mix_index_finds_position() {
        let config = sample_config();
        assert_eq!(config.mix_index("s2"), Some(1));
        assert_eq!(config.mix_index("nope"), None);
    }
}
