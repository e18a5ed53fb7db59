//! Server configuration module
//!
//! Handles loading and parsing of server configuration from files and environment variables.

use std::env;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Default config file location
pub const DEFAULT_CONFIG_PATH: &str = "config/server.toml";

/// Upper bound for the per-connection outbound queue
const MAX_OUTBOUND_QUEUE_SIZE: usize = 65536;

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Path to the configuration file
    #[serde(skip)]
    pub config_path: PathBuf,

    /// Interface to bind
    #[serde(default = "default_host")]
    pub host: String,

    /// WebSocket listen port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Largest accepted WebSocket message in bytes
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Payloads queued per connection before sends to it start failing
    #[serde(default = "default_outbound_queue_size")]
    pub outbound_queue_size: usize,

    /// Send updated `network-info` to the whole network after joins and leaves
    #[serde(default = "default_true")]
    pub broadcast_network_info: bool,
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_max_message_size() -> usize {
    64 * 1024
}

fn default_outbound_queue_size() -> usize {
    256
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
            host: default_host(),
            port: default_port(),
            max_message_size: default_max_message_size(),
            outbound_queue_size: default_outbound_queue_size(),
            broadcast_network_info: default_true(),
        }
    }
}

impl ServerConfig {
    /// Load configuration from file and environment variables
    pub async fn load() -> Result<Self> {
        // Determine config path from environment or use default
        let config_path = env::var("RENDEZVOUS_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(DEFAULT_CONFIG_PATH));

        // Try to load from file
        let mut config = if config_path.exists() {
            let content = tokio::fs::read_to_string(&config_path)
                .await
                .with_context(|| {
                    format!("Failed to read config file: {}", config_path.display())
                })?;

            Self::from_toml(&content).with_context(|| {
                format!("Failed to parse config file: {}", config_path.display())
            })?
        } else {
            tracing::warn!(
                "Config file not found at {}, using defaults",
                config_path.display()
            );
            Self::default()
        };

        config.config_path = config_path;

        // Override with environment variables
        config.apply_env_overrides();

        // Validate configuration
        config.validate()?;

        Ok(config)
    }

    /// Parse a TOML document, filling missing fields with defaults
    pub fn from_toml(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content)?;
        config.config_path = PathBuf::from(DEFAULT_CONFIG_PATH);
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| env::var(key).ok());
    }

    /// Apply overrides from any key lookup; unparseable values are ignored
    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("RENDEZVOUS_HOST") {
            self.host = val;
        }
        // Plain PORT is what most hosting platforms inject
        if let Some(port) = lookup("PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(port) = lookup("RENDEZVOUS_PORT").and_then(|v| v.parse().ok()) {
            self.port = port;
        }
        if let Some(size) = lookup("RENDEZVOUS_MAX_MESSAGE_SIZE").and_then(|v| v.parse().ok()) {
            self.max_message_size = size;
        }
        if let Some(size) = lookup("RENDEZVOUS_OUTBOUND_QUEUE_SIZE").and_then(|v| v.parse().ok())
        {
            self.outbound_queue_size = size;
        }
        if let Some(val) = lookup("RENDEZVOUS_BROADCAST_NETWORK_INFO") {
            self.broadcast_network_info = val.to_lowercase() == "true" || val == "1";
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.host.parse::<IpAddr>().is_err() {
            anyhow::bail!("Host must be an IP address, got {:?}", self.host);
        }

        if self.max_message_size == 0 {
            anyhow::bail!("Max message size must be greater than zero");
        }

        if self.outbound_queue_size == 0 || self.outbound_queue_size > MAX_OUTBOUND_QUEUE_SIZE {
            anyhow::bail!(
                "Outbound queue size must be between 1 and {}",
                MAX_OUTBOUND_QUEUE_SIZE
            );
        }

        Ok(())
    }

    /// Get the socket address to listen on
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self
            .host
            .parse()
            .with_context(|| format!("Invalid host: {}", self.host))?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = ServerConfig::default();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 8080);
        assert_eq!(config.max_message_size, 65536);
        assert_eq!(config.outbound_queue_size, 256);
        assert!(config.broadcast_network_info);
        assert_eq!(
            config.listen_addr().unwrap(),
            "0.0.0.0:8080".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_from_toml_partial() {
        let config = ServerConfig::from_toml("port = 9000\nbroadcast_network_info = false\n")
            .unwrap();
        assert_eq!(config.port, 9000);
        assert!(!config.broadcast_network_info);
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.outbound_queue_size, 256);
    }

    #[test]
    fn test_from_toml_invalid() {
        assert!(ServerConfig::from_toml("port = \"not a number\"").is_err());
    }

    #[test]
    fn test_port_overrides() {
        let mut config = ServerConfig::default();
        config.apply_overrides(lookup_from(&[("PORT", "3000")]));
        assert_eq!(config.port, 3000);

        // The prefixed variable wins over plain PORT
        let mut config = ServerConfig::default();
        config.apply_overrides(lookup_from(&[("PORT", "3000"), ("RENDEZVOUS_PORT", "4000")]));
        assert_eq!(config.port, 4000);
    }

    #[test]
    fn test_unparseable_overrides_ignored() {
        let mut config = ServerConfig::default();
        config.apply_overrides(lookup_from(&[
            ("PORT", "eighty"),
            ("RENDEZVOUS_OUTBOUND_QUEUE_SIZE", "-1"),
        ]));
        assert_eq!(config.port, 8080);
        assert_eq!(config.outbound_queue_size, 256);
    }

    #[test]
    fn test_bool_override() {
        let mut config = ServerConfig::default();
        config.apply_overrides(lookup_from(&[("RENDEZVOUS_BROADCAST_NETWORK_INFO", "0")]));
        assert!(!config.broadcast_network_info);

        config.apply_overrides(lookup_from(&[("RENDEZVOUS_BROADCAST_NETWORK_INFO", "TRUE")]));
        assert!(config.broadcast_network_info);
    }

    #[test]
    fn test_validation() {
        let mut config = ServerConfig::default();

        // Valid config should pass
        assert!(config.validate().is_ok());

        config.host = "localhost".to_string();
        assert!(config.validate().is_err());
        config.host = "127.0.0.1".to_string();

        config.max_message_size = 0;
        assert!(config.validate().is_err());
        config.max_message_size = 1024;

        config.outbound_queue_size = 0;
        assert!(config.validate().is_err());
        config.outbound_queue_size = MAX_OUTBOUND_QUEUE_SIZE + 1;
        assert!(config.validate().is_err());
        config.outbound_queue_size = 16;

        assert!(config.validate().is_ok());
    }
}
