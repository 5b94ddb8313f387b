//! Transport configuration
//!
//! Loaded from TOML. Every field has a default, so an empty file (or no file at
//! all, via [`TransportConfig::default`]) yields a working configuration.

use crate::diagnostics::levels;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Largest accepted read chunk for TCP connections
pub const MAX_RECEIVE_BUFFER_SIZE: usize = 1024 * 1024;

/// Top-level configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TransportConfig {
    #[serde(default)]
    pub transport: TransportSection,
    #[serde(default)]
    pub network: NetworkSection,
}

/// Transport section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransportSection {
    /// Sender name of the transport's diagnostics sink
    #[serde(default = "default_diagnostics_name")]
    pub diagnostics_name: String,
    /// Minimum level of raw connection diagnostics relayed to the transport
    #[serde(default = "default_relay_min_level")]
    pub relay_min_level: usize,
}

impl Default for TransportSection {
    fn default() -> Self {
        Self {
            diagnostics_name: default_diagnostics_name(),
            relay_min_level: default_relay_min_level(),
        }
    }
}

/// Network section, consumed by the default TCP connection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NetworkSection {
    /// Maximum number of bytes delivered per inbound chunk
    #[serde(default = "default_receive_buffer_size")]
    pub receive_buffer_size: usize,
    /// Disable Nagle's algorithm on connected sockets
    #[serde(default = "default_tcp_nodelay")]
    pub tcp_nodelay: bool,
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            receive_buffer_size: default_receive_buffer_size(),
            tcp_nodelay: default_tcp_nodelay(),
        }
    }
}

fn default_diagnostics_name() -> String {
    "MqttClientNetworkTransport".to_string()
}

fn default_relay_min_level() -> usize {
    levels::INFO
}

fn default_receive_buffer_size() -> usize {
    4096
}

fn default_tcp_nodelay() -> bool {
    true
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),
    #[error("Failed to parse TOML: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl TransportConfig {
    /// Load configuration from a TOML file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate configuration from TOML text
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: TransportConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport.diagnostics_name.trim().is_empty() {
            return Err(ConfigError::InvalidConfig(
                "transport.diagnostics_name must not be empty".to_string(),
            ));
        }

        if self.network.receive_buffer_size == 0
            || self.network.receive_buffer_size > MAX_RECEIVE_BUFFER_SIZE
        {
            return Err(ConfigError::InvalidConfig(format!(
                "network.receive_buffer_size must be between 1 and {MAX_RECEIVE_BUFFER_SIZE}, got {}",
                self.network.receive_buffer_size
            )));
        }

        Ok(())
    }
}
