//! # Broker Configuration
//!
//! What the broker mirrors its stream to.

use std::path::PathBuf;

use event_socket::SocketConfig;
use serde::Deserialize;

/// Producer-side file mirror.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    pub enabled: bool,
    /// Path of the mirror file. Truncated on start.
    pub file: PathBuf,
}

impl Default for FileConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            file: PathBuf::from("./events.buffer"),
        }
    }
}

/// Broker configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Socket mirror to a remote data node.
    pub socket: SocketConfig,
    /// File mirror.
    pub file: FileConfig,
}

impl BrokerConfig {
    /// Whether any mirror is configured, and therefore the initial value of
    /// the streaming flag.
    #[must_use]
    pub fn streaming_enabled(&self) -> bool {
        self.socket.enabled || self.file.enabled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_mirror_nothing() {
        let config = BrokerConfig::default();
        assert!(!config.socket.enabled);
        assert!(!config.file.enabled);
        assert!(!config.streaming_enabled());
    }
}
