//! # Node Configuration
//!
//! One struct per component, gathered into [`NodeConfig`]. Defaults live on
//! the component structs; `BROKER_*` environment variables override them.
//!
//! | Variable | Field |
//! |----------|-------|
//! | `BROKER_SOCKET_ENABLED` | `broker.socket.enabled` |
//! | `BROKER_SOCKET_ADDRESS` / `_PORT` / `_TRANSPORT` | socket endpoint |
//! | `BROKER_SOCKET_DIAL_TIMEOUT_MS` / `_DIAL_RETRY_INTERVAL_MS` | dialing |
//! | `BROKER_SOCKET_QUEUE_TIMEOUT_MS` | `broker.socket.socket_queue_timeout` |
//! | `BROKER_SOCKET_RECEIVE_TIMEOUT_MS` / `_MAX_RECEIVE_TIMEOUTS` | dead peer detection |
//! | `BROKER_SOCKET_EVENT_CHANNEL_BUFFER_SIZE` / `_CHANNEL_BUFFER_SIZE` | queues |
//! | `BROKER_SOCKET_SEND_FAILURE_POLICY` | `closed_only` or `any_error` |
//! | `BROKER_FILE_ENABLED` / `BROKER_FILE_PATH` | producer file mirror |
//! | `BROKER_BUFFER_*` | data-node file buffer |
//! | `BROKER_REPLAY_*` | replay of recorded buffer files |
//! | `BROKER_PANIC_ON_ERROR` / `BROKER_CHAIN_ID` | transactional consumer |
//! | `BROKER_HEARTBEAT_INTERVAL_MS` / `BROKER_UPGRADE_AT_HEIGHT` | core heartbeat |

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use event_buffer::{BufferConfig, BufferError, ReplayConfig};
use event_bus::BrokerConfig;
use serde::Deserialize;
use sqlstore_broker::SqlStoreConfig;
use thiserror::Error;

const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

// =============================================================================
// MODE
// =============================================================================

/// Which side of the stream this process runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    /// Producer: broker plus mirrors.
    Core,
    /// Consumer: transport, buffer, fan-out and the transactional consumer.
    Datanode,
}

impl FromStr for Mode {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "core" => Ok(Self::Core),
            "datanode" | "data-node" => Ok(Self::Datanode),
            other => Err(ConfigError::UnknownMode(other.to_string())),
        }
    }
}

impl std::fmt::Display for Mode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Core => f.write_str("core"),
            Self::Datanode => f.write_str("datanode"),
        }
    }
}

// =============================================================================
// NODE CONFIG
// =============================================================================

/// Complete node configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    /// Producer broker and its mirrors. The socket section is also the
    /// data node's listening endpoint.
    pub broker: BrokerConfig,
    pub buffer: BufferConfig,
    pub replay: ReplayConfig,
    pub sqlstore: SqlStoreConfig,
    /// Time between heartbeat blocks in core mode.
    pub heartbeat_interval: Duration,
    /// Announce a protocol upgrade after this block in core mode.
    pub upgrade_at_height: Option<u64>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            broker: BrokerConfig::default(),
            buffer: BufferConfig::default(),
            replay: ReplayConfig::default(),
            sqlstore: SqlStoreConfig::default(),
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            upgrade_at_height: None,
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {var}: {reason}")]
    InvalidValue {
        var: &'static str,
        value: String,
        reason: String,
    },

    #[error("unknown mode '{0}', expected 'core' or 'datanode'")]
    UnknownMode(String),

    #[error("invalid socket configuration: {0}")]
    Socket(String),

    #[error(transparent)]
    Buffer(#[from] BufferError),

    #[error("{0}")]
    Inconsistent(&'static str),
}

impl NodeConfig {
    /// Apply `BROKER_*` overrides read through `lookup`.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = Env(&lookup);

        // Socket
        let socket = &mut self.broker.socket;
        env.parse("BROKER_SOCKET_ENABLED", &mut socket.enabled)?;
        env.string("BROKER_SOCKET_ADDRESS", &mut socket.address);
        env.parse("BROKER_SOCKET_PORT", &mut socket.port)?;
        env.parse("BROKER_SOCKET_TRANSPORT", &mut socket.transport)?;
        env.millis("BROKER_SOCKET_DIAL_TIMEOUT_MS", &mut socket.dial_timeout)?;
        env.millis(
            "BROKER_SOCKET_DIAL_RETRY_INTERVAL_MS",
            &mut socket.dial_retry_interval,
        )?;
        env.millis("BROKER_SOCKET_QUEUE_TIMEOUT_MS", &mut socket.socket_queue_timeout)?;
        env.millis("BROKER_SOCKET_RECEIVE_TIMEOUT_MS", &mut socket.receive_timeout)?;
        env.parse(
            "BROKER_SOCKET_MAX_RECEIVE_TIMEOUTS",
            &mut socket.max_receive_timeouts,
        )?;
        env.parse(
            "BROKER_SOCKET_EVENT_CHANNEL_BUFFER_SIZE",
            &mut socket.event_channel_buffer_size,
        )?;
        env.parse(
            "BROKER_SOCKET_CHANNEL_BUFFER_SIZE",
            &mut socket.socket_channel_buffer_size,
        )?;
        env.parse(
            "BROKER_SOCKET_SEND_FAILURE_POLICY",
            &mut socket.send_failure_policy,
        )?;

        // File mirror
        env.parse("BROKER_FILE_ENABLED", &mut self.broker.file.enabled)?;
        env.path("BROKER_FILE_PATH", &mut self.broker.file.file);

        // Buffer
        let buffer = &mut self.buffer;
        env.parse("BROKER_BUFFER_ENABLED", &mut buffer.enabled)?;
        env.path("BROKER_BUFFER_DIR", &mut buffer.dir);
        env.parse("BROKER_BUFFER_EVENTS_PER_FILE", &mut buffer.events_per_file)?;
        env.parse(
            "BROKER_BUFFER_SEND_CHANNEL_BUFFER_SIZE",
            &mut buffer.send_channel_buffer_size,
        )?;
        env.parse(
            "BROKER_BUFFER_MAX_BUFFERED_EVENTS",
            &mut buffer.max_buffered_events,
        )?;
        env.parse("BROKER_BUFFER_ARCHIVE", &mut buffer.archive)?;
        env.parse(
            "BROKER_BUFFER_ARCHIVE_MAXIMUM_SIZE_BYTES",
            &mut buffer.archive_maximum_size_bytes,
        )?;

        // Replay
        let replay = &mut self.replay;
        env.parse("BROKER_REPLAY_ENABLED", &mut replay.enabled)?;
        env.path("BROKER_REPLAY_DIR", &mut replay.dir);
        env.millis(
            "BROKER_REPLAY_TIME_BETWEEN_BLOCKS_MS",
            &mut replay.time_between_blocks,
        )?;
        env.string("BROKER_REPLAY_CHAIN_ID", &mut replay.chain_id);

        // Transactional consumer
        env.parse("BROKER_PANIC_ON_ERROR", &mut self.sqlstore.panic_on_error)?;
        env.string("BROKER_CHAIN_ID", &mut self.sqlstore.chain_id);

        // Heartbeat
        env.millis("BROKER_HEARTBEAT_INTERVAL_MS", &mut self.heartbeat_interval)?;
        if let Some(raw) = lookup("BROKER_UPGRADE_AT_HEIGHT") {
            let height = parse_value("BROKER_UPGRADE_AT_HEIGHT", &raw)?;
            self.upgrade_at_height = Some(height);
        }

        Ok(())
    }

    /// Reject settings the components cannot run with in `mode`.
    pub fn validate(&self, mode: Mode) -> Result<(), ConfigError> {
        self.broker.socket.validate().map_err(ConfigError::Socket)?;
        if self.buffer.enabled {
            self.buffer.validate()?;
        }

        match mode {
            Mode::Core => {
                if self.heartbeat_interval.is_zero() {
                    return Err(ConfigError::Inconsistent(
                        "heartbeat interval must be positive",
                    ));
                }
            }
            Mode::Datanode => {
                if self.replay.enabled && self.broker.socket.enabled {
                    return Err(ConfigError::Inconsistent(
                        "replay and socket sources are mutually exclusive",
                    ));
                }
                if !self.replay.enabled && !self.broker.socket.enabled {
                    return Err(ConfigError::Inconsistent(
                        "data node needs the socket or the replay source enabled",
                    ));
                }
            }
        }
        Ok(())
    }
}

/// Build the configuration from defaults and the process environment.
pub fn load_config() -> Result<NodeConfig, ConfigError> {
    let mut config = NodeConfig::default();
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}

// =============================================================================
// ENV HELPERS
// =============================================================================

struct Env<'a, F>(&'a F);

impl<F> Env<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn string(&self, var: &'static str, field: &mut String) {
        if let Some(value) = (self.0)(var) {
            *field = value;
        }
    }

    fn path(&self, var: &'static str, field: &mut PathBuf) {
        if let Some(value) = (self.0)(var) {
            *field = PathBuf::from(value);
        }
    }

    fn parse<T>(&self, var: &'static str, field: &mut T) -> Result<(), ConfigError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(raw) = (self.0)(var) {
            *field = parse_value(var, &raw)?;
        }
        Ok(())
    }

    fn millis(&self, var: &'static str, field: &mut Duration) -> Result<(), ConfigError> {
        if let Some(raw) = (self.0)(var) {
            *field = Duration::from_millis(parse_value(var, &raw)?);
        }
        Ok(())
    }
}

fn parse_value<T>(var: &'static str, raw: &str) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    raw.trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            var,
            value: raw.to_string(),
            reason: e.to_string(),
        })
}
