//! # Socket Configuration

use std::time::Duration;

use serde::Deserialize;

// =============================================================================
// Defaults
// =============================================================================

const DEFAULT_ADDRESS: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3005;
const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(120);
const DEFAULT_DIAL_RETRY_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_SOCKET_QUEUE_TIMEOUT: Duration = Duration::from_secs(3);
const DEFAULT_EVENT_CHANNEL_BUFFER_SIZE: usize = 10_000;
const DEFAULT_SOCKET_CHANNEL_BUFFER_SIZE: usize = 1_000;
const DEFAULT_MAX_RECEIVE_TIMEOUTS: u32 = 3;
const DEFAULT_RECEIVE_TIMEOUT: Duration = Duration::from_secs(60);

/// Underlying stream kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// `address:port`.
    #[default]
    Tcp,
    /// Socket path at `address`.
    Unix,
}

impl std::str::FromStr for TransportKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "tcp" => Ok(Self::Tcp),
            "unix" | "ipc" => Ok(Self::Unix),
            other => Err(format!("unknown transport '{other}'")),
        }
    }
}

/// Which write failures stop the client's send loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendFailurePolicy {
    /// Only errors meaning the connection is gone.
    #[default]
    ClosedOnly,
    /// Every write error.
    AnyError,
}

impl SendFailurePolicy {
    /// Whether `error` stops the send loop under this policy.
    #[must_use]
    pub fn is_fatal(self, error: &std::io::Error) -> bool {
        use std::io::ErrorKind;

        match self {
            Self::AnyError => true,
            Self::ClosedOnly => matches!(
                error.kind(),
                ErrorKind::BrokenPipe
                    | ErrorKind::ConnectionReset
                    | ErrorKind::ConnectionAborted
                    | ErrorKind::NotConnected
                    | ErrorKind::UnexpectedEof
                    | ErrorKind::WriteZero
            ),
        }
    }
}

impl std::str::FromStr for SendFailurePolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "closed_only" | "closed-only" => Ok(Self::ClosedOnly),
            "any_error" | "any-error" | "any" => Ok(Self::AnyError),
            other => Err(format!("unknown send failure policy '{other}'")),
        }
    }
}

/// Socket transport configuration, shared by client and server.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SocketConfig {
    pub enabled: bool,

    /// Host for TCP, socket path for Unix.
    pub address: String,

    pub port: u16,

    pub transport: TransportKind,

    /// Give up dialing after this long.
    pub dial_timeout: Duration,

    /// Upper bound of the wait between dial attempts.
    pub dial_retry_interval: Duration,

    /// Longest a sender waits for room in the outbound queue.
    pub socket_queue_timeout: Duration,

    /// Server-side channel between the socket reader and its consumer.
    pub event_channel_buffer_size: usize,

    /// Client-side outbound queue.
    pub socket_channel_buffer_size: usize,

    /// Consecutive receive timeouts tolerated before the peer is dead.
    pub max_receive_timeouts: u32,

    /// How long one receive may wait for a frame.
    pub receive_timeout: Duration,

    pub send_failure_policy: SendFailurePolicy,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: DEFAULT_ADDRESS.to_string(),
            port: DEFAULT_PORT,
            transport: TransportKind::Tcp,
            dial_timeout: DEFAULT_DIAL_TIMEOUT,
            dial_retry_interval: DEFAULT_DIAL_RETRY_INTERVAL,
            socket_queue_timeout: DEFAULT_SOCKET_QUEUE_TIMEOUT,
            event_channel_buffer_size: DEFAULT_EVENT_CHANNEL_BUFFER_SIZE,
            socket_channel_buffer_size: DEFAULT_SOCKET_CHANNEL_BUFFER_SIZE,
            max_receive_timeouts: DEFAULT_MAX_RECEIVE_TIMEOUTS,
            receive_timeout: DEFAULT_RECEIVE_TIMEOUT,
            send_failure_policy: SendFailurePolicy::ClosedOnly,
        }
    }
}

impl SocketConfig {
    /// Human-readable endpoint for logs and errors.
    #[must_use]
    pub fn endpoint(&self) -> String {
        match self.transport {
            TransportKind::Tcp => format!("{}:{}", self.address, self.port),
            TransportKind::Unix => format!("unix://{}", self.address),
        }
    }

    /// Reject settings the transport cannot run with.
    pub fn validate(&self) -> Result<(), String> {
        if self.address.is_empty() {
            return Err("socket address must not be empty".into());
        }
        if self.transport == TransportKind::Tcp && self.port == 0 && self.enabled {
            return Err("socket port must not be 0".into());
        }
        if self.socket_channel_buffer_size == 0 || self.event_channel_buffer_size == 0 {
            return Err("socket channel buffer sizes must be positive".into());
        }
        if self.receive_timeout.is_zero() {
            return Err("receive timeout must be positive".into());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error, ErrorKind};

    #[test]
    fn test_default_config() {
        let config = SocketConfig::default();
        assert!(!config.enabled);
        assert_eq!(config.endpoint(), "127.0.0.1:3005");
        assert_eq!(config.send_failure_policy, SendFailurePolicy::ClosedOnly);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unix_endpoint() {
        let config = SocketConfig {
            transport: TransportKind::Unix,
            address: "/tmp/events.sock".into(),
            ..Default::default()
        };
        assert_eq!(config.endpoint(), "unix:///tmp/events.sock");
    }

    #[test]
    fn test_policy_classification() {
        let closed = Error::new(ErrorKind::BrokenPipe, "pipe");
        let other = Error::new(ErrorKind::Other, "hiccup");

        assert!(SendFailurePolicy::ClosedOnly.is_fatal(&closed));
        assert!(!SendFailurePolicy::ClosedOnly.is_fatal(&other));
        assert!(SendFailurePolicy::AnyError.is_fatal(&other));
    }

    #[test]
    fn test_parse_kinds() {
        assert_eq!("TCP".parse::<TransportKind>().unwrap(), TransportKind::Tcp);
        assert_eq!("ipc".parse::<TransportKind>().unwrap(), TransportKind::Unix);
        assert!("udp".parse::<TransportKind>().is_err());
        assert_eq!(
            "any_error".parse::<SendFailurePolicy>().unwrap(),
            SendFailurePolicy::AnyError
        );
    }

    #[test]
    fn test_validate_rejects_empty_address() {
        let config = SocketConfig {
            address: String::new(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
