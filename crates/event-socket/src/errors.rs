//! # Error Types

use std::time::Duration;

use event_types::{EnvelopeError, SourceError};
use thiserror::Error;

/// Socket transport failures.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The peer never became reachable within the dial timeout.
    #[error("could not connect to {endpoint} within {timeout:?}: {reason}")]
    DialTimeout {
        endpoint: String,
        timeout: Duration,
        reason: String,
    },

    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        endpoint: String,
        #[source]
        source: std::io::Error,
    },

    /// The outbound queue stayed full for the whole queue timeout.
    #[error("outbound queue full for {timeout:?}, event not sent")]
    QueueFull { timeout: Duration },

    /// The send loop has stopped; nothing more can be sent.
    #[error("socket connection closed")]
    Closed,

    /// Cancelled while waiting.
    #[error("socket operation cancelled")]
    Cancelled,

    /// Too many consecutive receive timeouts.
    #[error("peer considered dead after {timeouts} consecutive receive timeouts")]
    DeadPeer { timeouts: u32 },

    #[error("unix sockets are not supported on this platform")]
    UnsupportedTransport,

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    #[error("socket I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<TransportError> for SourceError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::DeadPeer { timeouts } => SourceError::DeadPeer { timeouts },
            TransportError::Envelope(e) => SourceError::Envelope(e),
            other => SourceError::Transport(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversion_keeps_dead_peer() {
        let err: SourceError = TransportError::DeadPeer { timeouts: 4 }.into();
        assert_eq!(err, SourceError::DeadPeer { timeouts: 4 });

        let err: SourceError = TransportError::Closed.into();
        assert!(matches!(err, SourceError::Transport(msg) if msg.contains("closed")));
    }
}
