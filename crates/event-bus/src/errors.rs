//! # Error Types

use event_buffer::BufferError;
use event_socket::TransportError;
use thiserror::Error;

/// Errors from the broker.
#[derive(Debug, Error)]
pub enum BrokerError {
    /// The socket mirror could not be established at startup.
    #[error("failed to connect socket mirror: {0}")]
    Connect(#[from] TransportError),

    /// The file mirror could not be opened at startup.
    #[error("failed to open file mirror: {0}")]
    FileMirror(#[from] BufferError),

    /// A mirror rejected a batch. Downstream processes would observe a gap,
    /// so the broker's fatal signal has been raised.
    #[error("streaming mirror failed, downstream consumers would miss events: {0}")]
    StreamingFailed(String),
}
