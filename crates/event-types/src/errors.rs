//! # Error Types
//!
//! Errors shared by every component that reads events.

use thiserror::Error;

use crate::types::EventType;

/// Errors from encoding or decoding the wire envelope.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("failed to encode event: {0}")]
    Encode(String),

    #[error("failed to decode event: {0}")]
    Decode(String),

    /// The writer runs a different protocol version. Never tolerated.
    #[error("protocol version mismatch: received {received}, expected {expected}")]
    VersionMismatch { received: u32, expected: u32 },

    /// The envelope's declared type does not match its payload.
    #[error("event type mismatch: envelope declares {envelope}, payload is {payload}")]
    TypeMismatch {
        envelope: EventType,
        payload: EventType,
    },
}

/// Errors building a [`crate::Block`] from a begin-block event.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BlockError {
    #[error("expected a BeginBlock event, got {0}")]
    NotBeginBlock(EventType),

    #[error("trace ID {trace_id} is not a hex block hash")]
    InvalidHash { trace_id: String },

    #[error("block timestamp {0} is out of range")]
    InvalidTimestamp(i64),

    #[error("block height {0} does not fit a signed 64-bit height")]
    HeightOutOfRange(u64),
}

/// Errors surfaced by an event source to its consumer.
///
/// Cloned once per fan-out output.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Connection-level failure (dial, accept, read).
    #[error("transport failure: {0}")]
    Transport(String),

    /// Peer stopped sending for longer than the configured threshold.
    #[error("peer considered dead after {timeouts} consecutive receive timeouts")]
    DeadPeer { timeouts: u32 },

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// Upstream ordering guarantee broken.
    #[error(
        "non-contiguous event sequence in block {block_nr}: last {last}, received {received}"
    )]
    NonContiguousSequence {
        block_nr: i64,
        last: u64,
        received: u64,
    },

    #[error("chain ID mismatch: expected {expected}, event carries {actual}")]
    ChainIdMismatch { expected: String, actual: String },

    /// Buffer file I/O failure.
    #[error("event buffer failure: {0}")]
    Buffer(String),

    #[error("fan-out source expects {expected} subscribers, no more may register")]
    TooManySubscribers { expected: usize },

    #[error("event source can only be received from once")]
    AlreadyReceiving,
}
