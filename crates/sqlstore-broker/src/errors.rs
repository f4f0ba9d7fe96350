//! # Error Types

use event_types::{BlockError, EventType, SourceError};
use thiserror::Error;

/// Failure reported by a storage collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct StoreError(pub String);

impl StoreError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Why the block-transactional consumer stopped.
#[derive(Debug, Error)]
pub enum SqlStoreError {
    /// The event source reported an error.
    #[error("event source failed: {0}")]
    Source(#[from] SourceError),

    #[error("event source closed")]
    SourceClosed,

    #[error("consumer cancelled")]
    Cancelled,

    /// The stream resumed beyond the next uncommitted block.
    #[error("received block {received} but the last committed block is {last_committed}")]
    BlockTooFarAhead { last_committed: i64, received: i64 },

    /// Only a `BeginBlock` may follow an `EndBlock`.
    #[error("unexpected {event_type} event after end of block {height}")]
    UnexpectedEventAfterEndBlock { event_type: EventType, height: i64 },

    #[error(transparent)]
    Block(#[from] BlockError),

    #[error("failed to {action} transaction: {source}")]
    Transaction {
        action: &'static str,
        #[source]
        source: StoreError,
    },

    #[error("block store failed: {0}")]
    BlockStore(#[source] StoreError),

    #[error("failed to push {event_type} event: {source}")]
    Push {
        event_type: EventType,
        #[source]
        source: StoreError,
    },

    #[error("failed to flush subscriber: {0}")]
    Flush(#[source] StoreError),

    #[error("protocol upgrade handler failed: {0}")]
    ProtocolUpgrade(#[source] StoreError),
}

impl SqlStoreError {
    /// Stops that are not failures of the pipeline itself.
    #[must_use]
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
