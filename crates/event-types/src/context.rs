//! # Trace Context
//!
//! Identifies the block (and transaction) an event was produced in.

use serde::{Deserialize, Serialize};

/// The block-scoped context every event is created from.
///
/// `trace_id` groups all events produced while processing one block and is
/// the key the sequence generator counts under.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceContext {
    /// Identifier of the originating block (hex-encoded block hash).
    pub trace_id: String,
    /// Height of the originating block.
    pub block_nr: i64,
    /// Chain the block belongs to.
    pub chain_id: String,
    /// Hash of the transaction being processed, empty outside a transaction.
    pub tx_hash: String,
}

impl TraceContext {
    /// Create a context for the given trace ID.
    #[must_use]
    pub fn new(trace_id: impl Into<String>) -> Self {
        Self {
            trace_id: trace_id.into(),
            ..Self::default()
        }
    }

    /// Set the block height.
    #[must_use]
    pub fn with_block_nr(mut self, block_nr: i64) -> Self {
        self.block_nr = block_nr;
        self
    }

    /// Set the chain ID.
    #[must_use]
    pub fn with_chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = chain_id.into();
        self
    }

    /// Set the transaction hash.
    #[must_use]
    pub fn with_tx_hash(mut self, tx_hash: impl Into<String>) -> Self {
        self.tx_hash = tx_hash.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let ctx = TraceContext::new("abcd")
            .with_block_nr(7)
            .with_chain_id("testchain")
            .with_tx_hash("tx");
        assert_eq!(ctx.trace_id, "abcd");
        assert_eq!(ctx.block_nr, 7);
        assert_eq!(ctx.chain_id, "testchain");
        assert_eq!(ctx.tx_hash, "tx");
    }
}
