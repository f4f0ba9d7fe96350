//! # Consumer Configuration

use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SqlStoreConfig {
    /// A failed subscriber push stops the consumer instead of being logged.
    pub panic_on_error: bool,

    /// Chain reported to the block-committed hook. Empty means "take it from
    /// the events".
    pub chain_id: String,
}
