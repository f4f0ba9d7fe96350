//! # Outbound Ports (Driven Ports)
//!
//! What the block-transactional consumer needs from the host application.
//!
//! Production: relational storage adapters owned by the data node.
//! Testing and local runs: the in-memory adapters in `crate::adapters`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_types::{Block, Event, EventType};

use crate::errors::StoreError;

/// Block-scoped storage transaction.
///
/// At most one transaction is open at a time; the consumer always closes it
/// with `commit` or `rollback` before calling `begin` again.
#[async_trait]
pub trait TransactionManager: Send + Sync {
    async fn begin(&self) -> Result<(), StoreError>;

    async fn commit(&self) -> Result<(), StoreError>;

    async fn rollback(&self) -> Result<(), StoreError>;
}

/// Durable record of processed blocks; the resume bookmark after a restart.
#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Record a block inside the open transaction.
    async fn add(&self, block: &Block) -> Result<(), StoreError>;

    /// The last block recorded, `None` on a fresh store.
    async fn last_block(&self) -> Result<Option<Block>, StoreError>;
}

/// A storage writer fed with the events of the types it declares.
#[async_trait]
pub trait SqlBrokerSubscriber: Send + Sync {
    /// Interest. Empty or containing `All` means every type.
    fn types(&self) -> Vec<EventType>;

    /// Time of the block about to be processed.
    fn set_vega_time(&self, time: DateTime<Utc>);

    async fn push(&self, event: Arc<Event>) -> Result<(), StoreError>;

    /// Write out anything buffered for the current block.
    async fn flush(&self) -> Result<(), StoreError>;
}

/// Reacts to the producer announcing a protocol upgrade.
#[async_trait]
pub trait ProtocolUpgradeHandler: Send + Sync {
    /// Called after the final block before the upgrade is committed.
    async fn on_protocol_upgrade(&self, last_block_height: u64) -> Result<(), StoreError>;
}

/// Called after every block commit with `(chain_id, height, snapshot_taken)`.
pub type BlockCommittedHook = Arc<dyn Fn(&str, i64, bool) + Send + Sync>;
