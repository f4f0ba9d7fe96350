//! # In-Memory Adapters
//!
//! Process-local implementations of every outbound port. Used by the
//! `broker-node` data-node mode and by tests; nothing survives a restart.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use event_types::{Block, Event, EventType};
use parking_lot::Mutex;
use tracing::debug;

use crate::errors::StoreError;
use crate::ports::{BlockStore, ProtocolUpgradeHandler, SqlBrokerSubscriber, TransactionManager};

// =============================================================================
// TRANSACTIONS
// =============================================================================

/// Transaction call recorded by [`InMemoryTransactionManager`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxOp {
    Begin,
    Commit,
    Rollback,
}

/// Records transaction boundaries and enforces that they nest correctly.
#[derive(Debug, Default)]
pub struct InMemoryTransactionManager {
    ops: Mutex<Vec<TxOp>>,
    open: AtomicBool,
}

impl InMemoryTransactionManager {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn ops(&self) -> Vec<TxOp> {
        self.ops.lock().clone()
    }

    #[must_use]
    pub fn commits(&self) -> usize {
        self.ops.lock().iter().filter(|op| **op == TxOp::Commit).count()
    }

    #[must_use]
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    fn close(&self, op: TxOp) -> Result<(), StoreError> {
        if !self.open.swap(false, Ordering::AcqRel) {
            return Err(StoreError::new(format!("{op:?} without an open transaction")));
        }
        self.ops.lock().push(op);
        Ok(())
    }
}

#[async_trait]
impl TransactionManager for InMemoryTransactionManager {
    async fn begin(&self) -> Result<(), StoreError> {
        if self.open.swap(true, Ordering::AcqRel) {
            return Err(StoreError::new("transaction already open"));
        }
        self.ops.lock().push(TxOp::Begin);
        Ok(())
    }

    async fn commit(&self) -> Result<(), StoreError> {
        self.close(TxOp::Commit)
    }

    async fn rollback(&self) -> Result<(), StoreError> {
        self.close(TxOp::Rollback)
    }
}

// =============================================================================
// BLOCKS
// =============================================================================

/// Blocks in the order they were added.
#[derive(Debug, Default)]
pub struct InMemoryBlockStore {
    blocks: Mutex<Vec<Block>>,
}

impl InMemoryBlockStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that has already committed `blocks`.
    #[must_use]
    pub fn with_blocks(blocks: Vec<Block>) -> Self {
        Self {
            blocks: Mutex::new(blocks),
        }
    }

    #[must_use]
    pub fn blocks(&self) -> Vec<Block> {
        self.blocks.lock().clone()
    }

    #[must_use]
    pub fn heights(&self) -> Vec<i64> {
        self.blocks.lock().iter().map(|b| b.height).collect()
    }
}

#[async_trait]
impl BlockStore for InMemoryBlockStore {
    async fn add(&self, block: &Block) -> Result<(), StoreError> {
        self.blocks.lock().push(block.clone());
        Ok(())
    }

    async fn last_block(&self) -> Result<Option<Block>, StoreError> {
        Ok(self.blocks.lock().last().cloned())
    }
}

// =============================================================================
// PROTOCOL UPGRADE
// =============================================================================

/// Remembers that an upgrade was announced.
#[derive(Debug, Default)]
pub struct ProtocolUpgradeFlag {
    started: AtomicBool,
    last_block_height: AtomicU64,
}

impl ProtocolUpgradeFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn started(&self) -> bool {
        self.started.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn last_block_height(&self) -> u64 {
        self.last_block_height.load(Ordering::Acquire)
    }
}

#[async_trait]
impl ProtocolUpgradeHandler for ProtocolUpgradeFlag {
    async fn on_protocol_upgrade(&self, last_block_height: u64) -> Result<(), StoreError> {
        self.last_block_height
            .store(last_block_height, Ordering::Release);
        self.started.store(true, Ordering::Release);
        Ok(())
    }
}

// =============================================================================
// EVENT TABLE
// =============================================================================

/// Subscriber that stages events per block and keeps what was flushed.
#[derive(Debug)]
pub struct InMemoryEventTable {
    types: Vec<EventType>,
    vega_time: Mutex<Option<DateTime<Utc>>>,
    pending: Mutex<Vec<Arc<Event>>>,
    flushed: Mutex<Vec<Arc<Event>>>,
    flushes: AtomicU64,
}

impl InMemoryEventTable {
    #[must_use]
    pub fn new(types: Vec<EventType>) -> Self {
        Self {
            types,
            vega_time: Mutex::new(None),
            pending: Mutex::new(Vec::new()),
            flushed: Mutex::new(Vec::new()),
            flushes: AtomicU64::new(0),
        }
    }

    /// Interested in every event type.
    #[must_use]
    pub fn all() -> Self {
        Self::new(vec![EventType::All])
    }

    #[must_use]
    pub fn vega_time(&self) -> Option<DateTime<Utc>> {
        *self.vega_time.lock()
    }

    /// Pushed but not yet flushed.
    #[must_use]
    pub fn pending(&self) -> Vec<Arc<Event>> {
        self.pending.lock().clone()
    }

    #[must_use]
    pub fn flushed(&self) -> Vec<Arc<Event>> {
        self.flushed.lock().clone()
    }

    #[must_use]
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Acquire)
    }

    /// Flushed event counts per type.
    #[must_use]
    pub fn counts(&self) -> BTreeMap<EventType, usize> {
        let mut counts = BTreeMap::new();
        for event in self.flushed.lock().iter() {
            *counts.entry(event.event_type()).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl SqlBrokerSubscriber for InMemoryEventTable {
    fn types(&self) -> Vec<EventType> {
        self.types.clone()
    }

    fn set_vega_time(&self, time: DateTime<Utc>) {
        *self.vega_time.lock() = Some(time);
    }

    async fn push(&self, event: Arc<Event>) -> Result<(), StoreError> {
        self.pending.lock().push(event);
        Ok(())
    }

    async fn flush(&self) -> Result<(), StoreError> {
        let pending = std::mem::take(&mut *self.pending.lock());
        debug!(events = pending.len(), "Flushing event table");
        self.flushed.lock().extend(pending);
        self.flushes.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }
}
