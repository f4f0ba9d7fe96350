//! # Block-Transactional Consumer
//!
//! Turns the ordered event stream into one storage transaction per block.
//!
//! ```text
//!  waiting ──BeginBlock(h > last committed)──▶ collecting ──EndBlock──▶ committed
//!                                                 ▲   │                    │
//!                                                 │   └─ProtocolUpgrade──▶ stop
//!                                                 └──────BeginBlock────────┘
//! ```
//!
//! `ProtocolUpgradeStarted` is accepted inside a block, which it commits, or
//! between `EndBlock` and the next `BeginBlock`, where the core announces it.
//!
//! ## Recovery
//!
//! On start the last committed block is read from the block store. Events are
//! discarded until a `BeginBlock` past it arrives; blocks at or below it were
//! already applied. A `BeginBlock` more than one past it means events were
//! lost and is fatal.
//!
//! ## Failure
//!
//! Upstream errors, cancellation, flush failures and (with `panic_on_error`)
//! push failures stop the consumer. An open transaction is rolled back first.

use std::collections::HashMap;
use std::sync::Arc;

use event_types::{Block, Event, EventPayload, EventReceiver, EventStream, EventType};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::config::SqlStoreConfig;
use crate::errors::SqlStoreError;
use crate::ports::{
    BlockCommittedHook, BlockStore, ProtocolUpgradeHandler, SqlBrokerSubscriber,
    TransactionManager,
};


/// A block whose `BeginBlock` has been received but not yet processed.
#[derive(Debug, Clone)]
struct PendingBlock {
    block: Block,
    chain_id: String,
}

impl PendingBlock {
    fn from_event(event: &Event) -> Result<Self, SqlStoreError> {
        Ok(Self {
            block: Block::from_begin_block(event)?,
            chain_id: event.chain_id().to_string(),
        })
    }
}

/// Whether the current block's transaction is still open.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Collecting,
    Committed,
}

/// Consumes an event source block by block.
pub struct SqlStoreBroker<S> {
    config: SqlStoreConfig,
    source: S,
    transactions: Arc<dyn TransactionManager>,
    blocks: Arc<dyn BlockStore>,
    upgrade: Arc<dyn ProtocolUpgradeHandler>,
    subscribers: Vec<Arc<dyn SqlBrokerSubscriber>>,
    routes: HashMap<EventType, Vec<Arc<dyn SqlBrokerSubscriber>>>,
    on_block_committed: BlockCommittedHook,
}

impl<S: EventReceiver> SqlStoreBroker<S> {
    pub fn new(
        config: SqlStoreConfig,
        source: S,
        transactions: Arc<dyn TransactionManager>,
        blocks: Arc<dyn BlockStore>,
        upgrade: Arc<dyn ProtocolUpgradeHandler>,
    ) -> Self {
        Self {
            config,
            source,
            transactions,
            blocks,
            upgrade,
            subscribers: Vec::new(),
            routes: HashMap::new(),
            on_block_committed: Arc::new(|_: &str, _: i64, _: bool| {}),
        }
    }

    #[must_use]
    pub fn with_subscribers(
        mut self,
        subscribers: impl IntoIterator<Item = Arc<dyn SqlBrokerSubscriber>>,
    ) -> Self {
        for subscriber in subscribers {
            self.add_subscriber(subscriber);
        }
        self
    }

    #[must_use]
    pub fn with_block_committed_hook(mut self, hook: BlockCommittedHook) -> Self {
        self.on_block_committed = hook;
        self
    }

    pub fn add_subscriber(&mut self, subscriber: Arc<dyn SqlBrokerSubscriber>) {
        for ty in EventType::expand(&subscriber.types()) {
            self.routes.entry(ty).or_default().push(Arc::clone(&subscriber));
        }
        self.subscribers.push(subscriber);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Run until the source fails, `cancel` fires or a protocol upgrade
    /// completes. `Ok(())` only for the upgrade.
    pub async fn receive(&self, cancel: CancellationToken) -> Result<(), SqlStoreError> {
        self.source.listen().await?;
        let mut stream = self.source.receive(cancel.clone());

        let mut next = self.wait_for_first_block(&mut stream, &cancel).await?;
        info!(height = next.block.height, "Transactional consumer starting");
        loop {
            match self.process_block(next, &mut stream, &cancel).await? {
                Some(block) => next = block,
                None => return Ok(()),
            }
        }
    }

    async fn wait_for_first_block(
        &self,
        stream: &mut EventStream,
        cancel: &CancellationToken,
    ) -> Result<PendingBlock, SqlStoreError> {
        let last = self
            .blocks
            .last_block()
            .await
            .map_err(SqlStoreError::BlockStore)?;
        if let Some(last) = &last {
            info!(last_committed = last.height, "Resuming after last committed block");
        }

        loop {
            let event = next_event(stream, cancel).await?;
            if event.event_type() != EventType::BeginBlock {
                trace!(event_type = %event.event_type(), "Discarding event ahead of first block");
                continue;
            }

            let pending = PendingBlock::from_event(&event)?;
            let Some(last) = &last else {
                return Ok(pending);
            };
            let height = pending.block.height;
            if height <= last.height {
                debug!(height, "Skipping already committed block");
            } else if height == last.height + 1 {
                return Ok(pending);
            } else {
                return Err(SqlStoreError::BlockTooFarAhead {
                    last_committed: last.height,
                    received: height,
                });
            }
        }
    }

    /// Process one block. Returns the next block, or `None` after a protocol
    /// upgrade.
    async fn process_block(
        &self,
        pending: PendingBlock,
        stream: &mut EventStream,
        cancel: &CancellationToken,
    ) -> Result<Option<PendingBlock>, SqlStoreError> {
        for subscriber in &self.subscribers {
            subscriber.set_vega_time(pending.block.vega_time);
        }
        self.transactions
            .begin()
            .await
            .map_err(|source| SqlStoreError::Transaction {
                action: "begin",
                source,
            })?;

        let mut phase = Phase::Collecting;
        let result = self
            .collect_block(&pending, &mut phase, stream, cancel)
            .await;

        if result.is_err() && phase == Phase::Collecting {
            if let Err(e) = self.transactions.rollback().await {
                error!(height = pending.block.height, error = %e, "Rollback failed");
            } else {
                warn!(height = pending.block.height, "Rolled back block transaction");
            }
        }
        result
    }

    async fn collect_block(
        &self,
        pending: &PendingBlock,
        phase: &mut Phase,
        stream: &mut EventStream,
        cancel: &CancellationToken,
    ) -> Result<Option<PendingBlock>, SqlStoreError> {
        let height = pending.block.height;
        self.blocks
            .add(&pending.block)
            .await
            .map_err(SqlStoreError::BlockStore)?;

        let mut snapshot_taken = false;
        loop {
            let event = next_event(stream, cancel).await?;

            if *phase == Phase::Committed {
                return match event.payload() {
                    EventPayload::BeginBlock(_) => PendingBlock::from_event(&event).map(Some),
                    // Announced ahead of the next block; nothing left to commit.
                    EventPayload::ProtocolUpgradeStarted(upgrade) => {
                        self.stop_for_upgrade(height, upgrade.last_block_height)
                            .await
                            .map(|()| None)
                    }
                    _ => Err(SqlStoreError::UnexpectedEventAfterEndBlock {
                        event_type: event.event_type(),
                        height,
                    }),
                };
            }

            match event.payload() {
                EventPayload::EndBlock(_) => {
                    self.commit(phase).await?;
                    debug!(height, snapshot_taken, "Block committed");
                    let chain_id = if self.config.chain_id.is_empty() {
                        pending.chain_id.as_str()
                    } else {
                        self.config.chain_id.as_str()
                    };
                    (self.on_block_committed)(chain_id, height, snapshot_taken);
                }
                EventPayload::ProtocolUpgradeStarted(upgrade) => {
                    self.commit(phase).await?;
                    self.stop_for_upgrade(height, upgrade.last_block_height).await?;
                    return Ok(None);
                }
                EventPayload::CoreSnapshot(_) => {
                    snapshot_taken = true;
                    self.push(Arc::clone(&event)).await?;
                }
                _ => self.push(Arc::clone(&event)).await?,
            }
        }
    }

    async fn stop_for_upgrade(
        &self,
        height: i64,
        last_block_height: u64,
    ) -> Result<(), SqlStoreError> {
        info!(height, last_block_height, "Protocol upgrade started, consumer stopping");
        self.upgrade
            .on_protocol_upgrade(last_block_height)
            .await
            .map_err(SqlStoreError::ProtocolUpgrade)
    }

    async fn commit(&self, phase: &mut Phase) -> Result<(), SqlStoreError> {
        for subscriber in &self.subscribers {
            subscriber.flush().await.map_err(SqlStoreError::Flush)?;
        }
        self.transactions
            .commit()
            .await
            .map_err(|source| SqlStoreError::Transaction {
                action: "commit",
                source,
            })?;
        *phase = Phase::Committed;
        Ok(())
    }

    async fn push(&self, event: Arc<Event>) -> Result<(), SqlStoreError> {
        let event_type = event.event_type();
        let Some(subscribers) = self.routes.get(&event_type) else {
            return Ok(());
        };
        for subscriber in subscribers {
            if let Err(source) = subscriber.push(Arc::clone(&event)).await {
                if self.config.panic_on_error {
                    return Err(SqlStoreError::Push { event_type, source });
                }
                warn!(%event_type, sequence = event.sequence(), error = %source, "Subscriber push failed");
            }
        }
        Ok(())
    }
}

async fn next_event(
    stream: &mut EventStream,
    cancel: &CancellationToken,
) -> Result<Arc<Event>, SqlStoreError> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(SqlStoreError::Cancelled),
        item = stream.recv() => match item {
            Some(Ok(event)) => Ok(event),
            Some(Err(e)) => Err(e.into()),
            None => Err(SqlStoreError::SourceClosed),
        },
    }
}
