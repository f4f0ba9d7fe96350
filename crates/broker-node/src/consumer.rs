//! # Data Node Pipeline
//!
//! ```text
//!  SocketServer ──▶ [BufferedEventSource] ──▶ DecodingSource ─┐
//!                                                             ├──▶ FanOutEventSource ──┬──▶ SqlStoreBroker
//!  BufferFilesEventSource (replay) ───────────────────────────┘                        └──▶ progress log
//! ```
//!
//! The fan-out holds the stream back until both consumers are receiving, and
//! validates sequence continuity once for both.

use std::net::SocketAddr;
use std::sync::Arc;

use event_buffer::{BufferError, BufferFilesEventSource, BufferedEventSource, FanOutEventSource};
use event_socket::{DecodingSource, SocketServer};
use event_types::{EventPayload, EventReceiver, RawEventReceiver};
use sqlstore_broker::{
    adapters::{
        InMemoryBlockStore, InMemoryEventTable, InMemoryTransactionManager, ProtocolUpgradeFlag,
    },
    SqlBrokerSubscriber, SqlStoreBroker, SqlStoreError,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::NodeConfig;

/// Consumers attached to the fan-out: the transactional consumer and the
/// progress observer.
const FAN_OUT_CONSUMERS: usize = 2;

type Pipeline = FanOutEventSource<Arc<dyn EventReceiver>>;

#[derive(Debug, Error)]
pub enum DataNodeError {
    #[error("failed to set up the event buffer: {0}")]
    Buffer(#[from] BufferError),

    #[error(transparent)]
    Consumer(#[from] SqlStoreError),
}

/// How the data node stopped without failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataNodeExit {
    /// The producer announced a protocol upgrade after this block.
    Upgrade { last_block_height: u64 },
    Cancelled,
}

/// The assembled consumer side with in-memory storage.
pub struct DataNode {
    consumer: SqlStoreBroker<Arc<Pipeline>>,
    pipeline: Arc<Pipeline>,
    server: Option<Arc<SocketServer>>,
    transactions: Arc<InMemoryTransactionManager>,
    blocks: Arc<InMemoryBlockStore>,
    upgrade: Arc<ProtocolUpgradeFlag>,
    events: Arc<InMemoryEventTable>,
}

impl DataNode {
    /// Wire the pipeline described by `config`. Nothing is bound until
    /// [`DataNode::run`].
    pub fn build(config: &NodeConfig) -> Result<Self, DataNodeError> {
        let (source, server): (Arc<dyn EventReceiver>, Option<Arc<SocketServer>>) =
            if config.replay.enabled {
                info!(dir = %config.replay.dir.display(), "Replaying recorded buffer files");
                let replay = BufferFilesEventSource::new(config.replay.clone());
                (Arc::new(replay) as Arc<dyn EventReceiver>, None)
            } else {
                let server = Arc::new(SocketServer::new(config.broker.socket.clone()));
                let mut raw: Arc<dyn RawEventReceiver> = server.clone();
                if config.buffer.enabled {
                    info!(
                        dir = %config.buffer.dir.display(),
                        archive = config.buffer.archive,
                        "Buffering events to disk"
                    );
                    raw = Arc::new(BufferedEventSource::new(raw, config.buffer.clone())?);
                }
                let decoded = DecodingSource::new(raw);
                (Arc::new(decoded) as Arc<dyn EventReceiver>, Some(server))
            };

        let pipeline = Arc::new(FanOutEventSource::new(source, FAN_OUT_CONSUMERS));
        let transactions = Arc::new(InMemoryTransactionManager::new());
        let blocks = Arc::new(InMemoryBlockStore::new());
        let upgrade = Arc::new(ProtocolUpgradeFlag::new());
        let events = Arc::new(InMemoryEventTable::all());

        let consumer = SqlStoreBroker::new(
            config.sqlstore.clone(),
            Arc::clone(&pipeline),
            transactions.clone(),
            blocks.clone(),
            upgrade.clone(),
        )
        .with_subscribers([events.clone() as Arc<dyn SqlBrokerSubscriber>])
        .with_block_committed_hook(Arc::new(
            |chain_id: &str, height: i64, snapshot_taken: bool| {
                debug!(chain_id, height, snapshot_taken, "Block committed");
            },
        ));

        Ok(Self {
            consumer,
            pipeline,
            server,
            transactions,
            blocks,
            upgrade,
            events,
        })
    }

    /// Run until the consumer stops. Cancellation and a protocol upgrade are
    /// clean exits.
    pub async fn run(&self, cancel: CancellationToken) -> Result<DataNodeExit, DataNodeError> {
        let observer_cancel = cancel.child_token();
        let observer = tokio::spawn(observe(
            Arc::clone(&self.pipeline),
            observer_cancel.clone(),
        ));

        let result = self.consumer.receive(cancel).await;
        observer_cancel.cancel();
        if let Err(e) = observer.await {
            warn!(error = %e, "Progress observer task failed");
        }

        match result {
            Ok(()) => Ok(DataNodeExit::Upgrade {
                last_block_height: self.upgrade.last_block_height(),
            }),
            Err(e) if e.is_shutdown() => Ok(DataNodeExit::Cancelled),
            Err(e) => Err(e.into()),
        }
    }

    /// Bound socket address once the server is listening.
    #[must_use]
    pub fn socket_addr(&self) -> Option<SocketAddr> {
        self.server.as_ref().and_then(|server| server.local_addr())
    }

    #[must_use]
    pub fn transactions(&self) -> &InMemoryTransactionManager {
        &self.transactions
    }

    #[must_use]
    pub fn blocks(&self) -> &InMemoryBlockStore {
        &self.blocks
    }

    #[must_use]
    pub fn events(&self) -> &InMemoryEventTable {
        &self.events
    }
}

/// Log block progress from the second fan-out output.
async fn observe(pipeline: Arc<Pipeline>, cancel: CancellationToken) {
    if let Err(e) = pipeline.listen().await {
        warn!(error = %e, "Progress observer could not listen");
        return;
    }
    let mut stream = pipeline.receive(cancel.clone());
    let mut block_events = 0u64;
    loop {
        let item = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            item = stream.recv() => match item {
                Some(item) => item,
                None => return,
            },
        };
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                debug!(error = %e, "Progress observer stopped");
                return;
            }
        };
        block_events += event.composite_count();
        if let EventPayload::EndBlock(end) = event.payload() {
            info!(height = end.height, events = block_events, "Block received");
            block_events = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_buffer::FileSink;
    use event_types::{Asset, BeginBlock, EndBlock, Event, EventType, ProtocolUpgradeStarted, TraceContext};
    use std::time::Duration;

    fn block_events(height: u64, last: EventPayload) -> Vec<Event> {
        let trace = hex::encode_upper(height.to_be_bytes());
        let ctx = TraceContext::new(trace.clone())
            .with_block_nr(height as i64)
            .with_chain_id("replay-chain");
        vec![
            Event::new(
                &ctx,
                EventPayload::BeginBlock(BeginBlock {
                    height,
                    timestamp: 1_700_000_000_000_000_000 + height as i64,
                    hash: trace,
                }),
            )
            .with_sequence(1),
            Event::new(
                &ctx,
                EventPayload::Asset(Asset {
                    id: format!("asset-{height}"),
                    symbol: "ETH".into(),
                    decimals: 18,
                }),
            )
            .with_sequence(2),
            Event::new(&ctx, last).with_sequence(3),
        ]
    }

    fn replay_config(dir: &std::path::Path) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.replay.enabled = true;
        config.replay.dir = dir.to_path_buf();
        config
    }

    #[tokio::test]
    async fn test_replay_runs_until_upgrade() {
        let dir = tempfile::tempdir().unwrap();
        let mut sink = FileSink::create(&dir.path().join("recording")).unwrap();
        sink.write_batch(&block_events(1, EventPayload::EndBlock(EndBlock { height: 1 })))
            .unwrap();
        sink.write_batch(&block_events(
            2,
            EventPayload::ProtocolUpgradeStarted(ProtocolUpgradeStarted {
                last_block_height: 2,
            }),
        ))
        .unwrap();
        drop(sink);

        let node = DataNode::build(&replay_config(dir.path())).unwrap();
        let exit = tokio::time::timeout(Duration::from_secs(5), node.run(CancellationToken::new()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, DataNodeExit::Upgrade { last_block_height: 2 });
        assert_eq!(node.blocks().heights(), vec![1, 2]);
        assert_eq!(node.transactions().commits(), 2);
        assert_eq!(node.events().counts().get(&EventType::Asset), Some(&2));
        assert!(node.socket_addr().is_none());
    }

    #[tokio::test]
    async fn test_observer_stops_on_cancel_before_stream_starts() {
        let dir = tempfile::tempdir().unwrap();
        let replay = BufferFilesEventSource::new(event_buffer::ReplayConfig {
            enabled: true,
            dir: dir.path().to_path_buf(),
            ..Default::default()
        });
        // The second consumer never registers, so the fan-out never starts.
        let pipeline = Arc::new(FanOutEventSource::new(
            Arc::new(replay) as Arc<dyn EventReceiver>,
            FAN_OUT_CONSUMERS,
        ));

        let cancel = CancellationToken::new();
        let observer = tokio::spawn(observe(Arc::clone(&pipeline), cancel.clone()));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(pipeline.registered(), 1);

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), observer)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_is_a_clean_exit() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = NodeConfig::default();
        config.broker.socket.enabled = true;
        config.broker.socket.port = 0;
        config.buffer.enabled = true;
        config.buffer.dir = dir.path().join("buffer");

        let node = Arc::new(DataNode::build(&config).unwrap());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn({
            let node = Arc::clone(&node);
            let cancel = cancel.clone();
            async move { node.run(cancel).await }
        });

        tokio::time::timeout(Duration::from_secs(5), async {
            while node.socket_addr().is_none() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();
        cancel.cancel();

        let exit = tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(exit, DataNodeExit::Cancelled);
        assert!(node.blocks().heights().is_empty());
    }
}
