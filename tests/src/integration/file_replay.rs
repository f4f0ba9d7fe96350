//! # File Replay
//!
//! The core's file mirror recorded to disk, then replayed into a data node:
//!
//! ```text
//! Heartbeat ─▶ Broker ─▶ FileSink ─▶ recording ─▶ BufferFilesEventSource ─▶ SqlStoreBroker
//! ```

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Arc;

    use broker_node::{DataNode, DataNodeError, DataNodeExit, NodeConfig};
    use chrono::{DateTime, Utc};
    use event_buffer::{BufferFilesEventSource, ReplayConfig};
    use event_types::{Block, EventType, SourceError};
    use sqlstore_broker::adapters::{
        InMemoryBlockStore, InMemoryEventTable, InMemoryTransactionManager, ProtocolUpgradeFlag,
    };
    use sqlstore_broker::{SqlBrokerSubscriber, SqlStoreBroker, SqlStoreConfig, SqlStoreError};
    use tokio_util::sync::CancellationToken;

    use crate::integration::fixtures::{file_mirror, produce, CHAIN_ID, STEP_TIMEOUT};

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    /// Record `blocks` heartbeat blocks into `<dir>/recordings/events`.
    async fn record(dir: &Path, blocks: u64) -> std::path::PathBuf {
        let recordings = dir.join("recordings");
        let cancel = CancellationToken::new();
        let broker = produce(file_mirror(&recordings.join("events")), blocks, &cancel).await;
        broker.shutdown();
        cancel.cancel();
        recordings
    }

    fn replay(dir: &Path, chain_id: &str) -> ReplayConfig {
        ReplayConfig {
            enabled: true,
            dir: dir.to_path_buf(),
            chain_id: chain_id.to_string(),
            ..Default::default()
        }
    }

    // =========================================================================
    // SCENARIOS
    // =========================================================================

    #[tokio::test]
    async fn test_recording_replays_into_store() {
        let dir = tempfile::tempdir().unwrap();
        let recordings = record(dir.path(), 4).await;

        let config = NodeConfig {
            replay: replay(&recordings, CHAIN_ID),
            ..Default::default()
        };
        let node = DataNode::build(&config).unwrap();
        let exit = tokio::time::timeout(STEP_TIMEOUT, node.run(CancellationToken::new()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(exit, DataNodeExit::Upgrade { last_block_height: 4 });
        assert_eq!(node.blocks().heights(), vec![1, 2, 3, 4]);
        assert_eq!(node.transactions().commits(), 4);
        assert_eq!(node.events().counts().get(&EventType::TimeUpdate), Some(&4));
    }

    #[tokio::test]
    async fn test_replay_rejects_foreign_chain() {
        let dir = tempfile::tempdir().unwrap();
        let recordings = record(dir.path(), 2).await;

        let config = NodeConfig {
            replay: replay(&recordings, "another-chain"),
            ..Default::default()
        };
        let node = DataNode::build(&config).unwrap();
        let result = tokio::time::timeout(STEP_TIMEOUT, node.run(CancellationToken::new()))
            .await
            .unwrap();

        assert!(matches!(
            result,
            Err(DataNodeError::Consumer(SqlStoreError::Source(
                SourceError::ChainIdMismatch { .. }
            )))
        ));
        assert!(node.blocks().heights().is_empty());
        assert_eq!(node.transactions().commits(), 0);
    }

    /// A consumer restarted over the same recording only applies the blocks
    /// it has not committed yet.
    #[tokio::test]
    async fn test_restart_skips_committed_blocks() {
        let dir = tempfile::tempdir().unwrap();
        let recordings = record(dir.path(), 4).await;

        let committed = |height: i64| Block {
            height,
            hash: height.to_be_bytes().to_vec(),
            vega_time: DateTime::<Utc>::UNIX_EPOCH,
        };
        let blocks = Arc::new(InMemoryBlockStore::with_blocks(vec![
            committed(1),
            committed(2),
        ]));
        let transactions = Arc::new(InMemoryTransactionManager::new());
        let table = Arc::new(InMemoryEventTable::all());

        let consumer = SqlStoreBroker::new(
            SqlStoreConfig::default(),
            BufferFilesEventSource::new(replay(&recordings, CHAIN_ID)),
            transactions.clone(),
            blocks.clone(),
            Arc::new(ProtocolUpgradeFlag::new()),
        )
        .with_subscribers([table.clone() as Arc<dyn SqlBrokerSubscriber>]);

        tokio::time::timeout(STEP_TIMEOUT, consumer.receive(CancellationToken::new()))
            .await
            .unwrap()
            .unwrap();

        assert_eq!(blocks.heights(), vec![1, 2, 3, 4]);
        assert_eq!(transactions.commits(), 2);
        let replayed: Vec<i64> = table.flushed().iter().map(|e| e.block_nr()).collect();
        assert_eq!(replayed, vec![3, 4]);
    }
}
