//! # Socket Pipeline
//!
//! Core and data node in one process, connected over TCP:
//!
//! ```text
//! Heartbeat ─▶ Broker ─▶ SocketClient ══TCP══▶ SocketServer ─▶ BufferedEventSource
//!     ─▶ DecodingSource ─▶ FanOutEventSource ─▶ SqlStoreBroker ─▶ in-memory store
//! ```

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use broker_node::{DataNode, DataNodeExit, NodeConfig};
    use event_buffer::archive::ARCHIVE_EXTENSION;
    use event_buffer::files::list_buffer_files;
    use event_bus::BrokerConfig;
    use event_types::EventType;
    use tokio_util::sync::CancellationToken;

    use crate::integration::fixtures::{
        dialing_socket, listening_socket, produce, wait_for_addr, CHAIN_ID, STEP_TIMEOUT,
    };

    // =========================================================================
    // TEST FIXTURES
    // =========================================================================

    fn buffered_node_config(dir: &std::path::Path, archive: bool) -> NodeConfig {
        let mut config = NodeConfig::default();
        config.broker.socket = listening_socket();
        config.buffer.enabled = true;
        config.buffer.dir = dir.join("buffer");
        config.buffer.events_per_file = 4;
        config.buffer.archive = archive;
        config
    }

    async fn start_node(
        config: &NodeConfig,
    ) -> (Arc<DataNode>, tokio::task::JoinHandle<DataNodeExit>, u16) {
        let node = Arc::new(DataNode::build(config).unwrap());
        let handle = tokio::spawn({
            let node = Arc::clone(&node);
            async move { node.run(CancellationToken::new()).await.unwrap() }
        });
        let port = wait_for_addr(&node).await.port();
        (node, handle, port)
    }

    // =========================================================================
    // SCENARIOS
    // =========================================================================

    /// Every produced block is committed exactly once, in order, and the
    /// upgrade announcement that follows the last `EndBlock` stops the data
    /// node cleanly without opening another block.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_blocks_flow_from_core_to_store() {
        let dir = tempfile::tempdir().unwrap();
        let (node, handle, port) = start_node(&buffered_node_config(dir.path(), false)).await;

        let core_cancel = CancellationToken::new();
        let broker = produce(
            BrokerConfig {
                socket: dialing_socket(port),
                ..Default::default()
            },
            5,
            &core_cancel,
        )
        .await;

        let exit = tokio::time::timeout(STEP_TIMEOUT, handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, DataNodeExit::Upgrade { last_block_height: 5 });

        assert_eq!(node.blocks().heights(), vec![1, 2, 3, 4, 5]);
        assert_eq!(node.transactions().commits(), 5);
        assert!(!node.transactions().is_open());

        // Control events never reach storage subscribers.
        let counts = node.events().counts();
        assert_eq!(counts.get(&EventType::TimeUpdate), Some(&5));
        assert_eq!(counts.get(&EventType::BeginBlock), None);
        assert_eq!(counts.get(&EventType::EndBlock), None);
        assert_eq!(counts.get(&EventType::ProtocolUpgradeStarted), None);

        for event in node.events().flushed() {
            assert_eq!(event.chain_id(), CHAIN_ID);
            assert_eq!(event.sequence(), 2);
        }

        // Consumed buffer files were removed, only the unfinished one may remain.
        let remaining = list_buffer_files(&dir.path().join("buffer")).unwrap().len();
        assert!(remaining <= 1, "{remaining} buffer files left behind");

        broker.shutdown();
        core_cancel.cancel();
    }

    /// With archiving on, consumed buffer files end up compressed.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_consumed_buffer_files_are_archived() {
        let dir = tempfile::tempdir().unwrap();
        let config = buffered_node_config(dir.path(), true);
        let archive_dir = config.buffer.archive_dir();
        let (node, handle, port) = start_node(&config).await;

        let core_cancel = CancellationToken::new();
        let broker = produce(
            BrokerConfig {
                socket: dialing_socket(port),
                ..Default::default()
            },
            5,
            &core_cancel,
        )
        .await;

        let exit = tokio::time::timeout(STEP_TIMEOUT, handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, DataNodeExit::Upgrade { last_block_height: 5 });
        assert_eq!(node.blocks().heights().len(), 5);

        // 15 block events plus the announcement at 4 per file: the first
        // three files were fully read before the announcement was delivered.
        let archived = std::fs::read_dir(&archive_dir)
            .unwrap()
            .filter_map(Result::ok)
            .filter(|entry| {
                entry
                    .path()
                    .extension()
                    .is_some_and(|ext| ext == ARCHIVE_EXTENSION)
            })
            .count();
        assert!(archived >= 3, "only {archived} archives");

        broker.shutdown();
        core_cancel.cancel();
    }

    /// A data node without the disk buffer sees the same stream.
    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_unbuffered_pipeline() {
        let mut config = NodeConfig::default();
        config.broker.socket = listening_socket();
        let (node, handle, port) = start_node(&config).await;

        let core_cancel = CancellationToken::new();
        let broker = produce(
            BrokerConfig {
                socket: dialing_socket(port),
                ..Default::default()
            },
            3,
            &core_cancel,
        )
        .await;

        let exit = tokio::time::timeout(STEP_TIMEOUT, handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(exit, DataNodeExit::Upgrade { last_block_height: 3 });
        assert_eq!(node.blocks().heights(), vec![1, 2, 3]);

        broker.shutdown();
        core_cancel.cancel();
    }
}
