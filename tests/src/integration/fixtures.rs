//! Shared setup for the pipeline scenarios.

use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

use broker_node::{DataNode, Heartbeat, ProducerExit};
use event_bus::{Broker, BrokerConfig, FileConfig};
use event_socket::SocketConfig;
use tokio_util::sync::CancellationToken;

pub const CHAIN_ID: &str = "e2e-chain";

/// Upper bound for any single scenario step.
pub const STEP_TIMEOUT: Duration = Duration::from_secs(10);

/// Data-node side listening on an ephemeral port.
pub fn listening_socket() -> SocketConfig {
    SocketConfig {
        enabled: true,
        address: "127.0.0.1".into(),
        port: 0,
        receive_timeout: Duration::from_secs(5),
        ..Default::default()
    }
}

/// Core side dialing the data node.
pub fn dialing_socket(port: u16) -> SocketConfig {
    SocketConfig {
        enabled: true,
        address: "127.0.0.1".into(),
        port,
        dial_timeout: Duration::from_secs(2),
        dial_retry_interval: Duration::from_millis(50),
        ..Default::default()
    }
}

/// Core-side config mirroring to the given file only.
pub fn file_mirror(path: &Path) -> BrokerConfig {
    BrokerConfig {
        socket: SocketConfig::default(),
        file: FileConfig {
            enabled: true,
            file: path.to_path_buf(),
        },
    }
}

/// Wait until the data node's socket server is bound.
pub async fn wait_for_addr(node: &DataNode) -> SocketAddr {
    tokio::time::timeout(STEP_TIMEOUT, async {
        loop {
            if let Some(addr) = node.socket_addr() {
                return addr;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("data node never bound its socket")
}

/// Produce `blocks` heartbeat blocks, the last announcing a protocol upgrade.
/// Returns the broker so callers decide when its mirrors stop.
pub async fn produce(config: BrokerConfig, blocks: u64, cancel: &CancellationToken) -> Broker {
    let broker = Broker::new(config, cancel).await.expect("broker start");
    let mut heartbeat = Heartbeat::new(broker.clone(), Duration::from_millis(5))
        .with_chain_id(CHAIN_ID)
        .with_upgrade_at(Some(blocks));

    let exit = tokio::time::timeout(STEP_TIMEOUT, heartbeat.run(cancel.clone()))
        .await
        .expect("producer timed out")
        .expect("producer failed");
    assert_eq!(exit, ProducerExit::Upgrade { last_height: blocks });
    broker
}
