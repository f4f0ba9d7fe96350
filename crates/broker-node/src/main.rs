//! # Broker Node
//!
//! ```text
//! broker-node core       # produce heartbeat blocks through the broker
//! broker-node datanode   # consume them into the in-memory store
//! ```
//!
//! The mode may also be given as `BROKER_MODE`. Ctrl+C stops either mode.

use anyhow::{bail, Context, Result};
use broker_node::{
    init_logging, load_config, DataNode, DataNodeExit, Heartbeat, LogConfig, Mode, NodeConfig,
    ProducerExit,
};
use event_bus::Broker;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

fn parse_mode() -> Result<Mode> {
    let raw = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("BROKER_MODE").ok());
    let Some(raw) = raw else {
        bail!("usage: broker-node <core|datanode>");
    };
    Ok(raw.parse::<Mode>()?)
}

async fn run_core(config: NodeConfig, cancel: CancellationToken) -> Result<()> {
    let broker = Broker::new(config.broker.clone(), &cancel)
        .await
        .context("failed to start broker")?;

    let mut heartbeat = Heartbeat::new(broker.clone(), config.heartbeat_interval)
        .with_chain_id(config.sqlstore.chain_id.clone())
        .with_upgrade_at(config.upgrade_at_height);
    let exit = heartbeat.run(cancel).await;
    broker.shutdown();

    match exit.context("heartbeat producer failed")? {
        ProducerExit::Cancelled { last_height } => {
            info!(last_height, "Producer stopped");
        }
        ProducerExit::Upgrade { last_height } => {
            info!(last_height, "Producer stopped for protocol upgrade");
        }
    }
    Ok(())
}

async fn run_datanode(config: NodeConfig, cancel: CancellationToken) -> Result<()> {
    let node = DataNode::build(&config).context("failed to build data node pipeline")?;
    match node.run(cancel).await.context("data node stopped")? {
        DataNodeExit::Upgrade { last_block_height } => {
            info!(last_block_height, "Data node stopped for protocol upgrade");
        }
        DataNodeExit::Cancelled => info!("Data node stopped"),
    }
    info!(
        blocks = node.blocks().heights().len(),
        commits = node.transactions().commits(),
        "Final store state"
    );
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_logging(&LogConfig::from_env()).context("failed to initialise logging")?;

    let mode = parse_mode()?;
    let config = load_config().context("failed to load configuration")?;
    config
        .validate(mode)
        .with_context(|| format!("invalid configuration for {mode} mode"))?;

    info!("===========================================");
    info!("  Event Broker Node");
    info!("===========================================");
    info!(%mode, socket = %config.broker.socket.endpoint(), "Starting");

    let cancel = CancellationToken::new();
    let signal = cancel.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received Ctrl+C, shutting down"),
            Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, shutting down"),
        }
        signal.cancel();
    });

    match mode {
        Mode::Core => run_core(config, cancel).await,
        Mode::Datanode => run_datanode(config, cancel).await,
    }
}
