//! # Heartbeat Producer
//!
//! Core-side block stream. Each tick is one block:
//!
//! ```text
//! BeginBlock ─▶ TimeUpdate (staged, flushed by on_tick) ─▶ EndBlock
//! ```
//!
//! The trace ID of a block is its height as upper-case hex, so the consumer
//! can turn it back into a block hash. After the block at the configured
//! upgrade height, `ProtocolUpgradeStarted` is sent under the next block's
//! trace and the producer stops.

use std::time::Duration;

use chrono::Utc;
use event_bus::{Broker, BrokerError};
use event_types::{
    BeginBlock, EndBlock, Event, EventPayload, ProtocolUpgradeStarted, TimeUpdate, TraceContext,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum ProducerError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The broker raised its fatal signal between blocks.
    #[error("broker stopped streaming: {0}")]
    Fatal(String),
}

/// How the producer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProducerExit {
    Cancelled { last_height: u64 },
    Upgrade { last_height: u64 },
}

pub struct Heartbeat {
    broker: Broker,
    interval: Duration,
    chain_id: String,
    upgrade_at_height: Option<u64>,
    height: u64,
}

impl Heartbeat {
    #[must_use]
    pub fn new(broker: Broker, interval: Duration) -> Self {
        Self {
            broker,
            interval,
            chain_id: String::new(),
            upgrade_at_height: None,
            height: 0,
        }
    }

    #[must_use]
    pub fn with_chain_id(mut self, chain_id: impl Into<String>) -> Self {
        self.chain_id = chain_id.into();
        self
    }

    #[must_use]
    pub fn with_upgrade_at(mut self, height: Option<u64>) -> Self {
        self.upgrade_at_height = height;
        self
    }

    /// Continue after `height` instead of starting at block 1.
    #[must_use]
    pub fn starting_after(mut self, height: u64) -> Self {
        self.height = height;
        self
    }

    /// Produce blocks until cancelled, upgraded or the broker fails.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<ProducerExit, ProducerError> {
        let fatal = self.broker.fatal_token();
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        info!(interval = ?self.interval, chain_id = %self.chain_id, "Heartbeat producer started");
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Ok(ProducerExit::Cancelled { last_height: self.height });
                }
                _ = fatal.cancelled() => {
                    let reason = self.broker.fatal_error().unwrap_or_default();
                    return Err(ProducerError::Fatal(reason));
                }
                _ = ticker.tick() => {}
            }

            if self.produce_block().await? {
                return Ok(ProducerExit::Upgrade { last_height: self.height });
            }
        }
    }

    /// Emit the next block. Returns true if it announced the upgrade.
    async fn produce_block(&mut self) -> Result<bool, ProducerError> {
        self.height += 1;
        let height = self.height;
        let trace_id = block_trace_id(height);
        let ctx = TraceContext::new(trace_id.clone())
            .with_block_nr(height as i64)
            .with_chain_id(self.chain_id.clone());
        let timestamp = Utc::now().timestamp_nanos_opt().unwrap_or_default();

        self.broker
            .send(Event::new(
                &ctx,
                EventPayload::BeginBlock(BeginBlock {
                    height,
                    timestamp,
                    hash: trace_id,
                }),
            ))
            .await?;

        self.broker.stage(Event::new(
            &TraceContext::default(),
            EventPayload::TimeUpdate(TimeUpdate { timestamp }),
        ));
        self.broker.on_tick(&ctx).await?;

        self.broker
            .send(Event::new(&ctx, EventPayload::EndBlock(EndBlock { height })))
            .await?;

        let stats = self.broker.stats();
        debug!(
            height,
            block_events = stats.last_block,
            total_events = stats.total_events,
            "Block produced"
        );

        if self.upgrade_at_height != Some(height) {
            return Ok(false);
        }
        self.announce_upgrade(height).await?;
        info!(height, "Protocol upgrade announced, producer stopping");
        Ok(true)
    }

    /// Announce the upgrade at the start of the block that will not be
    /// produced, ahead of its `BeginBlock`.
    async fn announce_upgrade(&self, last_block_height: u64) -> Result<(), ProducerError> {
        let next = last_block_height + 1;
        let ctx = TraceContext::new(block_trace_id(next))
            .with_block_nr(next as i64)
            .with_chain_id(self.chain_id.clone());
        self.broker
            .send(Event::new(
                &ctx,
                EventPayload::ProtocolUpgradeStarted(ProtocolUpgradeStarted { last_block_height }),
            ))
            .await?;
        Ok(())
    }
}

fn block_trace_id(height: u64) -> String {
    hex::encode_upper(height.to_be_bytes())
}
