//! # Broker Statistics
//!
//! Lock-free event counters for observability.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters updated on every send.
#[derive(Debug, Default)]
pub struct BrokerStats {
    total_events: AtomicU64,
    current_block: AtomicU64,
    last_block: AtomicU64,
    batches: AtomicU64,
}

/// Point-in-time copy of [`BrokerStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    /// Events processed since the broker started.
    pub total_events: u64,
    /// Events processed since the last tick.
    pub current_block: u64,
    /// Events processed between the two most recent ticks.
    pub last_block: u64,
    /// Non-empty batches sent.
    pub batches: u64,
}

impl BrokerStats {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_batch(&self, events: u64) {
        self.total_events.fetch_add(events, Ordering::Relaxed);
        self.current_block.fetch_add(events, Ordering::Relaxed);
        self.batches.fetch_add(1, Ordering::Relaxed);
    }

    /// Close the current block's count and start a new one.
    pub fn roll_block(&self) {
        let current = self.current_block.swap(0, Ordering::Relaxed);
        self.last_block.store(current, Ordering::Relaxed);
    }

    #[must_use]
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            total_events: self.total_events.load(Ordering::Relaxed),
            current_block: self.current_block.load(Ordering::Relaxed),
            last_block: self.last_block.load(Ordering::Relaxed),
            batches: self.batches.load(Ordering::Relaxed),
        }
    }
}
