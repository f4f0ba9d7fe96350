//! # Optional Delivery
//!
//! Two-phase, non-blocking hand-off to an optional subscriber's channel:
//!
//! 1. `try_send`. Succeeds immediately or tells us the channel is full.
//! 2. On a full channel, one background attempt waits up to the fallback
//!    timeout for room.
//!
//! While a fallback is in flight for a subscriber every further batch for it
//! is dropped, so the subscriber may miss batches but never sees them out of
//! order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use event_types::EventBatch;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Longest an optional subscriber may hold a batch in the fallback phase.
pub const FALLBACK_TIMEOUT: Duration = Duration::from_secs(1);

/// What happened to a batch handed to [`OptionalDelivery::deliver`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Placed on the channel immediately.
    Delivered,
    /// Channel full; a bounded background attempt now owns the batch.
    Deferred,
    /// A fallback was already in flight; the batch was discarded.
    Dropped,
    /// The receiving side is gone.
    Closed,
}

/// Per-subscriber delivery state. Clones share the in-flight flag.
#[derive(Debug, Clone)]
pub struct OptionalDelivery {
    in_flight: Arc<AtomicBool>,
    timeout: Duration,
}

impl Default for OptionalDelivery {
    fn default() -> Self {
        Self::new()
    }
}

impl OptionalDelivery {
    #[must_use]
    pub fn new() -> Self {
        Self::with_timeout(FALLBACK_TIMEOUT)
    }

    #[must_use]
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            in_flight: Arc::new(AtomicBool::new(false)),
            timeout,
        }
    }

    /// A fallback attempt is currently pending.
    #[must_use]
    pub fn in_flight(&self) -> bool {
        self.in_flight.load(Ordering::Acquire)
    }

    /// Hand `batch` to `tx` without blocking the caller.
    ///
    /// Must be called from within a tokio runtime.
    pub fn deliver(
        &self,
        tx: &mpsc::Sender<EventBatch>,
        batch: EventBatch,
        cancel: &CancellationToken,
    ) -> DeliveryOutcome {
        if self.in_flight() {
            return DeliveryOutcome::Dropped;
        }

        match tx.try_send(batch) {
            Ok(()) => DeliveryOutcome::Delivered,
            Err(TrySendError::Closed(_)) => DeliveryOutcome::Closed,
            Err(TrySendError::Full(batch)) => {
                if self
                    .in_flight
                    .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                    .is_err()
                {
                    return DeliveryOutcome::Dropped;
                }
                self.spawn_fallback(tx.clone(), batch, cancel.clone());
                DeliveryOutcome::Deferred
            }
        }
    }

    fn spawn_fallback(
        &self,
        tx: mpsc::Sender<EventBatch>,
        batch: EventBatch,
        cancel: CancellationToken,
    ) {
        let in_flight = Arc::clone(&self.in_flight);
        let timeout = self.timeout;
        tokio::spawn(async move {
            let size = batch.len();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {}
                result = tx.send_timeout(batch, timeout) => {
                    if let Err(e) = result {
                        debug!(events = size, error = %e, "Optional subscriber missed a batch");
                    }
                }
            }
            in_flight.store(false, Ordering::Release);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_types::{Event, EventPayload, Party, TraceContext};

    fn batch(seq: u64) -> EventBatch {
        let event = Event::new(&TraceContext::new("h1"), EventPayload::Party(Party::default()))
            .with_sequence(seq);
        Arc::from(vec![event])
    }

    async fn wait_idle(delivery: &OptionalDelivery) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while delivery.in_flight() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_full_channel_defers_then_drops() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let delivery = OptionalDelivery::new();

        assert_eq!(delivery.deliver(&tx, batch(1), &cancel), DeliveryOutcome::Delivered);
        assert_eq!(delivery.deliver(&tx, batch(2), &cancel), DeliveryOutcome::Deferred);
        assert!(delivery.in_flight());
        assert_eq!(delivery.deliver(&tx, batch(3), &cancel), DeliveryOutcome::Dropped);

        assert_eq!(rx.recv().await.unwrap()[0].sequence(), 1);
        assert_eq!(rx.recv().await.unwrap()[0].sequence(), 2);
        wait_idle(&delivery).await;

        assert_eq!(delivery.deliver(&tx, batch(4), &cancel), DeliveryOutcome::Delivered);
        assert_eq!(rx.recv().await.unwrap()[0].sequence(), 4);
    }

    #[tokio::test]
    async fn test_fallback_gives_up_after_timeout() {
        let (tx, mut rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let delivery = OptionalDelivery::with_timeout(Duration::from_millis(20));

        delivery.deliver(&tx, batch(1), &cancel);
        assert_eq!(delivery.deliver(&tx, batch(2), &cancel), DeliveryOutcome::Deferred);
        wait_idle(&delivery).await;

        assert_eq!(rx.recv().await.unwrap()[0].sequence(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_closed_receiver_reports_closed() {
        let (tx, rx) = mpsc::channel(1);
        drop(rx);
        let delivery = OptionalDelivery::new();
        let outcome = delivery.deliver(&tx, batch(1), &CancellationToken::new());
        assert_eq!(outcome, DeliveryOutcome::Closed);
    }

    #[tokio::test]
    async fn test_cancel_releases_fallback() {
        let (tx, _rx) = mpsc::channel(1);
        let cancel = CancellationToken::new();
        let delivery = OptionalDelivery::new();

        delivery.deliver(&tx, batch(1), &cancel);
        delivery.deliver(&tx, batch(2), &cancel);
        assert!(delivery.in_flight());

        cancel.cancel();
        wait_idle(&delivery).await;
    }
}
