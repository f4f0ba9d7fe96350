//! # Dispatch Worker
//!
//! One task per event type that has been sent to. It pops batches from its
//! queue, snapshots the type's subscribers under the registry lock and then
//! delivers without holding it.
//!
//! Per subscriber, in priority order: closed (mark for removal), skip (do
//! nothing), deliver.

use std::sync::Arc;

use event_types::{EventBatch, EventType};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::delivery::DeliveryOutcome;
use crate::registry::{Handle, SubscriberRegistry};
use crate::subscriber::Subscription;

pub(crate) struct DispatchWorker {
    event_type: EventType,
    registry: Arc<Mutex<SubscriberRegistry>>,
    queue: mpsc::Receiver<EventBatch>,
    cancel: CancellationToken,
}

impl DispatchWorker {
    /// Start a worker for `event_type` and return its queue.
    pub(crate) fn spawn(
        event_type: EventType,
        registry: Arc<Mutex<SubscriberRegistry>>,
        capacity: usize,
        cancel: CancellationToken,
    ) -> mpsc::Sender<EventBatch> {
        let (tx, queue) = mpsc::channel(capacity);
        let worker = Self {
            event_type,
            registry,
            queue,
            cancel,
        };
        debug!(event_type = %event_type, capacity, "Starting dispatch worker");
        tokio::spawn(worker.run());
        tx
    }

    async fn run(mut self) {
        loop {
            let batch = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                batch = self.queue.recv() => match batch {
                    Some(batch) => batch,
                    None => break,
                },
            };

            if !self.dispatch(batch).await {
                break;
            }
        }
        debug!(event_type = %self.event_type, "Dispatch worker stopped");
    }

    /// Deliver one batch. Returns `false` if cancelled mid-way.
    async fn dispatch(&self, batch: EventBatch) -> bool {
        let handles = self.registry.lock().snapshot(self.event_type);
        let mut closed: Vec<Handle> = Vec::new();

        for handle in handles {
            let meta = handle.subscription.meta();
            if meta.closed() {
                closed.push(handle);
                continue;
            }
            if meta.skip() {
                trace!(subscriber = handle.id, "Subscriber skipping batch");
                continue;
            }

            match &handle.subscription {
                Subscription::Required(sub) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => return false,
                        _ = sub.push(Arc::clone(&batch)) => {}
                    }
                }
                Subscription::Optional(sub) => {
                    let outcome =
                        handle
                            .delivery
                            .deliver(sub.channel(), Arc::clone(&batch), &self.cancel);
                    match outcome {
                        DeliveryOutcome::Closed => closed.push(handle.clone()),
                        DeliveryOutcome::Dropped => {
                            trace!(subscriber = handle.id, "Optional subscriber dropped batch");
                        }
                        DeliveryOutcome::Delivered | DeliveryOutcome::Deferred => {}
                    }
                }
            }
        }

        if !closed.is_empty() {
            let mut registry = self.registry.lock();
            for handle in closed {
                if registry.unsubscribe_if_same(handle.id, &handle.subscription) {
                    debug!(subscriber = handle.id, "Removed closed subscriber");
                }
            }
        }
        true
    }
}
