//! # Broker
//!
//! The central composition point: sequence generator, subscriber registry,
//! per-type dispatch workers and the optional streaming mirrors.
//!
//! ## Send path
//!
//! ```text
//! send_batch ──▶ SequenceGenerator ──▶ [streaming?] socket + file mirror
//!                                            │
//!                     group by type ◀────────┘
//!                          │
//!            ┌─────────────┼─────────────┐
//!            ▼             ▼             ▼
//!      worker(Trade)  worker(Order)  worker(...)   ──▶ subscribers
//! ```
//!
//! Ordering is per event type: a subscriber sees the events of one type in
//! submission order. A mirror failure is fatal: the broker raises its fatal
//! signal and the owning process is expected to stop.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use event_buffer::FileSink;
use event_socket::SocketClient;
use event_types::{Event, EventBatch, EventType, TraceContext};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::BrokerConfig;
use crate::dispatch::DispatchWorker;
use crate::errors::BrokerError;
use crate::registry::SubscriberRegistry;
use crate::sequence::SequenceGenerator;
use crate::stats::{BrokerStats, StatsSnapshot};
use crate::subscriber::{SubscriberId, Subscription};

/// Process-fatal condition raised by a mirror failure.
#[derive(Debug, Default)]
struct FatalSignal {
    token: CancellationToken,
    reason: Mutex<Option<String>>,
}

impl FatalSignal {
    fn trip(&self, reason: String) {
        error!(reason = %reason, "Broker streaming failure");
        self.reason.lock().get_or_insert(reason);
        self.token.cancel();
    }
}

struct BrokerInner {
    registry: Arc<Mutex<SubscriberRegistry>>,
    sequence: SequenceGenerator,
    streaming: AtomicBool,
    socket: Option<SocketClient>,
    file: Option<Mutex<FileSink>>,
    staged: Mutex<Vec<Event>>,
    stats: BrokerStats,
    cancel: CancellationToken,
    fatal: Arc<FatalSignal>,
}

impl Drop for BrokerInner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// The event broker. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct Broker {
    inner: Arc<BrokerInner>,
}

impl Broker {
    /// Create a broker, connecting the configured mirrors.
    ///
    /// Workers and mirror tasks stop when `cancel` is cancelled or the last
    /// clone of the broker is dropped.
    pub async fn new(config: BrokerConfig, cancel: &CancellationToken) -> Result<Self, BrokerError> {
        let cancel = cancel.child_token();

        let socket = if config.socket.enabled {
            Some(SocketClient::connect(&config.socket, cancel.clone()).await?)
        } else {
            None
        };
        let file = if config.file.enabled {
            Some(Mutex::new(FileSink::create(&config.file.file)?))
        } else {
            None
        };

        let fatal = Arc::new(FatalSignal::default());
        if let Some(client) = &socket {
            spawn_mirror_watch(client.failed(), cancel.clone(), Arc::clone(&fatal));
        }

        info!(
            socket = config.socket.enabled,
            file = config.file.enabled,
            "Event broker started"
        );

        Ok(Self {
            inner: Arc::new(BrokerInner {
                registry: Arc::new(Mutex::new(SubscriberRegistry::new())),
                sequence: SequenceGenerator::new(),
                streaming: AtomicBool::new(config.streaming_enabled()),
                socket,
                file,
                staged: Mutex::new(Vec::new()),
                stats: BrokerStats::new(),
                cancel,
                fatal,
            }),
        })
    }

    // =========================================================================
    // SUBSCRIPTIONS
    // =========================================================================

    /// Register a subscriber. The ID is stable until unsubscribed.
    pub fn subscribe(&self, subscription: Subscription) -> SubscriberId {
        let required = subscription.is_required();
        let id = self.inner.registry.lock().subscribe(subscription);
        debug!(subscriber = id, required, "Subscriber registered");
        id
    }

    /// Register several subscribers under one lock.
    pub fn subscribe_batch(&self, subscriptions: Vec<Subscription>) -> Vec<SubscriberId> {
        let mut registry = self.inner.registry.lock();
        subscriptions
            .into_iter()
            .map(|subscription| registry.subscribe(subscription))
            .collect()
    }

    /// Remove a subscriber. Repeated calls for the same ID are no-ops.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let removed = self.inner.registry.lock().unsubscribe(id);
        if removed {
            debug!(subscriber = id, "Subscriber removed");
        }
        removed
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.lock().len()
    }

    // =========================================================================
    // SENDING
    // =========================================================================

    pub async fn send(&self, event: Event) -> Result<(), BrokerError> {
        self.send_batch(vec![event]).await
    }

    /// Sequence, mirror and dispatch a batch sharing one trace ID.
    ///
    /// Empty batches, and any batch sent after cancellation, are dropped.
    pub async fn send_batch(&self, mut events: Vec<Event>) -> Result<(), BrokerError> {
        if events.is_empty() {
            return Ok(());
        }
        if self.inner.cancel.is_cancelled() {
            debug!(events = events.len(), "Broker stopped, dropping events");
            return Ok(());
        }

        self.inner.sequence.assign(&mut events);
        self.inner.stats.record_batch(events.len() as u64);

        if self.is_streaming() {
            self.mirror(&events).await?;
        }

        let mut groups: BTreeMap<EventType, Vec<Event>> = BTreeMap::new();
        for event in events {
            groups.entry(event.event_type()).or_default().push(event);
        }

        for (event_type, group) in groups {
            let queue = self.worker(event_type);
            let batch: EventBatch = Arc::from(group);
            tokio::select! {
                biased;
                _ = self.inner.cancel.cancelled() => return Ok(()),
                result = queue.send(batch) => {
                    if result.is_err() {
                        debug!(event_type = %event_type, "Dispatch worker gone, dropping batch");
                    }
                }
            }
        }
        Ok(())
    }

    /// Queue an event without dispatching it.
    pub fn stage(&self, event: Event) {
        self.inner.staged.lock().push(event);
    }

    /// Re-contextualise every staged event with `ctx` and send them as one
    /// batch. Also closes the statistics of the previous block.
    pub async fn on_tick(&self, ctx: &TraceContext) -> Result<(), BrokerError> {
        self.inner.stats.roll_block();
        let mut staged = std::mem::take(&mut *self.inner.staged.lock());
        for event in &mut staged {
            event.replace(ctx);
        }
        self.send_batch(staged).await
    }

    /// Number of staged events.
    #[must_use]
    pub fn staged_count(&self) -> usize {
        self.inner.staged.lock().len()
    }

    // =========================================================================
    // STREAMING
    // =========================================================================

    /// Toggle mirroring and return the previous value.
    pub fn set_streaming(&self, on: bool) -> bool {
        self.inner.streaming.swap(on, Ordering::AcqRel)
    }

    #[must_use]
    pub fn is_streaming(&self) -> bool {
        self.inner.streaming.load(Ordering::Acquire)
    }

    async fn mirror(&self, events: &[Event]) -> Result<(), BrokerError> {
        if let Some(socket) = &self.inner.socket {
            if let Err(e) = socket.send_batch(events).await {
                return Err(self.fail(format!("socket mirror: {e}")));
            }
        }
        if let Some(file) = &self.inner.file {
            let result = file.lock().write_batch(events);
            if let Err(e) = result {
                return Err(self.fail(format!("file mirror: {e}")));
            }
        }
        Ok(())
    }

    fn fail(&self, reason: String) -> BrokerError {
        self.inner.fatal.trip(reason.clone());
        BrokerError::StreamingFailed(reason)
    }

    // =========================================================================
    // LIFECYCLE
    // =========================================================================

    /// Cancelled once a mirror has failed.
    #[must_use]
    pub fn fatal_token(&self) -> CancellationToken {
        self.inner.fatal.token.clone()
    }

    /// Why the fatal signal was raised, if it was.
    #[must_use]
    pub fn fatal_error(&self) -> Option<String> {
        self.inner.fatal.reason.lock().clone()
    }

    /// Stop every worker. Later sends are dropped.
    pub fn shutdown(&self) {
        self.inner.cancel.cancel();
    }

    #[must_use]
    pub fn stats(&self) -> StatsSnapshot {
        self.inner.stats.snapshot()
    }

    fn worker(&self, event_type: EventType) -> mpsc::Sender<EventBatch> {
        let registry = Arc::clone(&self.inner.registry);
        let cancel = self.inner.cancel.clone();
        self.inner
            .registry
            .lock()
            .worker_for(event_type, |capacity| {
                DispatchWorker::spawn(event_type, registry, capacity, cancel)
            })
    }
}

/// Raise the fatal signal if the socket mirror's write loop stops.
fn spawn_mirror_watch(failed: CancellationToken, cancel: CancellationToken, fatal: Arc<FatalSignal>) {
    tokio::spawn(async move {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {}
            _ = failed.cancelled() => {
                fatal.trip("socket mirror connection closed".to_string());
            }
        }
    });
}
