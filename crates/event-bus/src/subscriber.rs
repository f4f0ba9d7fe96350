//! # Subscribers
//!
//! The capability model of a broker subscriber.
//!
//! Every subscriber exposes [`SubscriberMeta`]. Delivery comes in two flavours,
//! chosen when subscribing:
//!
//! - [`RequiredSubscriber`]: `push` is awaited by the dispatch worker. The
//!   subscriber sees every event of its types, in order, and may stall the
//!   worker while it catches up.
//! - [`OptionalSubscriber`]: batches go onto a bounded channel without ever
//!   blocking the worker. Under load batches are dropped, never reordered.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use event_types::{EventBatch, EventType};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Registry key of a subscriber. Never zero once assigned.
pub type SubscriberId = usize;

// =============================================================================
// CAPABILITIES
// =============================================================================

/// What the registry needs to know about any subscriber.
///
/// Everything defaults to the embedded [`SubscriberBase`]; implementors
/// override only what they compute differently.
pub trait SubscriberMeta: Send + Sync {
    /// Bookkeeping shared by all subscribers.
    fn base(&self) -> &SubscriberBase;

    /// Types of interest. Empty, or containing [`EventType::All`], means all.
    fn types(&self) -> Vec<EventType> {
        self.base().types().to_vec()
    }

    /// Delivery is temporarily suspended.
    fn skip(&self) -> bool {
        self.base().is_paused()
    }

    /// The subscriber is gone for good and should be deregistered.
    fn closed(&self) -> bool {
        self.base().is_closed()
    }

    fn set_id(&self, id: SubscriberId) {
        self.base().set_id(id);
    }

    fn id(&self) -> SubscriberId {
        self.base().id()
    }
}

/// Lossless, in-order delivery. May block its type's dispatch worker.
#[async_trait]
pub trait RequiredSubscriber: SubscriberMeta {
    async fn push(&self, batch: EventBatch);
}

/// Best-effort delivery over a bounded channel.
pub trait OptionalSubscriber: SubscriberMeta {
    fn channel(&self) -> &mpsc::Sender<EventBatch>;
}

/// A subscriber together with its delivery capability.
#[derive(Clone)]
pub enum Subscription {
    Required(Arc<dyn RequiredSubscriber>),
    Optional(Arc<dyn OptionalSubscriber>),
}

impl Subscription {
    #[must_use]
    pub fn required(subscriber: Arc<dyn RequiredSubscriber>) -> Self {
        Self::Required(subscriber)
    }

    #[must_use]
    pub fn optional(subscriber: Arc<dyn OptionalSubscriber>) -> Self {
        Self::Optional(subscriber)
    }

    #[must_use]
    pub fn is_required(&self) -> bool {
        matches!(self, Self::Required(_))
    }

    pub(crate) fn meta(&self) -> &dyn SubscriberMeta {
        match self {
            Self::Required(sub) => sub.as_ref(),
            Self::Optional(sub) => sub.as_ref(),
        }
    }

    /// Identity of the underlying subscriber object.
    pub(crate) fn same_subscriber(&self, other: &Self) -> bool {
        self.data_ptr() == other.data_ptr()
    }

    fn data_ptr(&self) -> *const () {
        match self {
            Self::Required(sub) => Arc::as_ptr(sub) as *const (),
            Self::Optional(sub) => Arc::as_ptr(sub) as *const (),
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("required", &self.is_required())
            .field("id", &self.meta().id())
            .finish()
    }
}

// =============================================================================
// SHARED BOOKKEEPING
// =============================================================================

/// ID, pause and close state for a subscriber.
#[derive(Debug)]
pub struct SubscriberBase {
    types: Vec<EventType>,
    id: AtomicUsize,
    paused: AtomicBool,
    closed: CancellationToken,
}

impl SubscriberBase {
    #[must_use]
    pub fn new(types: Vec<EventType>) -> Self {
        Self {
            types,
            id: AtomicUsize::new(0),
            paused: AtomicBool::new(false),
            closed: CancellationToken::new(),
        }
    }

    /// Base for a subscriber of every event type.
    #[must_use]
    pub fn all() -> Self {
        Self::new(vec![EventType::All])
    }

    #[must_use]
    pub fn types(&self) -> &[EventType] {
        &self.types
    }

    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.id.load(Ordering::Acquire)
    }

    pub fn set_id(&self, id: SubscriberId) {
        self.id.store(id, Ordering::Release);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Close permanently. The broker deregisters the subscriber on its next
    /// dispatch pass.
    pub fn close(&self) {
        self.closed.cancel();
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Token cancelled on close, for subscribers that run their own tasks.
    #[must_use]
    pub fn closed_token(&self) -> CancellationToken {
        self.closed.clone()
    }
}

impl Default for SubscriberBase {
    fn default() -> Self {
        Self::all()
    }
}

// =============================================================================
// CHANNEL SUBSCRIBER
// =============================================================================

/// Ready-made optional subscriber handing batches to a channel.
///
/// Dropping the receiver closes the subscriber.
pub struct ChannelSubscriber {
    base: SubscriberBase,
    tx: mpsc::Sender<EventBatch>,
}

impl ChannelSubscriber {
    /// Create the subscriber and the receiving end of its channel.
    #[must_use]
    pub fn new(
        types: Vec<EventType>,
        capacity: usize,
    ) -> (Arc<Self>, mpsc::Receiver<EventBatch>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscriber = Arc::new(Self {
            base: SubscriberBase::new(types),
            tx,
        });
        (subscriber, rx)
    }
}

impl SubscriberMeta for ChannelSubscriber {
    fn base(&self) -> &SubscriberBase {
        &self.base
    }

    fn closed(&self) -> bool {
        self.base.is_closed() || self.tx.is_closed()
    }
}

impl OptionalSubscriber for ChannelSubscriber {
    fn channel(&self) -> &mpsc::Sender<EventBatch> {
        &self.tx
    }
}
