//! # Event Sources
//!
//! The traits a consumer reads events through, whatever sits upstream: a
//! socket, a buffer directory, a fan-out, or a decoder over any of those.
//!
//! A source hands out a bounded channel of results; an `Err` item is terminal
//! and the channel closes right after it. Every task behind a stream observes
//! the [`CancellationToken`] it was given and releases what it owns on exit.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::SourceError;
use crate::event::Event;

/// Stream of decoded events.
pub type EventStream = mpsc::Receiver<Result<Arc<Event>, SourceError>>;

/// Stream of raw encoded envelopes.
pub type RawEventStream = mpsc::Receiver<Result<Bytes, SourceError>>;

/// A source of decoded events.
#[async_trait]
pub trait EventReceiver: Send + Sync {
    /// Prepare the source (bind, open directories). Called before `receive`.
    async fn listen(&self) -> Result<(), SourceError>;

    /// Start streaming. Must be called from within a tokio runtime.
    fn receive(&self, cancel: CancellationToken) -> EventStream;
}

/// A source of raw, still-encoded envelopes.
#[async_trait]
pub trait RawEventReceiver: Send + Sync {
    /// Prepare the source (bind, open directories). Called before `receive`.
    async fn listen(&self) -> Result<(), SourceError>;

    /// Start streaming. Must be called from within a tokio runtime.
    fn receive(&self, cancel: CancellationToken) -> RawEventStream;
}

#[async_trait]
impl<T: EventReceiver + ?Sized> EventReceiver for Arc<T> {
    async fn listen(&self) -> Result<(), SourceError> {
        (**self).listen().await
    }

    fn receive(&self, cancel: CancellationToken) -> EventStream {
        (**self).receive(cancel)
    }
}

#[async_trait]
impl<T: RawEventReceiver + ?Sized> RawEventReceiver for Arc<T> {
    async fn listen(&self) -> Result<(), SourceError> {
        (**self).listen().await
    }

    fn receive(&self, cancel: CancellationToken) -> RawEventStream {
        (**self).receive(cancel)
    }
}
