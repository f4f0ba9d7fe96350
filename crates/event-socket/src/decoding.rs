//! # Decoding Source
//!
//! Turns any raw envelope source into an event source: decode, reject any
//! protocol version but ours, and convert through the type table. A frame
//! that fails any of these ends the stream.

use std::sync::Arc;

use async_trait::async_trait;
use event_types::{
    Event, EventReceiver, EventStream, RawEventReceiver, SourceError,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace};

/// Default capacity of the decoded event channel.
pub const DEFAULT_DECODED_BUFFER: usize = 1_000;

/// Decodes the frames of a [`RawEventReceiver`].
#[derive(Debug)]
pub struct DecodingSource<R> {
    inner: R,
    buffer: usize,
}

impl<R: RawEventReceiver> DecodingSource<R> {
    #[must_use]
    pub fn new(inner: R) -> Self {
        Self::with_buffer(inner, DEFAULT_DECODED_BUFFER)
    }

    #[must_use]
    pub fn with_buffer(inner: R, buffer: usize) -> Self {
        Self {
            inner,
            buffer: buffer.max(1),
        }
    }

    #[must_use]
    pub fn inner(&self) -> &R {
        &self.inner
    }
}

#[async_trait]
impl<R: RawEventReceiver + 'static> EventReceiver for DecodingSource<R> {
    async fn listen(&self) -> Result<(), SourceError> {
        self.inner.listen().await
    }

    fn receive(&self, cancel: CancellationToken) -> EventStream {
        let mut raw = self.inner.receive(cancel.clone());
        let (tx, rx) = mpsc::channel(self.buffer);

        tokio::spawn(async move {
            loop {
                let item = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    item = raw.recv() => match item {
                        Some(item) => item,
                        None => break,
                    },
                };

                let decoded = item.and_then(|frame| {
                    Event::from_wire(&frame)
                        .map(Arc::new)
                        .map_err(SourceError::from)
                });
                let terminal = match &decoded {
                    Ok(event) => {
                        trace!(
                            event_type = %event.event_type(),
                            sequence = event.sequence(),
                            "Decoded event"
                        );
                        false
                    }
                    Err(e) => {
                        error!(error = %e, "Event stream failed");
                        true
                    }
                };

                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => break,
                    sent = tx.send(decoded) => {
                        if sent.is_err() {
                            break;
                        }
                    }
                }
                if terminal {
                    break;
                }
            }
        });
        rx
    }
}
