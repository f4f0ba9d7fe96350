//! # Socket Client
//!
//! Producer side of the transport. Callers encode events and enqueue frames;
//! a single write task drains the queue onto the connection, so frames leave
//! in enqueue order.
//!
//! Once the write task stops (a fatal write error under the configured
//! [`SendFailurePolicy`], or cancellation) the client's `failed` token is
//! cancelled and every later send returns [`TransportError::Closed`]. On
//! cancellation, frames already queued are still written, for at most the
//! queue timeout.

use std::time::Duration;

use backoff::backoff::Backoff;
use backoff::ExponentialBackoff;
use bytes::Bytes;
use event_types::Event;
use futures::SinkExt;
use tokio::sync::mpsc::{self, error::SendTimeoutError};
use tokio_util::codec::{Framed, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{SendFailurePolicy, SocketConfig};
use crate::connection::{dial, frame_codec, BoxedIo};
use crate::errors::TransportError;

/// First wait between dial attempts, before backing off towards the
/// configured retry interval.
const INITIAL_DIAL_BACKOFF: Duration = Duration::from_millis(100);

/// Handle to a connected producer-side socket.
#[derive(Debug)]
pub struct SocketClient {
    queue: mpsc::Sender<Bytes>,
    queue_timeout: Duration,
    failed: CancellationToken,
    endpoint: String,
}

impl SocketClient {
    /// Dial the configured endpoint, retrying until the dial timeout, and
    /// start the write task.
    pub async fn connect(
        config: &SocketConfig,
        cancel: CancellationToken,
    ) -> Result<Self, TransportError> {
        let stream = dial_with_retry(config, &cancel).await?;
        let endpoint = config.endpoint();
        info!(endpoint = %endpoint, "Socket client connected");

        let (queue, rx) = mpsc::channel(config.socket_channel_buffer_size.max(1));
        let failed = CancellationToken::new();
        let writer = WriteLoop {
            framed: Framed::new(stream, frame_codec()),
            rx,
            policy: config.send_failure_policy,
            drain_timeout: config.socket_queue_timeout,
            cancel,
            failed: failed.clone(),
            endpoint: endpoint.clone(),
        };
        tokio::spawn(writer.run());

        Ok(Self {
            queue,
            queue_timeout: config.socket_queue_timeout,
            failed,
            endpoint,
        })
    }

    /// Encode and enqueue every event, in order.
    pub async fn send_batch(&self, events: &[Event]) -> Result<(), TransportError> {
        for event in events {
            self.send_frame(Bytes::from(event.to_wire()?)).await?;
        }
        Ok(())
    }

    pub async fn send(&self, event: &Event) -> Result<(), TransportError> {
        self.send_frame(Bytes::from(event.to_wire()?)).await
    }

    /// Enqueue one already-encoded frame.
    pub async fn send_frame(&self, frame: Bytes) -> Result<(), TransportError> {
        if self.failed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        match self.queue.send_timeout(frame, self.queue_timeout).await {
            Ok(()) => Ok(()),
            Err(SendTimeoutError::Timeout(_)) => Err(TransportError::QueueFull {
                timeout: self.queue_timeout,
            }),
            Err(SendTimeoutError::Closed(_)) => Err(TransportError::Closed),
        }
    }

    /// Cancelled once the write task has stopped.
    #[must_use]
    pub fn failed(&self) -> CancellationToken {
        self.failed.clone()
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.failed.is_cancelled()
    }

    #[must_use]
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

async fn dial_with_retry(
    config: &SocketConfig,
    cancel: &CancellationToken,
) -> Result<BoxedIo, TransportError> {
    let mut backoff = ExponentialBackoff {
        initial_interval: INITIAL_DIAL_BACKOFF.min(config.dial_retry_interval),
        max_interval: config.dial_retry_interval,
        max_elapsed_time: Some(config.dial_timeout),
        ..Default::default()
    };
    backoff.reset();

    let mut attempts = 0u32;
    loop {
        attempts += 1;
        let err = match dial(config).await {
            Ok(stream) => return Ok(stream),
            Err(err) => err,
        };

        let Some(delay) = backoff.next_backoff() else {
            error!(
                endpoint = %config.endpoint(),
                attempts,
                error = %err,
                "Giving up connecting socket"
            );
            return Err(TransportError::DialTimeout {
                endpoint: config.endpoint(),
                timeout: config.dial_timeout,
                reason: err.to_string(),
            });
        };
        warn!(
            endpoint = %config.endpoint(),
            attempts,
            retry_in = ?delay,
            error = %err,
            "Socket dial failed, retrying"
        );
        tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

struct WriteLoop {
    framed: Framed<BoxedIo, LengthDelimitedCodec>,
    rx: mpsc::Receiver<Bytes>,
    policy: SendFailurePolicy,
    drain_timeout: Duration,
    cancel: CancellationToken,
    failed: CancellationToken,
    endpoint: String,
}

impl WriteLoop {
    async fn run(mut self) {
        let mut sent: u64 = 0;
        let mut cancelled = false;
        loop {
            let frame = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                frame = self.rx.recv() => match frame {
                    Some(frame) => frame,
                    None => break,
                },
            };

            match self.framed.send(frame).await {
                Ok(()) => sent += 1,
                Err(e) if self.policy.is_fatal(&e) => {
                    error!(endpoint = %self.endpoint, error = %e, "Socket send failed, stopping");
                    break;
                }
                Err(e) => {
                    warn!(endpoint = %self.endpoint, error = %e, "Socket send failed");
                }
            }
        }

        self.failed.cancel();
        self.rx.close();
        if cancelled {
            match tokio::time::timeout(self.drain_timeout, self.drain()).await {
                Ok(drained) => sent += drained,
                Err(_) => warn!(endpoint = %self.endpoint, "Timed out flushing queued frames"),
            }
        }
        match tokio::time::timeout(
            self.drain_timeout,
            SinkExt::<Bytes>::close(&mut self.framed),
        ).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => debug!(endpoint = %self.endpoint, error = %e, "Socket close failed"),
            Err(_) => debug!(endpoint = %self.endpoint, "Socket close timed out"),
        }
        debug!(endpoint = %self.endpoint, frames = sent, "Socket write loop stopped");
    }

    /// Write what is left in the closed queue. Stops at the first error.
    async fn drain(&mut self) -> u64 {
        let mut drained = 0;
        while let Ok(frame) = self.rx.try_recv() {
            if self.framed.feed(frame).await.is_err() {
                break;
            }
            drained += 1;
        }
        if SinkExt::<Bytes>::flush(&mut self.framed).await.is_err() {
            return 0;
        }
        drained
    }
}
