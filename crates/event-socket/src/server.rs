//! # Socket Server
//!
//! Consumer side of the transport. Accepts exactly one connection and streams
//! its raw frames. Consecutive receive timeouts beyond the configured
//! threshold mean the peer is dead, not slow.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use event_types::{RawEventReceiver, RawEventStream, SourceError};
use futures::StreamExt;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::codec::FramedRead;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::SocketConfig;
use crate::connection::{frame_codec, Listener};
use crate::errors::TransportError;

/// Single-connection event server.
#[derive(Debug)]
pub struct SocketServer {
    config: SocketConfig,
    listener: Mutex<Option<Listener>>,
    local_addr: Mutex<Option<SocketAddr>>,
    receiving: AtomicBool,
}

impl SocketServer {
    #[must_use]
    pub fn new(config: SocketConfig) -> Self {
        Self {
            config,
            listener: Mutex::new(None),
            local_addr: Mutex::new(None),
            receiving: AtomicBool::new(false),
        }
    }

    /// Bound TCP address once listening. Useful with port 0.
    #[must_use]
    pub fn local_addr(&self) -> Option<SocketAddr> {
        *self.local_addr.lock()
    }
}

#[async_trait]
impl RawEventReceiver for SocketServer {
    async fn listen(&self) -> Result<(), SourceError> {
        let listener = Listener::bind(&self.config).await?;
        let addr = listener.local_addr();
        info!(endpoint = %self.config.endpoint(), local_addr = ?addr, "Socket server listening");
        *self.local_addr.lock() = addr;
        *self.listener.lock() = Some(listener);
        Ok(())
    }

    fn receive(&self, cancel: CancellationToken) -> RawEventStream {
        let (tx, rx) = mpsc::channel(self.config.event_channel_buffer_size.max(1));

        if self.receiving.swap(true, Ordering::AcqRel) {
            let _ = tx.try_send(Err(SourceError::AlreadyReceiving));
            return rx;
        }
        let Some(listener) = self.listener.lock().take() else {
            let _ = tx.try_send(Err(SourceError::Transport(
                "socket server is not listening".to_string(),
            )));
            return rx;
        };

        let reader = ReadLoop {
            listener,
            tx,
            cancel,
            config: self.config.clone(),
        };
        tokio::spawn(reader.run());
        rx
    }
}

struct ReadLoop {
    listener: Listener,
    tx: mpsc::Sender<Result<Bytes, SourceError>>,
    cancel: CancellationToken,
    config: SocketConfig,
}

impl ReadLoop {
    async fn run(self) {
        let ReadLoop {
            listener,
            tx,
            cancel,
            config,
        } = self;

        let stream = tokio::select! {
            _ = cancel.cancelled() => return,
            accepted = listener.accept() => match accepted {
                Ok(stream) => stream,
                Err(e) => {
                    let _ = tx.send(Err(TransportError::Io(e).into())).await;
                    return;
                }
            },
        };
        // One connection only.
        drop(listener);
        info!(endpoint = %config.endpoint(), "Socket server accepted connection");

        let mut frames = FramedRead::new(stream, frame_codec());
        let mut timeouts: u32 = 0;
        let mut received: u64 = 0;

        loop {
            let next = tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                next = tokio::time::timeout(config.receive_timeout, frames.next()) => next,
            };

            let item = match next {
                Err(_elapsed) => {
                    timeouts += 1;
                    if timeouts > config.max_receive_timeouts {
                        let err = TransportError::DeadPeer { timeouts };
                        warn!(endpoint = %config.endpoint(), timeouts, "Peer is dead");
                        let _ = tx.send(Err(err.into())).await;
                        break;
                    }
                    debug!(timeouts, "Socket receive timed out");
                    continue;
                }
                Ok(None) => Err(SourceError::Transport(
                    "connection closed by peer".to_string(),
                )),
                Ok(Some(Err(e))) => Err(TransportError::Io(e).into()),
                Ok(Some(Ok(frame))) => {
                    timeouts = 0;
                    received += 1;
                    Ok(frame.freeze())
                }
            };

            let terminal = item.is_err();
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                sent = tx.send(item) => {
                    if sent.is_err() {
                        break;
                    }
                }
            }
            if terminal {
                break;
            }
        }
        debug!(frames = received, "Socket read loop stopped");
    }
}
