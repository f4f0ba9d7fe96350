//! # Fan-Out Source
//!
//! Replicates one upstream event source to a fixed number of consumers.
//! Nothing is pulled from upstream until every expected consumer has called
//! `receive`, so all of them see the same stream from the same first event.
//!
//! Every event is checked against the upstream ordering guarantee before it
//! is forwarded; a gap is unrecoverable and ends every output.

use std::sync::Arc;

use async_trait::async_trait;
use event_types::{Event, EventReceiver, EventStream, SourceError};
use parking_lot::Mutex;
use tokio::sync::{mpsc, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

const DEFAULT_OUTPUT_BUFFER: usize = 1_000;

type Output = mpsc::Sender<Result<Arc<Event>, SourceError>>;

// =============================================================================
// SEQUENCE VALIDATION
// =============================================================================

/// Checks that a stream continues each block contiguously.
///
/// Within a block the next sequence is the previous one plus the previous
/// event's composite count. A new block must start at 1. The first event
/// ever seen is accepted as is.
#[derive(Debug, Default)]
pub struct SequenceValidator {
    last: Option<Position>,
}

#[derive(Debug)]
struct Position {
    trace_id: String,
    sequence: u64,
    composite_count: u64,
}

impl SequenceValidator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, event: &Event) -> Result<(), SourceError> {
        let received = event.sequence();
        if let Some(last) = &self.last {
            let expected = if last.trace_id == event.trace_id() {
                last.sequence + last.composite_count
            } else {
                1
            };
            if received != expected {
                return Err(SourceError::NonContiguousSequence {
                    block_nr: event.block_nr(),
                    last: last.sequence,
                    received,
                });
            }
        }
        self.last = Some(Position {
            trace_id: event.trace_id().to_string(),
            sequence: received,
            composite_count: event.composite_count(),
        });
        Ok(())
    }
}

// =============================================================================
// FAN-OUT
// =============================================================================

/// One upstream, `expected` identical downstreams.
pub struct FanOutEventSource<S> {
    source: S,
    expected: usize,
    buffer: usize,
    listened: OnceCell<Result<(), SourceError>>,
    registration: Mutex<Registration>,
}

/// Outputs waiting for the pump. Handed over, not shared, once the last
/// expected consumer registers, so they close when the pump stops.
#[derive(Default)]
struct Registration {
    pending: Vec<Output>,
    registered: usize,
}

impl<S: EventReceiver + 'static> FanOutEventSource<S> {
    #[must_use]
    pub fn new(source: S, expected: usize) -> Self {
        Self::with_buffer(source, expected, DEFAULT_OUTPUT_BUFFER)
    }

    #[must_use]
    pub fn with_buffer(source: S, expected: usize, buffer: usize) -> Self {
        Self {
            source,
            expected: expected.max(1),
            buffer: buffer.max(1),
            listened: OnceCell::new(),
            registration: Mutex::new(Registration::default()),
        }
    }

    #[must_use]
    pub fn expected(&self) -> usize {
        self.expected
    }

    /// Consumers registered so far.
    #[must_use]
    pub fn registered(&self) -> usize {
        self.registration.lock().registered
    }
}

#[async_trait]
impl<S: EventReceiver + 'static> EventReceiver for FanOutEventSource<S> {
    /// Forwarded upstream once; later calls return the first result.
    async fn listen(&self) -> Result<(), SourceError> {
        self.listened
            .get_or_init(|| self.source.listen())
            .await
            .clone()
    }

    /// The `expected`-th call starts the upstream with its own `cancel`.
    fn receive(&self, cancel: CancellationToken) -> EventStream {
        let (tx, rx) = mpsc::channel(self.buffer);

        let ready = {
            let mut registration = self.registration.lock();
            if registration.registered >= self.expected {
                let _ = tx.try_send(Err(SourceError::TooManySubscribers {
                    expected: self.expected,
                }));
                return rx;
            }
            registration.pending.push(tx);
            registration.registered += 1;
            debug!(
                registered = registration.registered,
                expected = self.expected,
                "Fan-out consumer registered"
            );
            (registration.registered == self.expected)
                .then(|| std::mem::take(&mut registration.pending))
        };

        if let Some(outputs) = ready {
            info!(consumers = outputs.len(), "Fan-out starting upstream");
            let pump = Pump {
                upstream: self.source.receive(cancel.clone()),
                outputs,
                validator: SequenceValidator::new(),
                cancel,
            };
            tokio::spawn(pump.run());
        }
        rx
    }
}

struct Pump {
    upstream: EventStream,
    outputs: Vec<Output>,
    validator: SequenceValidator,
    cancel: CancellationToken,
}

impl Pump {
    async fn run(mut self) {
        loop {
            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                item = self.upstream.recv() => match item {
                    Some(item) => item,
                    None => break,
                },
            };

            let item = item.and_then(|event| {
                self.validator.check(&event)?;
                Ok(event)
            });
            let terminal = item.is_err();
            if let Err(e) = &item {
                error!(error = %e, "Fan-out upstream failed");
            }

            if !self.broadcast(item).await || terminal {
                break;
            }
        }
        debug!("Fan-out stopped");
    }

    /// Send to every live output. `false` once none is left or on cancel.
    async fn broadcast(&mut self, item: Result<Arc<Event>, SourceError>) -> bool {
        let mut live = Vec::with_capacity(self.outputs.len());
        for output in self.outputs.drain(..) {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                sent = output.send(item.clone()) => {
                    if sent.is_ok() {
                        live.push(output);
                    }
                }
            }
        }
        self.outputs = live;
        !self.outputs.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use event_types::{EventPayload, LedgerMovement, Party, TraceContext};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Upstream fed through a channel, counting `listen` calls.
    struct Upstream {
        rx: Mutex<Option<EventStream>>,
        listens: AtomicUsize,
    }

    impl Upstream {
        fn new() -> (Self, mpsc::Sender<Result<Arc<Event>, SourceError>>) {
            let (tx, rx) = mpsc::channel(64);
            let upstream = Self {
                rx: Mutex::new(Some(rx)),
                listens: AtomicUsize::new(0),
            };
            (upstream, tx)
        }
    }

    #[async_trait]
    impl EventReceiver for Upstream {
        async fn listen(&self) -> Result<(), SourceError> {
            self.listens.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn receive(&self, _cancel: CancellationToken) -> EventStream {
            self.rx.lock().take().unwrap()
        }
    }

    fn event(trace: &str, seq: u64) -> Arc<Event> {
        let ctx = TraceContext::new(trace).with_block_nr(1);
        Arc::new(Event::new(&ctx, EventPayload::Party(Party { id: format!("{trace}-{seq}") })).with_sequence(seq))
    }

    async fn recv(stream: &mut EventStream) -> Option<Result<Arc<Event>, SourceError>> {
        tokio::time::timeout(Duration::from_secs(5), stream.recv())
            .await
            .unwrap()
    }

    #[test]
    fn test_validator_accepts_contiguous_blocks() {
        let mut validator = SequenceValidator::new();
        // The first event may start anywhere.
        validator.check(&event("A", 7)).unwrap();
        validator.check(&event("A", 8)).unwrap();
        validator.check(&event("B", 1)).unwrap();
        validator.check(&event("B", 2)).unwrap();
    }

    #[test]
    fn test_validator_rejects_gaps_and_bad_block_starts() {
        let mut validator = SequenceValidator::new();
        validator.check(&event("A", 1)).unwrap();
        assert_eq!(
            validator.check(&event("A", 3)),
            Err(SourceError::NonContiguousSequence {
                block_nr: 1,
                last: 1,
                received: 3,
            })
        );

        let mut validator = SequenceValidator::new();
        validator.check(&event("A", 1)).unwrap();
        assert!(validator.check(&event("B", 2)).is_err());
    }

    #[test]
    fn test_validator_skips_composite_range() {
        let ctx = TraceContext::new("A");
        let movements = Event::new(
            &ctx,
            EventPayload::LedgerMovements(vec![LedgerMovement::default(); 3]),
        )
        .with_sequence(1);

        let mut validator = SequenceValidator::new();
        validator.check(&movements).unwrap();
        validator.check(&event("A", 4)).unwrap();
    }

    #[tokio::test]
    async fn test_nothing_flows_until_all_consumers_registered() {
        let (upstream, feed) = Upstream::new();
        let fanout = FanOutEventSource::new(upstream, 2);
        let cancel = CancellationToken::new();

        feed.send(Ok(event("A", 1))).await.unwrap();
        let mut first = fanout.receive(cancel.clone());
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(first.try_recv().is_err());
        assert_eq!(fanout.registered(), 1);

        let mut second = fanout.receive(cancel.clone());
        feed.send(Ok(event("A", 2))).await.unwrap();
        drop(feed);

        for output in [&mut first, &mut second] {
            assert_eq!(recv(output).await.unwrap().unwrap(), event("A", 1));
            assert_eq!(recv(output).await.unwrap().unwrap(), event("A", 2));
            assert!(recv(output).await.is_none());
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_outputs_end_when_upstream_ends() {
        let (upstream, feed) = Upstream::new();
        drop(feed);
        let fanout = FanOutEventSource::new(upstream, 1);
        let cancel = CancellationToken::new();

        let mut only = fanout.receive(cancel.clone());
        assert!(recv(&mut only).await.is_none());

        // The source still refuses consumers past the expected count.
        let mut late = fanout.receive(cancel.clone());
        assert_eq!(
            recv(&mut late).await.unwrap().unwrap_err(),
            SourceError::TooManySubscribers { expected: 1 }
        );
        assert_eq!(fanout.registered(), 1);
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_extra_consumer_is_rejected() {
        let (upstream, _feed) = Upstream::new();
        let fanout = FanOutEventSource::new(upstream, 2);
        let cancel = CancellationToken::new();

        let _first = fanout.receive(cancel.clone());
        let _second = fanout.receive(cancel.clone());
        let mut third = fanout.receive(cancel.clone());
        assert_eq!(
            recv(&mut third).await.unwrap().unwrap_err(),
            SourceError::TooManySubscribers { expected: 2 }
        );
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_listen_reaches_upstream_once() {
        let (upstream, _feed) = Upstream::new();
        let upstream = Arc::new(upstream);
        let fanout = FanOutEventSource::new(Arc::clone(&upstream), 3);

        for _ in 0..3 {
            fanout.listen().await.unwrap();
        }
        assert_eq!(upstream.listens.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_gap_fails_every_output() {
        let (upstream, feed) = Upstream::new();
        let fanout = FanOutEventSource::new(upstream, 2);
        let cancel = CancellationToken::new();
        let mut first = fanout.receive(cancel.clone());
        let mut second = fanout.receive(cancel.clone());

        feed.send(Ok(event("A", 1))).await.unwrap();
        feed.send(Ok(event("A", 3))).await.unwrap();

        for output in [&mut first, &mut second] {
            assert!(recv(output).await.unwrap().is_ok());
            assert!(matches!(
                recv(output).await.unwrap(),
                Err(SourceError::NonContiguousSequence { last: 1, received: 3, .. })
            ));
            assert!(recv(output).await.is_none());
        }
        cancel.cancel();
    }

    #[tokio::test]
    async fn test_upstream_error_reaches_every_output() {
        let (upstream, feed) = Upstream::new();
        let fanout = FanOutEventSource::new(upstream, 2);
        let cancel = CancellationToken::new();
        let mut first = fanout.receive(cancel.clone());
        let mut second = fanout.receive(cancel.clone());

        let err = SourceError::DeadPeer { timeouts: 4 };
        feed.send(Err(err.clone())).await.unwrap();

        for output in [&mut first, &mut second] {
            assert_eq!(recv(output).await.unwrap().unwrap_err(), err);
        }
        cancel.cancel();
    }
}
