//! # Buffered Event Source
//!
//! Durable write-ahead buffer between a raw source and its consumer, letting
//! the two run at different rates bounded only by disk.
//!
//! ```text
//! upstream ──▶ writer ──▶ datanode-buffer-000000000001-000000010000
//!                │        datanode-buffer-000000010001-000000020000 ──▶ reader ──▶ consumer
//!                └── last buffered sequence (watch) ─────────────────────▶│
//!                ◀── last sent sequence (watch) ───────────────────────────┘
//! ```
//!
//! The writer numbers records with its own buffer sequence, rolls files every
//! `events_per_file` records and publishes only the latest buffered sequence.
//! The reader follows, treating a partial record as "not flushed yet", and
//! deletes (or archives) a file once its last record has been sent. When
//! caught up it waits on the writer's signal instead of polling.
//!
//! An upstream failure is recorded by the writer and surfaced by the reader
//! only after every record buffered before it has been delivered.

use std::fs::File;
use std::io::BufWriter;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use event_types::{RawEventReceiver, RawEventStream, SourceError};
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace};

use crate::archive::Archiver;
use crate::config::BufferConfig;
use crate::errors::BufferError;
use crate::files::{file_name, list_buffer_files, range_for, DirLock};
use crate::record::{Framing, RecordReader, RecordWriter};

/// Reader back-off after a partial record.
const PARTIAL_READ_BACKOFF: Duration = Duration::from_millis(10);

/// What the writer tells the reader.
#[derive(Debug, Clone, Default)]
struct WriterState {
    last_buffered: u64,
    /// Upstream or write failure, delivered after everything before it.
    error: Option<SourceError>,
    /// The writer has stopped.
    done: bool,
}

/// File-buffered wrapper around a raw source.
#[derive(Debug)]
pub struct BufferedEventSource<R> {
    source: R,
    config: BufferConfig,
    lock: Mutex<Option<DirLock>>,
    receiving: AtomicBool,
}

impl<R: RawEventReceiver> BufferedEventSource<R> {
    pub fn new(source: R, config: BufferConfig) -> Result<Self, BufferError> {
        config.validate()?;
        Ok(Self {
            source,
            config,
            lock: Mutex::new(None),
            receiving: AtomicBool::new(false),
        })
    }

    #[must_use]
    pub fn config(&self) -> &BufferConfig {
        &self.config
    }

    /// Create and lock the buffer directory and clear files left by a
    /// previous run.
    fn prepare_dir(&self) -> Result<(), BufferError> {
        let dir = &self.config.dir;
        std::fs::create_dir_all(dir).map_err(BufferError::io(dir))?;
        let lock = DirLock::acquire(dir)?;

        let stale = list_buffer_files(dir)?;
        for path in &stale {
            std::fs::remove_file(path).map_err(BufferError::io(path))?;
        }
        if !stale.is_empty() {
            info!(dir = %dir.display(), files = stale.len(), "Removed stale buffer files");
        }
        *self.lock.lock() = Some(lock);
        Ok(())
    }
}

#[async_trait]
impl<R: RawEventReceiver> RawEventReceiver for BufferedEventSource<R> {
    async fn listen(&self) -> Result<(), SourceError> {
        self.prepare_dir()?;
        self.source.listen().await
    }

    fn receive(&self, cancel: CancellationToken) -> RawEventStream {
        let (tx, rx) = mpsc::channel(self.config.send_channel_buffer_size.max(1));
        if self.receiving.swap(true, Ordering::AcqRel) {
            let _ = tx.try_send(Err(SourceError::AlreadyReceiving));
            return rx;
        }

        let archiver = if self.config.archive {
            match Archiver::new(self.config.archive_dir(), self.config.archive_maximum_size_bytes) {
                Ok(archiver) => Some(archiver),
                Err(e) => {
                    let _ = tx.try_send(Err(e.into()));
                    return rx;
                }
            }
        } else {
            None
        };

        let (state_tx, state_rx) = watch::channel(WriterState::default());
        let (sent_tx, sent_rx) = watch::channel(0u64);

        let writer = BufferWriter {
            upstream: self.source.receive(cancel.clone()),
            dir: self.config.dir.clone(),
            events_per_file: self.config.events_per_file,
            max_buffered: self.config.max_buffered_events,
            state: state_tx,
            sent: sent_rx,
            cancel: cancel.clone(),
        };
        let reader = BufferReader {
            dir: self.config.dir.clone(),
            events_per_file: self.config.events_per_file,
            state: state_rx,
            sent: sent_tx,
            out: tx,
            archiver,
            cancel,
        };
        tokio::spawn(writer.run());
        tokio::spawn(reader.run());
        rx
    }
}

// =============================================================================
// WRITER
// =============================================================================

struct BufferWriter {
    upstream: RawEventStream,
    dir: PathBuf,
    events_per_file: u64,
    max_buffered: u64,
    state: watch::Sender<WriterState>,
    sent: watch::Receiver<u64>,
    cancel: CancellationToken,
}

struct OpenFile {
    last: u64,
    path: PathBuf,
    writer: RecordWriter<BufWriter<File>>,
}

impl BufferWriter {
    async fn run(mut self) {
        let error = self.write_loop().await.err();
        if let Some(e) = &error {
            error!(error = %e, "Event buffer writer stopped");
        }
        self.state.send_modify(|state| {
            state.error = error;
            state.done = true;
        });
    }

    async fn write_loop(&mut self) -> Result<(), SourceError> {
        let mut sequence: u64 = 0;
        let mut current: Option<OpenFile> = None;

        loop {
            if !self.wait_for_room(sequence).await {
                return Ok(());
            }

            let item = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                item = self.upstream.recv() => match item {
                    Some(item) => item,
                    None => return Ok(()),
                },
            };
            let frame = item?;

            sequence += 1;
            let file = match current.take() {
                Some(file) if sequence <= file.last => file,
                _ => self.open_file(sequence)?,
            };
            let file = current.insert(file);

            file.writer
                .write_record(sequence, &frame)
                .and_then(|()| file.writer.flush())
                .map_err(BufferError::io(&file.path))?;

            trace!(sequence, "Buffered event");
            self.state.send_modify(|state| state.last_buffered = sequence);
            if self.state.is_closed() {
                return Ok(());
            }
        }
    }

    /// Wait while too many events are buffered but unsent. `false` on cancel
    /// or once the reader is gone.
    async fn wait_for_room(&mut self, buffered: u64) -> bool {
        loop {
            let sent = *self.sent.borrow_and_update();
            if buffered.saturating_sub(sent) < self.max_buffered {
                return true;
            }
            trace!(buffered, sent, "Event buffer full, waiting for reader");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return false,
                changed = self.sent.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
            }
        }
    }

    fn open_file(&self, sequence: u64) -> Result<OpenFile, BufferError> {
        let (first, last) = range_for(sequence, self.events_per_file);
        let path = self.dir.join(file_name(first, last));
        let file = File::create(&path).map_err(BufferError::io(&path))?;
        debug!(file = %path.display(), "Rolled to new buffer file");
        Ok(OpenFile {
            last,
            path,
            writer: RecordWriter::new(BufWriter::new(file), Framing::Sequenced),
        })
    }
}

// =============================================================================
// READER
// =============================================================================

struct BufferReader {
    dir: PathBuf,
    events_per_file: u64,
    state: watch::Receiver<WriterState>,
    sent: watch::Sender<u64>,
    out: mpsc::Sender<Result<Bytes, SourceError>>,
    archiver: Option<Archiver>,
    cancel: CancellationToken,
}

struct ReadFile {
    last: u64,
    path: PathBuf,
    reader: RecordReader<File>,
}

impl BufferReader {
    async fn run(mut self) {
        if let Err(e) = self.read_loop().await {
            error!(error = %e, "Event buffer reader stopped");
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {}
                _ = self.out.send(Err(e)) => {}
            }
        }
    }

    async fn read_loop(&mut self) -> Result<(), SourceError> {
        let mut last_sent: u64 = 0;
        let mut current: Option<ReadFile> = None;

        loop {
            let state = self.state.borrow_and_update().clone();
            if last_sent >= state.last_buffered {
                if let Some(e) = state.error {
                    return Err(e);
                }
                if state.done {
                    return Ok(());
                }
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(()),
                    changed = self.state.changed() => {
                        if changed.is_err() {
                            return Ok(());
                        }
                    }
                }
                continue;
            }

            let next = last_sent + 1;
            let file = match current.take() {
                Some(file) => file,
                None => self.open_file(next)?,
            };
            let file = current.insert(file);

            let Some(record) = file
                .reader
                .next_record()
                .map_err(BufferError::io(&file.path))?
            else {
                tokio::select! {
                    biased;
                    _ = self.cancel.cancelled() => return Ok(()),
                    _ = tokio::time::sleep(PARTIAL_READ_BACKOFF) => {}
                }
                continue;
            };

            if record.sequence != Some(next) {
                return Err(BufferError::Corrupt {
                    path: file.path.clone(),
                    reason: format!("expected sequence {next}, found {:?}", record.sequence),
                }
                .into());
            }

            let completes_file = next == file.last;
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(()),
                sent = self.out.send(Ok(Bytes::from(record.payload))) => {
                    if sent.is_err() {
                        return Ok(());
                    }
                }
            }
            last_sent = next;
            self.sent.send_replace(last_sent);

            if completes_file {
                if let Some(done) = current.take() {
                    self.finish_file(done)?;
                }
            }
        }
    }

    fn open_file(&self, sequence: u64) -> Result<ReadFile, BufferError> {
        let (first, last) = range_for(sequence, self.events_per_file);
        let path = self.dir.join(file_name(first, last));
        let file = File::open(&path).map_err(BufferError::io(&path))?;
        Ok(ReadFile {
            last,
            path,
            reader: RecordReader::new(file, Framing::Sequenced),
        })
    }

    /// Delete or archive a fully consumed file.
    fn finish_file(&self, file: ReadFile) -> Result<(), BufferError> {
        let ReadFile { path, reader, .. } = file;
        drop(reader);
        match &self.archiver {
            Some(archiver) => {
                archiver.archive(&path)?;
            }
            None => {
                std::fs::remove_file(&path).map_err(BufferError::io(&path))?;
                debug!(file = %path.display(), "Removed consumed buffer file");
            }
        }
        Ok(())
    }
}
