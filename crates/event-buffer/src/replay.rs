//! # Buffer File Replay
//!
//! Replays a directory of recorded event files (the file mirror's plain
//! format) in file-name order. A recording need not start on a block
//! boundary, so everything before the first `BeginBlock` is dropped. Blocks
//! after the first are paced by `time_between_blocks`.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use event_types::{Event, EventReceiver, EventStream, EventType, SourceError};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ReplayConfig;
use crate::errors::BufferError;
use crate::files::list_files;
use crate::record::{Framing, RecordReader};

/// Event source over pre-recorded buffer files.
#[derive(Debug)]
pub struct BufferFilesEventSource {
    config: ReplayConfig,
    files: Mutex<Option<Vec<PathBuf>>>,
    receiving: AtomicBool,
}

impl BufferFilesEventSource {
    #[must_use]
    pub fn new(config: ReplayConfig) -> Self {
        Self {
            config,
            files: Mutex::new(None),
            receiving: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl EventReceiver for BufferFilesEventSource {
    async fn listen(&self) -> Result<(), SourceError> {
        let files = list_files(&self.config.dir)?;
        info!(dir = %self.config.dir.display(), files = files.len(), "Replaying buffer files");
        *self.files.lock() = Some(files);
        Ok(())
    }

    fn receive(&self, cancel: CancellationToken) -> EventStream {
        let (tx, rx) = mpsc::channel(self.config.send_channel_buffer_size.max(1));
        if self.receiving.swap(true, Ordering::AcqRel) {
            let _ = tx.try_send(Err(SourceError::AlreadyReceiving));
            return rx;
        }
        let Some(files) = self.files.lock().take() else {
            let _ = tx.try_send(Err(SourceError::Buffer(
                "replay source is not listening".to_string(),
            )));
            return rx;
        };

        let replay = Replay {
            files,
            config: self.config.clone(),
            tx,
            cancel,
            aligned: false,
        };
        tokio::spawn(replay.run());
        rx
    }
}

struct Replay {
    files: Vec<PathBuf>,
    config: ReplayConfig,
    tx: mpsc::Sender<Result<Arc<Event>, SourceError>>,
    cancel: CancellationToken,
    /// A `BeginBlock` has been seen.
    aligned: bool,
}

impl Replay {
    async fn run(mut self) {
        let files = std::mem::take(&mut self.files);
        for path in files {
            match self.replay_file(&path).await {
                Ok(true) => {}
                Ok(false) => return,
                Err(e) => {
                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {}
                        _ = self.tx.send(Err(e)) => {}
                    }
                    return;
                }
            }
        }
        info!("Buffer file replay finished");
    }

    /// `Ok(false)` once the consumer is gone or replay was cancelled.
    async fn replay_file(&mut self, path: &Path) -> Result<bool, SourceError> {
        debug!(file = %path.display(), "Replaying buffer file");
        let file = File::open(path).map_err(BufferError::io(path))?;
        let mut reader = RecordReader::new(BufReader::new(file), Framing::Plain);

        loop {
            let Some(record) = reader.next_record().map_err(BufferError::io(path))? else {
                if !reader.at_end().map_err(BufferError::io(path))? {
                    warn!(file = %path.display(), "Buffer file ends in a partial record, skipping rest");
                }
                return Ok(true);
            };

            let event = Event::from_wire(&record.payload)?;
            if !self.config.chain_id.is_empty() && event.chain_id() != self.config.chain_id {
                return Err(SourceError::ChainIdMismatch {
                    expected: self.config.chain_id.clone(),
                    actual: event.chain_id().to_string(),
                });
            }

            if event.event_type() == EventType::BeginBlock {
                if self.aligned && !self.pause_between_blocks().await {
                    return Ok(false);
                }
                self.aligned = true;
            }
            if !self.aligned {
                continue;
            }

            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Ok(false),
                sent = self.tx.send(Ok(Arc::new(event))) => {
                    if sent.is_err() {
                        return Ok(false);
                    }
                }
            }
        }
    }

    /// `false` if cancelled while waiting.
    async fn pause_between_blocks(&self) -> bool {
        if self.config.time_between_blocks.is_zero() {
            return !self.cancel.is_cancelled();
        }
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep(self.config.time_between_blocks) => true,
        }
    }
}
