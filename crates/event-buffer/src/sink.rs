//! # File Sink
//!
//! Producer-side file mirror: every event the broker streams is appended as a
//! plain record. The replay source reads the same format back.

use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use event_types::Event;
use tracing::info;

use crate::errors::BufferError;
use crate::record::{Framing, RecordWriter};

/// Append-only plain-record file.
#[derive(Debug)]
pub struct FileSink {
    path: PathBuf,
    writer: RecordWriter<BufWriter<File>>,
    written: u64,
}

impl FileSink {
    /// Create (or truncate) the file, creating parent directories.
    pub fn create(path: &Path) -> Result<Self, BufferError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(BufferError::io(parent))?;
        }
        let file = File::create(path).map_err(BufferError::io(path))?;
        info!(path = %path.display(), "File sink opened");
        Ok(Self {
            path: path.to_path_buf(),
            writer: RecordWriter::new(BufWriter::new(file), Framing::Plain),
            written: 0,
        })
    }

    /// Append every event and flush.
    pub fn write_batch(&mut self, events: &[Event]) -> Result<(), BufferError> {
        for event in events {
            let payload = event.to_wire()?;
            self.writer
                .write_record(event.sequence(), &payload)
                .map_err(BufferError::io(&self.path))?;
            self.written += 1;
        }
        self.writer.flush().map_err(BufferError::io(&self.path))
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Records written since creation.
    #[must_use]
    pub fn written(&self) -> u64 {
        self.written
    }
}
