//! # Buffer Configuration

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::BufferError;

const DEFAULT_EVENTS_PER_FILE: u64 = 10_000;
const DEFAULT_SEND_CHANNEL_BUFFER_SIZE: usize = 1_000;
const DEFAULT_MAX_BUFFERED_EVENTS: u64 = 1_000_000;
const DEFAULT_ARCHIVE_MAXIMUM_SIZE_BYTES: u64 = 1024 * 1024 * 1024;

/// Durable write-ahead buffer between a raw source and its consumers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    pub enabled: bool,

    /// Directory holding the buffer files. Emptied on start.
    pub dir: PathBuf,

    /// Records per buffer file before rolling.
    pub events_per_file: u64,

    /// Capacity of the channel between the reader and the consumer.
    pub send_channel_buffer_size: usize,

    /// The writer pauses while this many events are buffered but unsent.
    pub max_buffered_events: u64,

    /// Compress consumed files into `<dir>/archive/` instead of deleting them.
    pub archive: bool,

    /// Oldest archives are removed once the archive grows past this.
    pub archive_maximum_size_bytes: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("./eventsbuffer"),
            events_per_file: DEFAULT_EVENTS_PER_FILE,
            send_channel_buffer_size: DEFAULT_SEND_CHANNEL_BUFFER_SIZE,
            max_buffered_events: DEFAULT_MAX_BUFFERED_EVENTS,
            archive: false,
            archive_maximum_size_bytes: DEFAULT_ARCHIVE_MAXIMUM_SIZE_BYTES,
        }
    }
}

impl BufferConfig {
    pub fn validate(&self) -> Result<(), BufferError> {
        if self.events_per_file == 0 {
            return Err(BufferError::Config("events_per_file must be positive".into()));
        }
        if self.max_buffered_events == 0 {
            return Err(BufferError::Config(
                "max_buffered_events must be positive".into(),
            ));
        }
        if self.send_channel_buffer_size == 0 {
            return Err(BufferError::Config(
                "send_channel_buffer_size must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Where consumed files are archived.
    #[must_use]
    pub fn archive_dir(&self) -> PathBuf {
        self.dir.join("archive")
    }
}

/// Replay of a directory of pre-recorded buffer files.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReplayConfig {
    pub enabled: bool,

    pub dir: PathBuf,

    /// Pause before each block after the first.
    pub time_between_blocks: Duration,

    /// Every record must carry this chain ID. Empty disables the check.
    pub chain_id: String,

    pub send_channel_buffer_size: usize,
}

impl Default for ReplayConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            dir: PathBuf::from("./replay"),
            time_between_blocks: Duration::ZERO,
            chain_id: String::new(),
            send_channel_buffer_size: DEFAULT_SEND_CHANNEL_BUFFER_SIZE,
        }
    }
}
