//! # Error Types

use std::path::{Path, PathBuf};

use event_types::{EnvelopeError, SourceError};
use thiserror::Error;

/// Buffer file failures.
#[derive(Debug, Error)]
pub enum BufferError {
    #[error("buffer I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Envelope(#[from] EnvelopeError),

    /// A record does not carry the sequence its position implies.
    #[error("corrupt buffer file {path}: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("buffer directory {path} is in use by another process")]
    Locked { path: PathBuf },

    #[error("invalid buffer configuration: {0}")]
    Config(String),
}

impl BufferError {
    /// Adapter for `map_err` on I/O against `path`.
    pub(crate) fn io(path: &Path) -> impl FnOnce(std::io::Error) -> Self {
        let path = path.to_path_buf();
        move |source| Self::Io { path, source }
    }
}

impl From<BufferError> for SourceError {
    fn from(err: BufferError) -> Self {
        match err {
            BufferError::Envelope(e) => SourceError::Envelope(e),
            other => SourceError::Buffer(other.to_string()),
        }
    }
}
