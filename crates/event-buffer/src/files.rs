//! # Buffer File Naming
//!
//! `datanode-buffer-{first:012}-{last:012}`: the file covering any buffer
//! sequence is computable, and lexical order is sequence order.

use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::errors::BufferError;

/// Prefix of every buffer file.
pub const FILE_PREFIX: &str = "datanode-buffer-";

/// Name of the directory lock file.
const LOCK_FILE: &str = ".lock";

/// File name for the range `first..=last`.
#[must_use]
pub fn file_name(first: u64, last: u64) -> String {
    format!("{FILE_PREFIX}{first:012}-{last:012}")
}

/// The `first..=last` range of the file holding `sequence` (1-based).
#[must_use]
pub fn range_for(sequence: u64, events_per_file: u64) -> (u64, u64) {
    let first = ((sequence.saturating_sub(1)) / events_per_file) * events_per_file + 1;
    (first, first + events_per_file - 1)
}

/// Parse a buffer file name back into its range.
#[must_use]
pub fn parse_file_name(name: &str) -> Option<(u64, u64)> {
    let rest = name.strip_prefix(FILE_PREFIX)?;
    let (first, last) = rest.split_once('-')?;
    Some((first.parse().ok()?, last.parse().ok()?))
}

/// Buffer files in `dir`, in sequence order.
pub fn list_buffer_files(dir: &Path) -> Result<Vec<PathBuf>, BufferError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(BufferError::io(dir))? {
        let entry = entry.map_err(BufferError::io(dir))?;
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        if path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(FILE_PREFIX))
        {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Every regular, non-hidden file in `dir`, sorted by name.
pub fn list_files(dir: &Path) -> Result<Vec<PathBuf>, BufferError> {
    let mut files = Vec::new();
    for entry in std::fs::read_dir(dir).map_err(BufferError::io(dir))? {
        let path = entry.map_err(BufferError::io(dir))?.path();
        let hidden = path
            .file_name()
            .and_then(|n| n.to_str())
            .map_or(true, |n| n.starts_with('.'));
        if path.is_file() && !hidden {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Exclusive advisory lock on a buffer directory, released on drop.
#[derive(Debug)]
pub struct DirLock {
    file: std::fs::File,
    path: PathBuf,
}

impl DirLock {
    pub fn acquire(dir: &Path) -> Result<Self, BufferError> {
        let path = dir.join(LOCK_FILE);
        let file = std::fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(BufferError::io(&path))?;
        file.try_lock_exclusive()
            .map_err(|_| BufferError::Locked {
                path: dir.to_path_buf(),
            })?;
        Ok(Self { file, path })
    }
}

impl Drop for DirLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
        let _ = std::fs::remove_file(&self.path);
    }
}
