//! # Buffer Archive
//!
//! Fully consumed buffer files are zstd-compressed into the archive
//! directory. The archive is capped; oldest files go first.

use std::path::{Path, PathBuf};

use tracing::{debug, info};

use crate::errors::BufferError;
use crate::files::list_files;

/// zstd level for archived buffer files.
const COMPRESSION_LEVEL: i32 = 3;

/// Extension of archived files.
pub const ARCHIVE_EXTENSION: &str = "zst";

#[derive(Debug, Clone)]
pub struct Archiver {
    dir: PathBuf,
    max_size_bytes: u64,
}

impl Archiver {
    /// Create the archive directory if needed.
    pub fn new(dir: PathBuf, max_size_bytes: u64) -> Result<Self, BufferError> {
        std::fs::create_dir_all(&dir).map_err(BufferError::io(&dir))?;
        Ok(Self {
            dir,
            max_size_bytes,
        })
    }

    /// Compress `path` into the archive, remove the original and enforce the
    /// size cap.
    pub fn archive(&self, path: &Path) -> Result<PathBuf, BufferError> {
        let data = std::fs::read(path).map_err(BufferError::io(path))?;
        let compressed =
            zstd::encode_all(data.as_slice(), COMPRESSION_LEVEL).map_err(BufferError::io(path))?;

        let name = path
            .file_name()
            .map(|n| format!("{}.{ARCHIVE_EXTENSION}", n.to_string_lossy()))
            .ok_or_else(|| BufferError::Config(format!("{} has no file name", path.display())))?;
        let target = self.dir.join(name);
        std::fs::write(&target, compressed).map_err(BufferError::io(&target))?;
        std::fs::remove_file(path).map_err(BufferError::io(path))?;
        debug!(file = %target.display(), "Archived buffer file");

        self.enforce_cap()?;
        Ok(target)
    }

    /// Remove the oldest archives until the archive fits the cap.
    fn enforce_cap(&self) -> Result<(), BufferError> {
        let mut files: Vec<(PathBuf, u64)> = Vec::new();
        for path in list_files(&self.dir)? {
            let size = std::fs::metadata(&path)
                .map_err(BufferError::io(&path))?
                .len();
            files.push((path, size));
        }

        let mut total: u64 = files.iter().map(|(_, size)| size).sum();
        for (path, size) in files {
            if total <= self.max_size_bytes {
                break;
            }
            std::fs::remove_file(&path).map_err(BufferError::io(&path))?;
            total -= size;
            info!(file = %path.display(), "Removed archived buffer file over size cap");
        }
        Ok(())
    }
}

/// Decompress an archived buffer file.
pub fn read_archive(path: &Path) -> Result<Vec<u8>, BufferError> {
    let data = std::fs::read(path).map_err(BufferError::io(path))?;
    zstd::decode_all(data.as_slice()).map_err(BufferError::io(path))
}
