//! Exclusive ownership of an on-disk keyspace
//!
//! Fjall keeps its memtables and journal in process memory, so two processes
//! opening the same directory never see each other's writes and can corrupt
//! the journal. Every keyspace this crate opens is guarded by an advisory
//! lock on `<dir>/packagebug.lock`, released when the owner is dropped.

use std::fs::{self, File, OpenOptions, TryLockError};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

const LOCK_FILE: &str = "packagebug.lock";

#[derive(Debug, Error)]
pub enum LockError {
    #[error("{} is in use by another process", path.display())]
    Held { path: PathBuf },

    #[error("Failed to lock {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl LockError {
    pub fn is_held(&self) -> bool {
        matches!(self, LockError::Held { .. })
    }
}

/// Held lock on a keyspace directory
#[derive(Debug)]
pub struct DirLock {
    _file: File,
    path: PathBuf,
}

impl DirLock {
    /// Take the lock without blocking, creating `dir` if needed
    pub fn acquire(dir: &Path) -> Result<Self, LockError> {
        let io_error = |source: std::io::Error| LockError::Io {
            path: dir.to_path_buf(),
            source,
        };

        fs::create_dir_all(dir).map_err(io_error)?;

        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))
            .map_err(io_error)?;

        match file.try_lock() {
            Ok(()) => {}
            Err(TryLockError::WouldBlock) => {
                return Err(LockError::Held {
                    path: dir.to_path_buf(),
                });
            }
            Err(TryLockError::Error(source)) => return Err(io_error(source)),
        }

        debug!(path = %dir.display(), "Keyspace lock acquired");

        Ok(Self {
            _file: file,
            path: dir.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
