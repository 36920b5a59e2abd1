//! File-backed commit log.
//!
//! A persistent graph lives in a directory holding two files:
//!
//! ```text
//! <dir>/graph.lock   advisory lock, one open handle per directory
//! <dir>/graph.wal    write-ahead log of declarations and commits
//! ```
//!
//! The in-memory store is rebuilt from `graph.wal` on open; there are no
//! separate data files.

mod codec;
mod file_lock;
mod wal;

pub use file_lock::{DirectoryLock, LOCK_FILE};
pub use wal::{WalEntry, WalIterator, WriteAheadLog};

use std::path::Path;

use crate::storage::traits::{CommitLog, LogRecord, StorageError};

/// Name of the log file inside a graph directory.
pub const LOG_FILE: &str = "graph.wal";

/// A [`WriteAheadLog`] that also holds the directory lock.
#[derive(Debug)]
pub struct DirectoryLog {
    wal: WriteAheadLog,
    _lock: DirectoryLock,
}

impl DirectoryLog {
    /// Create `dir` if needed, lock it and open its log.
    ///
    /// # Errors
    /// - `Io` with `WouldBlock` if another handle has the directory open
    /// - any error from opening the log
    pub fn open(dir: &Path, sync_on_write: bool) -> Result<Self, StorageError> {
        std::fs::create_dir_all(dir)?;
        let lock = DirectoryLock::acquire(dir)?;
        let wal = WriteAheadLog::open(&dir.join(LOG_FILE), sync_on_write)?;
        Ok(Self { wal, _lock: lock })
    }

    /// The underlying log.
    #[must_use]
    pub fn wal(&self) -> &WriteAheadLog {
        &self.wal
    }
}

impl CommitLog for DirectoryLog {
    fn append(&self, record: &LogRecord) -> Result<(), StorageError> {
        self.wal.append(record)
    }

    fn replay(&self) -> Result<Vec<LogRecord>, StorageError> {
        self.wal.replay()
    }

    fn len(&self) -> Result<usize, StorageError> {
        self.wal.len()
    }
}
