//! Abstract commit log contract.
//!
//! The graph keeps its working state in memory and treats the log as the
//! source of truth: every type declaration and every commit is appended to a
//! [`CommitLog`] before it becomes visible, and a graph is rebuilt by
//! replaying the log in order. Backends only have to store and return opaque
//! records.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::store::CommitRecord;
use crate::types::TypeDecl;

/// Errors that can occur in a log backend.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Backend error, including poisoned locks.
    #[error("Storage backend error: {0}")]
    BackendError(String),

    /// Serialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// The log contents are inconsistent with the records already replayed.
    #[error("Corrupt log: {0}")]
    Corrupt(String),

    /// I/O failure from a file-backed log.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One durable log record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "record", rename_all = "snake_case")]
pub enum LogRecord {
    /// A new type slot.
    Declare(TypeDecl),
    /// One atomic commit.
    Commit(CommitRecord),
}

impl LogRecord {
    /// Short name used in log messages.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Declare(_) => "declare",
            Self::Commit(_) => "commit",
        }
    }
}

/// Append-only record log.
///
/// # Contract
/// - `append` returns only after the record is as durable as the backend
///   promises; on error the record must be treated as not written.
/// - `replay` returns records in append order.
/// - Implementations are shared across threads; the graph serializes appends.
pub trait CommitLog: Send + Sync {
    /// Append one record.
    fn append(&self, record: &LogRecord) -> Result<(), StorageError>;

    /// Read back every record in append order.
    fn replay(&self) -> Result<Vec<LogRecord>, StorageError>;

    /// Number of records appended so far.
    fn len(&self) -> Result<usize, StorageError>;

    /// Returns true if nothing has been appended.
    fn is_empty(&self) -> Result<bool, StorageError> {
        Ok(self.len()? == 0)
    }
}
