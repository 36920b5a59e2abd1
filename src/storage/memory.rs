//! In-memory commit log.
//!
//! Keeps records in a vector behind a lock. Used by graphs that do not need
//! durability and by tests that want to inspect what was logged.

use std::sync::RwLock;

use crate::storage::traits::{CommitLog, LogRecord, StorageError};

fn lock_err(context: &'static str) -> StorageError {
    StorageError::BackendError(format!("poisoned lock: {context}"))
}

/// Volatile [`CommitLog`].
#[derive(Debug, Default)]
pub struct MemoryLog {
    records: RwLock<Vec<LogRecord>>,
}

impl MemoryLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a log pre-filled with `records`, e.g. to replay a captured history.
    #[must_use]
    pub fn with_records(records: Vec<LogRecord>) -> Self {
        Self {
            records: RwLock::new(records),
        }
    }
}

impl CommitLog for MemoryLog {
    fn append(&self, record: &LogRecord) -> Result<(), StorageError> {
        let mut records = self.records.write().map_err(|_| lock_err("memory_log.append"))?;
        records.push(record.clone());
        Ok(())
    }

    fn replay(&self) -> Result<Vec<LogRecord>, StorageError> {
        let records = self.records.read().map_err(|_| lock_err("memory_log.replay"))?;
        Ok(records.clone())
    }

    fn len(&self) -> Result<usize, StorageError> {
        let records = self.records.read().map_err(|_| lock_err("memory_log.len"))?;
        Ok(records.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{TypeDecl, TypeKind};

    #[test]
    fn test_replay_preserves_order() {
        let log = MemoryLog::new();
        assert!(log.is_empty().unwrap());

        for (index, name) in ["Account", "Transaction"].iter().enumerate() {
            log.append(&LogRecord::Declare(TypeDecl {
                kind: TypeKind::Entity,
                index: u32::try_from(index).unwrap(),
                name: (*name).to_string(),
            }))
            .unwrap();
        }

        let names: Vec<String> = log
            .replay()
            .unwrap()
            .into_iter()
            .map(|r| match r {
                LogRecord::Declare(d) => d.name,
                LogRecord::Commit(_) => unreachable!(),
            })
            .collect();
        assert_eq!(names, vec!["Account", "Transaction"]);
        assert_eq!(log.len().unwrap(), 2);
    }
}
