//! Durable commit log seam.
//!
//! The graph appends every declaration and commit to a [`CommitLog`] before
//! publishing it. [`MemoryLog`] keeps records in memory; with the
//! `persistent` feature, [`persistent::DirectoryLog`] writes them to a
//! checksummed write-ahead log on disk.

mod memory;
mod traits;

#[cfg(feature = "persistent")]
pub mod persistent;

pub use memory::MemoryLog;
pub use traits::{CommitLog, LogRecord, StorageError};
