//! Write-ahead commit log.
//!
//! Every record is framed by the codec and appended with a single write; the
//! file is optionally fsynced before `append` returns. On open the log is
//! scanned once: a torn or corrupt tail left by a crash is cut off at the last
//! intact entry so later appends are readable again.
//!
//! # File Format
//! ```text
//! [MAGIC: 4 bytes][VERSION: 1 byte]
//! [ENTRY 1: codec-framed WalEntry]
//! [ENTRY 2: codec-framed WalEntry]
//! ...
//! ```

use std::fs::{File, OpenOptions};
use std::io::{BufReader, ErrorKind, Result as IoResult, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::codec;
use crate::storage::traits::{CommitLog, LogRecord, StorageError};

/// A single entry in the write-ahead log.
#[derive(Debug, Clone, Deserialize)]
pub struct WalEntry {
    /// Sequence number, starting at 1 with no gaps.
    pub sequence: u64,
    /// When this entry was written.
    pub timestamp: DateTime<Utc>,
    /// The logged record.
    pub record: LogRecord,
}

#[derive(Serialize)]
struct WalEntryRef<'a> {
    sequence: u64,
    timestamp: DateTime<Utc>,
    record: &'a LogRecord,
}

#[derive(Debug)]
struct WalWriter {
    file: File,
    sequence: u64,
    offset: u64,
}

/// File-backed [`CommitLog`].
#[derive(Debug)]
pub struct WriteAheadLog {
    path: PathBuf,
    writer: Mutex<WalWriter>,
    sync_on_write: bool,
}

/// What the open-time scan found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ScanResult {
    last_sequence: u64,
    valid_len: u64,
}

impl WriteAheadLog {
    /// Open or create a log file.
    ///
    /// # Errors
    /// Fails on I/O errors and when the file exists but is not a chronograph
    /// log.
    pub fn open(path: &Path, sync_on_write: bool) -> Result<Self, StorageError> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let file_len = file.metadata()?.len();
        let scan = if file_len < codec::HEADER_LEN {
            // New file, or a crash before the header was complete.
            file.set_len(0)?;
            file.seek(SeekFrom::Start(0))?;
            codec::write_header(&mut file)?;
            if sync_on_write {
                file.sync_all()?;
            }
            ScanResult {
                last_sequence: 0,
                valid_len: codec::HEADER_LEN,
            }
        } else {
            let scan = Self::scan(path)?;
            if scan.valid_len < file_len {
                warn!(
                    path = %path.display(),
                    discarded_bytes = file_len - scan.valid_len,
                    last_sequence = scan.last_sequence,
                    "truncating corrupt log tail"
                );
                file.set_len(scan.valid_len)?;
                if sync_on_write {
                    file.sync_all()?;
                }
            }
            scan
        };

        file.seek(SeekFrom::Start(scan.valid_len))?;
        debug!(path = %path.display(), entries = scan.last_sequence, "opened write-ahead log");

        Ok(Self {
            path: path.to_path_buf(),
            writer: Mutex::new(WalWriter {
                file,
                sequence: scan.last_sequence,
                offset: scan.valid_len,
            }),
            sync_on_write,
        })
    }

    /// Path of the log file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sequence number of the last appended entry.
    #[must_use]
    pub fn current_sequence(&self) -> u64 {
        self.writer.lock().sequence
    }

    /// Size of the log file in bytes.
    pub fn size_bytes(&self) -> IoResult<u64> {
        Ok(std::fs::metadata(&self.path)?.len())
    }

    /// Iterate over the entries currently on disk.
    pub fn iter(&self) -> IoResult<WalIterator> {
        WalIterator::new(&self.path)
    }

    fn scan(path: &Path) -> Result<ScanResult, StorageError> {
        let mut iter = WalIterator::new(path)?;
        let mut result = ScanResult {
            last_sequence: 0,
            valid_len: codec::HEADER_LEN,
        };

        while let Some(entry) = iter.next() {
            match entry {
                Ok(entry) if entry.sequence == result.last_sequence + 1 => {
                    result.last_sequence = entry.sequence;
                    result.valid_len = iter.position()?;
                }
                Ok(entry) => {
                    warn!(
                        expected = result.last_sequence + 1,
                        found = entry.sequence,
                        "log sequence gap"
                    );
                    break;
                }
                Err(e) => {
                    warn!(after_sequence = result.last_sequence, error = %e, "corrupt log entry");
                    break;
                }
            }
        }

        Ok(result)
    }
}

impl CommitLog for WriteAheadLog {
    fn append(&self, record: &LogRecord) -> Result<(), StorageError> {
        let mut writer = self.writer.lock();

        let sequence = writer.sequence + 1;
        let entry = WalEntryRef {
            sequence,
            timestamp: Utc::now(),
            record,
        };
        let encoded = codec::encode(&entry)
            .map_err(|e| StorageError::SerializationError(e.to_string()))?;

        if let Err(e) = write_frame(&mut writer.file, &encoded, self.sync_on_write) {
            // Drop whatever part of the frame reached the file.
            let offset = writer.offset;
            if let Err(rollback) = rewind(&mut writer.file, offset) {
                warn!(error = %rollback, "failed to roll back partial log write");
            }
            return Err(e.into());
        }

        writer.sequence = sequence;
        writer.offset += encoded.len() as u64;
        Ok(())
    }

    fn replay(&self) -> Result<Vec<LogRecord>, StorageError> {
        // Hold the writer so replay never observes a half-written frame.
        let _writer = self.writer.lock();
        let mut records = Vec::new();
        for entry in WalIterator::new(&self.path)? {
            let entry = entry.map_err(|e| StorageError::Corrupt(e.to_string()))?;
            records.push(entry.record);
        }
        Ok(records)
    }

    fn len(&self) -> Result<usize, StorageError> {
        usize::try_from(self.current_sequence())
            .map_err(|_| StorageError::BackendError("log length overflows usize".to_string()))
    }
}

fn write_frame(file: &mut File, frame: &[u8], sync: bool) -> IoResult<()> {
    file.write_all(frame)?;
    if sync {
        file.sync_data()?;
    }
    Ok(())
}

fn rewind(file: &mut File, offset: u64) -> IoResult<()> {
    file.set_len(offset)?;
    file.seek(SeekFrom::Start(offset))?;
    Ok(())
}

/// Iterator over log entries. Ends at end of file or at a torn final frame.
pub struct WalIterator {
    reader: BufReader<File>,
    file_size: u64,
}

impl WalIterator {
    fn new(path: &Path) -> IoResult<Self> {
        let file = File::open(path)?;
        let file_size = file.metadata()?.len();
        let mut reader = BufReader::new(file);
        codec::read_header(&mut reader)?;
        Ok(Self { reader, file_size })
    }

    fn position(&mut self) -> IoResult<u64> {
        self.reader.stream_position()
    }
}

impl Iterator for WalIterator {
    type Item = IoResult<WalEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.position() {
            Ok(pos) if pos >= self.file_size => return None,
            Ok(_) => {}
            Err(e) => return Some(Err(e)),
        }

        match codec::decode(&mut self.reader) {
            Ok(entry) => Some(Ok(entry)),
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => None,
            Err(e) => Some(Err(e)),
        }
    }
}
