//! Commit feed.
//!
//! Every successful commit publishes a [`CommitNotice`] to each subscriber
//! over a bounded channel. Publishing uses `try_send` so a slow subscriber
//! never stalls the writer; notices it has no room for are dropped and
//! counted.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError, TrySendError};
use parking_lot::Mutex;
use tracing::trace;

use crate::element::LogPosition;
use crate::error::{ExecutionError, GraphError, GraphResult};
use crate::store::{CommitRecord, Event};

/// What a commit did.
#[derive(Debug, Clone, PartialEq)]
pub struct CommitNotice {
    /// Position the commit occupies.
    pub position: LogPosition,
    /// Commit time.
    pub timestamp: DateTime<Utc>,
    /// Applied events, including cascaded terminations.
    pub events: Vec<Event>,
}

impl CommitNotice {
    /// Number of facts created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.events.iter().filter(|e| e.is_creation()).count()
    }

    /// Number of facts terminated.
    #[must_use]
    pub fn terminated(&self) -> usize {
        self.events.len() - self.created()
    }
}

impl From<&CommitRecord> for CommitNotice {
    fn from(record: &CommitRecord) -> Self {
        Self {
            position: record.position,
            timestamp: record.timestamp,
            events: record.events.clone(),
        }
    }
}

/// Receiving end of a commit subscription.
///
/// The feed disconnects once the graph and all of its clones are dropped.
#[derive(Debug)]
pub struct CommitFeed {
    rx: Receiver<CommitNotice>,
}

impl CommitFeed {
    /// Next notice if one is queued.
    pub fn try_next(&self) -> GraphResult<Option<CommitNotice>> {
        match self.rx.try_recv() {
            Ok(notice) => Ok(Some(notice)),
            Err(TryRecvError::Empty) => Ok(None),
            Err(TryRecvError::Disconnected) => Err(disconnected()),
        }
    }

    /// Wait for the next notice for at most `timeout`.
    pub fn next_timeout(&self, timeout: Duration) -> GraphResult<CommitNotice> {
        self.rx.recv_timeout(timeout).map_err(|err| match err {
            RecvTimeoutError::Timeout => ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into(),
            RecvTimeoutError::Disconnected => disconnected(),
        })
    }

    /// Drain every queued notice without waiting.
    pub fn drain(&self) -> Vec<CommitNotice> {
        self.rx.try_iter().collect()
    }
}

fn disconnected() -> GraphError {
    ExecutionError::Disconnected {
        path: "commit_feed".to_string(),
    }
    .into()
}

/// Fan-out of commit notices to subscribers.
#[derive(Debug)]
pub(crate) struct FeedHub {
    capacity: usize,
    subscribers: Mutex<Vec<Sender<CommitNotice>>>,
    dropped: AtomicU64,
}

impl FeedHub {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            subscribers: Mutex::new(Vec::new()),
            dropped: AtomicU64::new(0),
        }
    }

    pub(crate) fn subscribe(&self) -> CommitFeed {
        let (tx, rx) = bounded(self.capacity);
        self.subscribers.lock().push(tx);
        CommitFeed { rx }
    }

    pub(crate) fn publish(&self, record: &CommitRecord) {
        let mut subscribers = self.subscribers.lock();
        if subscribers.is_empty() {
            return;
        }

        let notice = CommitNotice::from(record);
        subscribers.retain(|tx| match tx.try_send(notice.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                trace!(position = %record.position, "commit feed full, notice dropped");
                true
            }
            Err(TrySendError::Disconnected(_)) => {
                trace!("commit feed subscriber went away");
                false
            }
        });
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    pub(crate) fn subscribers(&self) -> usize {
        self.subscribers.lock().len()
    }
}
