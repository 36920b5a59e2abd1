//! Multi-version graph store.
//!
//! Facts are kept in commit order in one append-only vector. Secondary
//! indexes (by id, by type, by tail and by head) hold positions into that
//! vector, so every index list is also sorted by creation position and a
//! frame-bounded scan can stop at the first fact created after the frame.
//!
//! The only in-place change ever made is stamping `terminated` on a fact.
//! Visibility at a frame compares the frame against `created` and
//! `terminated`, so a later stamp never changes what an earlier frame sees.
//!
//! # Concurrency
//! - One writer at a time, serialized by `writer` with a bounded wait.
//! - Readers take the state lock for each lookup only; they never wait for a
//!   commit to finish validating or logging.
//! - `latest` is published after a commit is fully applied, so sampling it
//!   always yields a position whose facts are all in place.

mod event;
mod fact;
mod overlay;
mod snapshot;
mod validate;

pub use event::{CommitRecord, Event, EventBatch};
pub use fact::{Fact, FactBody};
pub(crate) use overlay::Overlay;
pub use snapshot::{FactCursor, FrameStats, Snapshot};

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tracing::trace;

use crate::element::{ElementId, LogPosition};
use crate::error::{ExecutionError, GraphError, GraphResult, ValidationError};
use crate::storage::StorageError;
use crate::types::TypeToken;

fn lock_err(context: &'static str) -> GraphError {
    StorageError::BackendError(format!("poisoned lock: {context}")).into()
}

#[derive(Debug, Clone, Copy)]
struct CommitMeta {
    timestamp: DateTime<Utc>,
    /// Length of `facts` once this commit was applied.
    fact_end: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StoreState {
    facts: Vec<Fact>,
    by_id: HashMap<ElementId, usize>,
    by_type: HashMap<TypeToken, Vec<usize>>,
    /// Relations by source and values by owner.
    outgoing: HashMap<ElementId, Vec<usize>>,
    /// Relations by target.
    incoming: HashMap<ElementId, Vec<usize>>,
    /// `commits[i]` describes position `i + 1`.
    commits: Vec<CommitMeta>,
}

impl StoreState {
    pub(crate) fn fact(&self, id: ElementId) -> Option<&Fact> {
        self.by_id.get(&id).map(|&slot| &self.facts[slot])
    }

    fn latest(&self) -> LogPosition {
        LogPosition::from_raw(self.commits.len() as u64)
    }

    /// Number of facts created at or before `frame`.
    fn fact_end(&self, frame: LogPosition) -> usize {
        match frame.as_u64() {
            0 => 0,
            n => self
                .commits
                .get((n - 1) as usize)
                .map_or(self.facts.len(), |c| c.fact_end),
        }
    }

    /// The `cursor`-th slot of `source`, in creation order.
    fn slot_at(&self, source: &snapshot::Source, cursor: usize) -> Option<usize> {
        let list = match source {
            snapshot::Source::All => return (cursor < self.facts.len()).then_some(cursor),
            snapshot::Source::Type(ty) => self.by_type.get(ty),
            snapshot::Source::Outgoing(id) => self.outgoing.get(id),
            snapshot::Source::Incoming(id) => self.incoming.get(id),
        };
        list.and_then(|slots| slots.get(cursor).copied())
    }

    fn apply(&mut self, record: &CommitRecord) -> Result<(), StorageError> {
        let terminations = self.prepare(record)?;
        self.apply_prepared(record, terminations);
        Ok(())
    }

    /// Check that `record` follows the current state and locate the facts it
    /// terminates. Nothing is changed.
    fn prepare(&self, record: &CommitRecord) -> Result<Vec<usize>, StorageError> {
        let expected = self.latest().next();
        if record.position != expected {
            return Err(StorageError::Corrupt(format!(
                "commit {} applied out of order, expected {expected}",
                record.position
            )));
        }

        let mut terminations = Vec::new();
        for event in &record.events {
            if let Event::Terminate { id } = event {
                let slot = self.by_id.get(id).copied().ok_or_else(|| {
                    StorageError::Corrupt(format!("commit {} terminates unknown {id}", record.position))
                })?;
                terminations.push(slot);
            }
        }
        Ok(terminations)
    }

    /// Apply a record that passed [`StoreState::prepare`] against this same
    /// state. Cannot fail.
    fn apply_prepared(&mut self, record: &CommitRecord, terminations: Vec<usize>) {
        for event in &record.events {
            let (id, ty, body) = match event {
                Event::CreateEntity { id, ty } => (*id, ty, FactBody::Entity),
                Event::CreateRelation {
                    id,
                    ty,
                    source,
                    target,
                } => (
                    *id,
                    ty,
                    FactBody::Relation {
                        source: *source,
                        target: *target,
                    },
                ),
                Event::AssignValue {
                    id,
                    ty,
                    owner,
                    value,
                } => (
                    *id,
                    ty,
                    FactBody::Value {
                        owner: *owner,
                        value: value.clone(),
                    },
                ),
                Event::Terminate { .. } => continue,
            };

            let slot = self.facts.len();
            match &body {
                FactBody::Entity => {}
                FactBody::Relation { source, target } => {
                    self.outgoing.entry(*source).or_default().push(slot);
                    self.incoming.entry(*target).or_default().push(slot);
                }
                FactBody::Value { owner, .. } => {
                    self.outgoing.entry(*owner).or_default().push(slot);
                }
            }
            self.by_type.entry(ty.clone()).or_default().push(slot);
            self.by_id.insert(id, slot);
            self.facts.push(Fact {
                id,
                ty: ty.clone(),
                body,
                created: record.position,
                terminated: None,
            });
        }

        for slot in terminations {
            self.facts[slot].terminated = Some(record.position);
        }

        self.commits.push(CommitMeta {
            timestamp: record.timestamp,
            fact_end: self.facts.len(),
        });
    }
}

struct Shared {
    state: RwLock<StoreState>,
    writer: Mutex<()>,
    latest: AtomicU64,
    next_id: AtomicU64,
    /// Set when a logged commit could not be applied in memory.
    diverged: AtomicBool,
}

/// Handle to the fact store. Cloning is cheap and shares the store.
#[derive(Clone)]
pub struct GraphStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for GraphStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphStore")
            .field("latest", &self.now())
            .finish_non_exhaustive()
    }
}

impl Default for GraphStore {
    fn default() -> Self {
        Self::new()
    }
}

impl GraphStore {
    /// Create an empty store at [`LogPosition::ORIGIN`].
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(StoreState::default()),
                writer: Mutex::new(()),
                latest: AtomicU64::new(0),
                next_id: AtomicU64::new(1),
                diverged: AtomicBool::new(false),
            }),
        }
    }

    /// The latest fully applied commit.
    #[must_use]
    pub fn now(&self) -> LogPosition {
        LogPosition::from_raw(self.shared.latest.load(Ordering::Acquire))
    }

    /// Reserve a fresh element id. Ids are never handed out twice.
    #[must_use]
    pub fn allocate_id(&self) -> ElementId {
        ElementId::from_raw(self.shared.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn read(&self) -> GraphResult<RwLockReadGuard<'_, StoreState>> {
        self.shared.state.read().map_err(|_| lock_err("store.read"))
    }

    fn write(&self) -> GraphResult<RwLockWriteGuard<'_, StoreState>> {
        self.shared.state.write().map_err(|_| lock_err("store.write"))
    }

    /// Validate and apply `batch` as one commit.
    ///
    /// `log` runs after validation and before anything becomes visible; if it
    /// fails the store is unchanged. The returned record includes cascaded
    /// terminations.
    ///
    /// # Errors
    /// - `Timeout` if the writer lock is not acquired within `timeout`
    /// - `ValidationError` if an event references a fact that does not exist
    ///   or breaks a structural rule
    /// - `Conflict` if a fact the batch relies on was terminated after
    ///   `batch.base`
    /// - `NotFound` / `AlreadyTerminated` for bad terminations
    /// - `BackendError` once a logged commit failed to apply; the store then
    ///   refuses every later commit
    pub fn append(
        &self,
        batch: EventBatch,
        timeout: Duration,
        log: impl FnOnce(&CommitRecord) -> GraphResult<()>,
    ) -> GraphResult<CommitRecord> {
        self.append_then(batch, timeout, log, |_| {})
    }

    /// [`GraphStore::append`], then run `applied` once the commit is visible
    /// and before the next writer can start. Commits reach `applied` in
    /// position order.
    pub fn append_then(
        &self,
        batch: EventBatch,
        timeout: Duration,
        log: impl FnOnce(&CommitRecord) -> GraphResult<()>,
        applied: impl FnOnce(&CommitRecord),
    ) -> GraphResult<CommitRecord> {
        if batch.events.is_empty() {
            return Err(ValidationError::InvalidDelta {
                reason: "a commit needs at least one event".to_string(),
            }
            .into());
        }

        let Some(_writer) = self.shared.writer.try_lock_for(timeout) else {
            return Err(ExecutionError::Timeout {
                duration_ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }
            .into());
        };
        if self.shared.diverged.load(Ordering::Acquire) {
            return Err(StorageError::BackendError(
                "store no longer matches its log; reopen the graph".to_string(),
            )
            .into());
        }

        let (record, terminations) = {
            let state = self.read()?;
            let events = validate::check(&state, &batch)?;
            let last = state.commits.last().map(|c| c.timestamp);
            let now = Utc::now();
            let record = CommitRecord {
                position: state.latest().next(),
                timestamp: last.map_or(now, |t| t.max(now)),
                events,
            };
            let terminations = state.prepare(&record)?;
            (record, terminations)
        };

        log(&record)?;

        // The record is durable from here on. The state cannot change while
        // the writer lock is held, so only the lock itself can fail.
        match self.write() {
            Ok(mut state) => state.apply_prepared(&record, terminations),
            Err(e) => {
                self.shared.diverged.store(true, Ordering::Release);
                return Err(e);
            }
        }
        self.shared
            .latest
            .store(record.position.as_u64(), Ordering::Release);
        trace!(position = %record.position, events = record.events.len(), "applied commit");
        applied(&record);
        Ok(record)
    }

    /// Validate `batch` against the current state without committing it and
    /// return the events it would record, cascaded terminations included.
    ///
    /// A batch that passes may still fail at [`GraphStore::append`] if a
    /// writer commits in between.
    pub fn check(&self, batch: &EventBatch) -> GraphResult<Vec<Event>> {
        let state = self.read()?;
        validate::check(&state, batch)
    }

    /// End one fact in a commit of its own.
    ///
    /// # Errors
    /// `NotFound` if the fact never existed, `AlreadyTerminated` if it ended
    /// at or before `base`, plus everything [`GraphStore::append`] returns.
    pub fn terminate(
        &self,
        id: ElementId,
        base: LogPosition,
        timeout: Duration,
        log: impl FnOnce(&CommitRecord) -> GraphResult<()>,
    ) -> GraphResult<CommitRecord> {
        self.append(
            EventBatch::new(base, vec![Event::Terminate { id }]),
            timeout,
            log,
        )
    }

    /// Re-apply a record read back from the log.
    ///
    /// # Errors
    /// `Corrupt` if the record is out of order or references unknown facts.
    pub fn replay(&self, record: &CommitRecord) -> GraphResult<()> {
        let _writer = self.shared.writer.lock();
        self.write()?.apply(record)?;

        let max_id = record
            .events
            .iter()
            .filter(|e| e.is_creation())
            .map(|e| e.subject().as_u64())
            .max()
            .unwrap_or(0);
        self.shared.next_id.fetch_max(max_id + 1, Ordering::Relaxed);
        self.shared
            .latest
            .store(record.position.as_u64(), Ordering::Release);
        Ok(())
    }

    /// An O(1) view of the store at `frame`.
    #[must_use]
    pub fn snapshot(&self, frame: LogPosition) -> Snapshot {
        Snapshot::new(self.clone(), frame)
    }

    /// The fact behind `id`, regardless of frame.
    pub fn lifecycle(&self, id: ElementId) -> GraphResult<Option<Fact>> {
        Ok(self.read()?.fact(id).cloned())
    }

    /// The latest frame committed at or before `instant`.
    pub fn position_at(&self, instant: DateTime<Utc>) -> GraphResult<LogPosition> {
        let state = self.read()?;
        let count = state.commits.partition_point(|c| c.timestamp <= instant);
        Ok(LogPosition::from_raw(count as u64))
    }

    /// When `position` was committed; `None` for the origin or a future
    /// position.
    pub fn commit_time(&self, position: LogPosition) -> GraphResult<Option<DateTime<Utc>>> {
        let state = self.read()?;
        Ok(match position.as_u64() {
            0 => None,
            n => state.commits.get((n - 1) as usize).map(|c| c.timestamp),
        })
    }
}
