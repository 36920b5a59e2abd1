//! The graph handle.
//!
//! A [`Graph`] owns one type registry, one fact store, one commit log and
//! one commit feed. Handles are cheap to clone and every clone talks to the
//! same graph; there is no process-wide default graph.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use crate::config::GraphConfig;
use crate::delta::{resolve, Delta, Receipt, ResolveContext};
use crate::element::{GraphId, LogPosition};
use crate::error::{GraphError, GraphResult, ValidationError};
use crate::feed::{CommitFeed, FeedHub};
use crate::frame::{Frame, Ref};
use crate::storage::{CommitLog, LogRecord, MemoryLog, StorageError};
use crate::store::{CommitRecord, Event, EventBatch, GraphStore};
use crate::transaction::Transaction;
use crate::types::{EnumValue, TypeKind, TypeRegistry, TypeToken};

struct GraphInner {
    id: GraphId,
    config: GraphConfig,
    registry: TypeRegistry,
    store: GraphStore,
    log: Arc<dyn CommitLog>,
    feed: FeedHub,
}

/// Handle to a temporal typed graph.
///
/// # Example
/// ```
/// use chronograph::{placeholder, Delta, Graph};
///
/// let graph = Graph::new();
/// let account = graph.entity_type("Account").unwrap();
/// let name = graph.relation_type("Name").unwrap();
///
/// graph
///     .commit(
///         Delta::new()
///             .entity(&account, "a")
///             .fact(placeholder("a"), &name, "General"),
///     )
///     .unwrap();
///
/// let now = graph.now();
/// assert_eq!(now.instances(&account).length().unwrap(), 1);
/// ```
#[derive(Clone)]
pub struct Graph {
    inner: Arc<GraphInner>,
}

impl std::fmt::Debug for Graph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.inner.id)
            .field("now", &self.inner.store.now())
            .finish_non_exhaustive()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

impl Graph {
    /// An empty in-memory graph with default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::build(GraphConfig::default(), Arc::new(MemoryLog::new()))
    }

    /// An empty in-memory graph.
    ///
    /// # Errors
    /// Fails if `config` does not validate.
    pub fn with_config(config: GraphConfig) -> GraphResult<Self> {
        Ok(Self::build(config.validate()?, Arc::new(MemoryLog::new())))
    }

    /// Rebuild a graph from `log`, then keep appending to it.
    ///
    /// Records are replayed in order: declarations restore type slots,
    /// commits restore facts.
    ///
    /// # Errors
    /// Fails if the log cannot be read or is inconsistent.
    pub fn from_log(log: Arc<dyn CommitLog>, config: Option<GraphConfig>) -> GraphResult<Self> {
        let config = config.unwrap_or_default().validate()?;
        let records = log.replay()?;
        let graph = Self::build(config, log);

        let (mut declarations, mut commits) = (0usize, 0usize);
        for record in &records {
            match record {
                LogRecord::Declare(decl) => {
                    graph.inner.registry.restore(decl)?;
                    declarations += 1;
                }
                LogRecord::Commit(commit) => {
                    graph.check_replayed_types(commit)?;
                    graph.inner.store.replay(commit)?;
                    commits += 1;
                }
            }
        }

        info!(
            graph = %graph.inner.id,
            declarations,
            commits,
            now = %graph.inner.store.now(),
            "replayed commit log"
        );
        Ok(graph)
    }

    /// Open or create a persistent graph in directory `path`.
    ///
    /// # Errors
    /// - if the directory cannot be created or is held by another handle
    /// - if log replay fails
    ///
    /// # Example
    /// ```rust,no_run
    /// use chronograph::Graph;
    ///
    /// let graph = Graph::open("./ledger.graph", None)?;
    /// # Ok::<(), chronograph::GraphError>(())
    /// ```
    #[cfg(feature = "persistent")]
    pub fn open(path: impl AsRef<std::path::Path>, config: Option<GraphConfig>) -> GraphResult<Self> {
        let config = config.unwrap_or_default().validate()?;
        let log = crate::storage::persistent::DirectoryLog::open(path.as_ref(), config.sync_on_write)?;
        Self::from_log(Arc::new(log), Some(config))
    }

    fn build(config: GraphConfig, log: Arc<dyn CommitLog>) -> Self {
        let feed = FeedHub::new(config.feed_capacity);
        Self {
            inner: Arc::new(GraphInner {
                id: GraphId::new(),
                config,
                registry: TypeRegistry::new(),
                store: GraphStore::new(),
                log,
                feed,
            }),
        }
    }

    fn check_replayed_types(&self, commit: &CommitRecord) -> GraphResult<()> {
        for token in commit.events.iter().filter_map(Event::type_token) {
            if !self.inner.registry.contains(token)? {
                return Err(StorageError::Corrupt(format!(
                    "commit {} uses {token} before its declaration",
                    commit.position
                ))
                .into());
            }
        }
        Ok(())
    }

    /// Identity of this graph.
    #[must_use]
    pub fn id(&self) -> GraphId {
        self.inner.id
    }

    /// Active configuration.
    #[must_use]
    pub fn config(&self) -> &GraphConfig {
        &self.inner.config
    }

    /// The type registry.
    #[must_use]
    pub fn registry(&self) -> &TypeRegistry {
        &self.inner.registry
    }

    pub(crate) fn store(&self) -> &GraphStore {
        &self.inner.store
    }

    pub(crate) fn resolve_context(&self) -> ResolveContext<'_> {
        ResolveContext {
            graph: self.inner.id,
            registry: &self.inner.registry,
            store: &self.inner.store,
            max_statements: self.inner.config.max_delta_statements,
        }
    }

    // ------------------------------------------------------------------
    // Types
    // ------------------------------------------------------------------

    /// Declare (or look up) a type. The first declaration of a name is
    /// logged before the token is handed out.
    pub fn declare_type(&self, kind: TypeKind, name: &str) -> GraphResult<TypeToken> {
        let log = &self.inner.log;
        self.inner.registry.declare_with(kind, name, |decl| {
            log.append(&LogRecord::Declare(decl.clone()))?;
            debug!(kind = %decl.kind, name = %decl.name, index = decl.index, "declared type");
            Ok(())
        })
    }

    /// `ET.<name>`
    pub fn entity_type(&self, name: &str) -> GraphResult<TypeToken> {
        self.declare_type(TypeKind::Entity, name)
    }

    /// `RT.<name>`
    pub fn relation_type(&self, name: &str) -> GraphResult<TypeToken> {
        self.declare_type(TypeKind::Relation, name)
    }

    /// `EN.<name>`
    pub fn enum_type(&self, name: &str) -> GraphResult<TypeToken> {
        self.declare_type(TypeKind::Enum, name)
    }

    /// `EN.<enum_name>.<variant>`, declaring the enum if needed.
    pub fn enum_value(&self, enum_name: &str, variant: &str) -> GraphResult<EnumValue> {
        let token = self.enum_type(enum_name)?;
        Ok(EnumValue::new(token, variant)?)
    }

    /// Look up a declared type without declaring it.
    pub fn resolve_type(&self, kind: TypeKind, name: &str) -> GraphResult<TypeToken> {
        self.inner.registry.resolve(kind, name)
    }

    // ------------------------------------------------------------------
    // Commits
    // ------------------------------------------------------------------

    /// Commit `delta` on its own.
    ///
    /// The receipt is anchored at the resulting frame. An empty delta
    /// commits nothing and anchors at the current frame.
    pub fn commit(&self, delta: Delta) -> GraphResult<Receipt> {
        let mut tx = self.begin();
        let pending = tx.submit(delta)?;
        let frame = tx.commit()?;
        Ok(pending.anchor(&frame))
    }

    /// Open a transaction scope.
    ///
    /// Statements submitted to the scope accumulate and commit once, on
    /// [`Transaction::commit`]. Dropping the scope without committing
    /// discards them.
    #[must_use]
    pub fn begin(&self) -> Transaction<'_> {
        Transaction::new(self, self.inner.store.now())
    }

    /// Run `f` in a transaction scope: commit if it returns `Ok`, abort if
    /// it returns `Err`.
    pub fn transact<T>(
        &self,
        f: impl FnOnce(&mut Transaction<'_>) -> GraphResult<T>,
    ) -> GraphResult<(T, Frame)> {
        let mut tx = self.begin();
        match f(&mut tx) {
            Ok(value) => {
                let frame = tx.commit()?;
                Ok((value, frame))
            }
            Err(e) => {
                tx.abort();
                Err(e)
            }
        }
    }

    /// End the element behind `target` in a commit of its own.
    ///
    /// Live relations and values incident to it end in the same commit.
    ///
    /// # Errors
    /// `NotFound` if it never existed, `AlreadyTerminated` if it has already
    /// ended as of the reference's frame.
    pub fn terminate(&self, target: &Ref) -> GraphResult<Frame> {
        if target.graph_id() != self.inner.id {
            return Err(ValidationError::ForeignReference { id: target.id() }.into());
        }
        let base = target.frame_position().unwrap_or_else(|| self.inner.store.now());
        self.append(EventBatch::new(base, vec![Event::Terminate { id: target.id() }]))
    }

    /// Append a batch through the log and publish it.
    ///
    /// Feed notices go out before the writer lock is released, so
    /// subscribers see commits in position order.
    pub(crate) fn append(&self, batch: EventBatch) -> GraphResult<Frame> {
        let log = &self.inner.log;
        let feed = &self.inner.feed;
        let record = self.inner.store.append_then(
            batch,
            self.inner.config.commit_timeout,
            |record| Ok(log.append(&LogRecord::Commit(record.clone()))?),
            |record| feed.publish(record),
        )?;
        debug!(
            graph = %self.inner.id,
            position = %record.position,
            created = record.created(),
            terminated = record.terminated(),
            "committed"
        );
        Ok(Frame::new(self.clone(), record.position))
    }

    /// Dry-run validation of `batch` against the current state. Returns the
    /// events the batch would record.
    pub(crate) fn check(&self, batch: &EventBatch) -> GraphResult<Vec<Event>> {
        self.inner.store.check(batch)
    }

    /// Translate `delta` into events without committing.
    pub(crate) fn resolve(&self, delta: &Delta) -> GraphResult<crate::delta::Resolved> {
        resolve(&self.resolve_context(), delta)
    }

    // ------------------------------------------------------------------
    // Frames
    // ------------------------------------------------------------------

    /// The frame of the latest commit.
    #[must_use]
    pub fn now(&self) -> Frame {
        Frame::new(self.clone(), self.inner.store.now())
    }

    /// The latest frame committed at or before `instant`.
    pub fn at(&self, instant: DateTime<Utc>) -> GraphResult<Frame> {
        let position = self.inner.store.position_at(instant)?;
        Ok(Frame::new(self.clone(), position))
    }

    /// The frame at `position`.
    ///
    /// # Errors
    /// `NotFound` if `position` has not been committed yet.
    pub fn frame(&self, position: LogPosition) -> GraphResult<Frame> {
        let now = self.inner.store.now();
        if position > now {
            return Err(GraphError::not_found(format!(
                "frame {position}; the latest frame is {now}"
            )));
        }
        Ok(Frame::new(self.clone(), position))
    }

    // ------------------------------------------------------------------
    // Feed
    // ------------------------------------------------------------------

    /// Subscribe to notices of future commits.
    #[must_use]
    pub fn subscribe(&self) -> CommitFeed {
        self.inner.feed.subscribe()
    }

    /// Notices dropped because a subscriber's buffer was full.
    #[must_use]
    pub fn dropped_notices(&self) -> u64 {
        self.inner.feed.dropped()
    }

    /// Number of live feed subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.feed.subscribers()
    }

    /// Whether `self` and `other` are handles to the same graph.
    #[must_use]
    pub fn same_graph(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::placeholder;
    use std::time::Duration;

    #[test]
    fn test_declarations_are_logged_once() {
        let log = Arc::new(MemoryLog::new());
        let graph = Graph::from_log(log.clone(), None).unwrap();
        graph.entity_type("Account").unwrap();
        graph.entity_type("Account").unwrap();
        graph.relation_type("Name").unwrap();
        assert_eq!(log.len().unwrap(), 2);
    }

    #[test]
    fn test_commit_anchors_receipt_at_new_frame() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let receipt = graph.commit(Delta::new().entity(&account, "a")).unwrap();
        assert!(!receipt.is_pending());
        let a = receipt.require("a").unwrap();
        assert_eq!(a.frame_position(), Some(graph.now().position()));
        assert!(a.is_a(&account).unwrap());
    }

    #[test]
    fn test_empty_delta_commits_nothing() {
        let graph = Graph::new();
        let before = graph.now().position();
        let receipt = graph.commit(Delta::new()).unwrap();
        assert!(receipt.is_empty());
        assert_eq!(graph.now().position(), before);
    }

    #[test]
    fn test_replay_from_log_restores_frames() {
        let log = Arc::new(MemoryLog::new());
        let graph = Graph::from_log(log.clone(), None).unwrap();
        let account = graph.entity_type("Account").unwrap();
        let name = graph.relation_type("Name").unwrap();
        graph
            .commit(
                Delta::new()
                    .entity(&account, "a")
                    .fact(placeholder("a"), &name, "General"),
            )
            .unwrap();
        graph
            .commit(Delta::new().anonymous_entity(&account))
            .unwrap();

        let copy = Graph::from_log(log, None).unwrap();
        assert_eq!(copy.now().position(), graph.now().position());
        let account = copy.resolve_type(TypeKind::Entity, "Account").unwrap();
        assert_eq!(copy.now().instances(&account).length().unwrap(), 2);
        let first = copy.frame(LogPosition::from_raw(1)).unwrap();
        assert_eq!(first.instances(&account).length().unwrap(), 1);
    }

    #[test]
    fn test_future_frame_is_not_found() {
        let graph = Graph::new();
        let err = graph.frame(LogPosition::from_raw(3)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_feed_sees_commits() {
        let graph = Graph::new();
        let feed = graph.subscribe();
        let account = graph.entity_type("Account").unwrap();
        graph.commit(Delta::new().anonymous_entity(&account)).unwrap();
        let notice = feed.next_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(notice.position, LogPosition::from_raw(1));
        assert_eq!(notice.created(), 1);
    }

    #[test]
    fn test_feed_order_follows_positions_under_concurrent_writers() {
        let graph = Graph::new();
        let feed = graph.subscribe();
        let account = graph.entity_type("Account").unwrap();
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let graph = graph.clone();
                let account = account.clone();
                std::thread::spawn(move || {
                    for _ in 0..25 {
                        graph.commit(Delta::new().anonymous_entity(&account)).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        let positions: Vec<u64> = (0..100)
            .map(|_| feed.next_timeout(Duration::from_secs(1)).unwrap().position.as_u64())
            .collect();
        assert_eq!(positions, (1..=100).collect::<Vec<_>>());
        assert_eq!(graph.dropped_notices(), 0);
    }

    #[test]
    fn test_unbounded_query_timeout_is_accepted() {
        let graph = Graph::with_config(GraphConfig {
            query_timeout: Some(Duration::MAX),
            ..GraphConfig::default()
        })
        .unwrap();
        let account = graph.entity_type("Account").unwrap();
        graph.commit(Delta::new().anonymous_entity(&account)).unwrap();
        assert_eq!(graph.now().instances(&account).length().unwrap(), 1);
    }

    #[test]
    fn test_transact_aborts_on_error() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let result: GraphResult<((), Frame)> = graph.transact(|tx| {
            tx.submit(Delta::new().anonymous_entity(&account))?;
            Err(GraphError::internal("caller gave up"))
        });
        assert!(result.is_err());
        assert_eq!(graph.now().position(), LogPosition::ORIGIN);
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = GraphConfig {
            feed_capacity: 0,
            ..GraphConfig::default()
        };
        assert!(Graph::with_config(config).is_err());
    }
}
