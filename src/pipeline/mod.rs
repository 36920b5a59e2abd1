//! Lazy traversal pipelines.
//!
//! A [`Query`] is a description of work: stages are composed left to right
//! and nothing touches the store until a terminal call ([`Query::evaluate`],
//! [`Query::length`], [`Query::sum`], ...). Stages fuse into one pull-based
//! pass; only sorting materializes its input.
//!
//! Errors raised by a stage carry the stage name and the input that failed
//! (see [`GraphError::stage`]) and surface at the terminal call. Once an
//! error is produced no later item is pulled.
//!
//! ```
//! # use chronograph::{placeholder, Delta, Graph};
//! let graph = Graph::new();
//! let account = graph.entity_type("Account").unwrap();
//! let name = graph.relation_type("Name").unwrap();
//! graph
//!     .commit(Delta::new().entity(&account, "a").fact(placeholder("a"), &name, "General"))
//!     .unwrap();
//!
//! let names = graph
//!     .now()
//!     .instances(&account)
//!     .values(&name)
//!     .evaluate()
//!     .unwrap();
//! assert_eq!(names.len(), 1);
//! ```

mod cancel;
mod stages;
mod values;

pub use cancel::CancellationToken;
pub(crate) use cancel::{Guard, Guarded};

use std::cmp::Ordering;
use std::fmt;
use std::time::Duration;

use crate::error::{ExecutionError, GraphError, GraphResult};

/// Items flowing between stages.
pub(crate) type Items<T> = Box<dyn Iterator<Item = GraphResult<T>>>;

type Build<T> = Box<dyn FnOnce(&Guard) -> Items<T>>;

/// A lazily evaluated sequence of `T`.
pub struct Query<T> {
    build: Build<T>,
    label: String,
    timeout: Option<Duration>,
    cancel: Option<CancellationToken>,
}

impl<T> fmt::Debug for Query<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("label", &self.label)
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl<T: 'static> Query<T> {
    /// A query over already known items.
    pub fn from_items<I>(items: I) -> Self
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: 'static,
    {
        let items = items.into_iter();
        Self::from_source("items", move |_| Box::new(items.map(Ok)))
    }

    /// A query over one item.
    #[must_use]
    pub fn once(item: T) -> Self {
        Self::from_items(std::iter::once(item))
    }

    /// A query whose items are produced by `build` at evaluation time.
    pub(crate) fn from_source(
        label: impl Into<String>,
        build: impl FnOnce(&Guard) -> Items<T> + 'static,
    ) -> Self {
        Self {
            build: Box::new(move |guard: &Guard| -> Items<T> {
                Box::new(Guarded::new(build(guard), guard.clone()))
            }),
            label: label.into(),
            timeout: None,
            cancel: None,
        }
    }

    /// Compose a stage over the output of `self`.
    pub(crate) fn then<U: 'static>(
        self,
        label: impl fmt::Display,
        stage: impl FnOnce(Items<T>, &Guard) -> Items<U> + 'static,
    ) -> Query<U> {
        let Self {
            build,
            label: previous,
            timeout,
            cancel,
        } = self;
        Query {
            build: Box::new(move |guard: &Guard| -> Items<U> {
                let upstream = build(guard);
                Box::new(Guarded::new(stage(upstream, guard), guard.clone()))
            }),
            label: format!("{previous} | {label}"),
            timeout,
            cancel,
        }
    }

    /// Description of the composed stages, for messages and logs.
    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Fail evaluation with `Timeout` once `timeout` has elapsed.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub(crate) fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        if self.timeout.is_none() {
            self.timeout = timeout;
        }
        self
    }

    /// Fail evaluation with `Cancelled` once `token` is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: &CancellationToken) -> Self {
        self.cancel = Some(token.clone());
        self
    }

    // ------------------------------------------------------------------
    // Generic stages
    // ------------------------------------------------------------------

    /// Keep items matching `predicate`.
    #[must_use]
    pub fn filter(self, mut predicate: impl FnMut(&T) -> bool + 'static) -> Self {
        self.then("filter", move |items, _| {
            Box::new(items.filter(move |item| match item {
                Ok(value) => predicate(value),
                Err(_) => true,
            }))
        })
    }

    /// Keep items matching a fallible `predicate`.
    #[must_use]
    pub fn try_filter(self, mut predicate: impl FnMut(&T) -> GraphResult<bool> + 'static) -> Self
    where
        T: fmt::Debug,
    {
        self.then("filter", move |items, _| {
            Box::new(items.filter_map(move |item| match item {
                Ok(value) => match predicate(&value) {
                    Ok(true) => Some(Ok(value)),
                    Ok(false) => None,
                    Err(e) => Some(Err(e.in_stage("filter", &value))),
                },
                Err(e) => Some(Err(e)),
            }))
        })
    }

    /// Transform every item.
    pub fn map<U: 'static>(self, mut f: impl FnMut(T) -> U + 'static) -> Query<U> {
        self.then("map", move |items, _| {
            Box::new(items.map(move |item| item.map(&mut f)))
        })
    }

    /// Transform every item with a fallible `f`.
    pub fn try_map<U: 'static>(
        self,
        mut f: impl FnMut(&T) -> GraphResult<U> + 'static,
    ) -> Query<U>
    where
        T: fmt::Debug,
    {
        self.then("map", move |items, _| {
            Box::new(items.map(move |item| {
                let value = item?;
                f(&value).map_err(|e| e.in_stage("map", &value))
            }))
        })
    }

    /// Stable sort with a caller-supplied ordering. Materializes the input.
    #[must_use]
    pub fn sort_by(self, mut compare: impl FnMut(&T, &T) -> Ordering + 'static) -> Self {
        self.then("sort", move |items, _| -> Items<T> {
            match items.collect::<GraphResult<Vec<T>>>() {
                Ok(mut all) => {
                    all.sort_by(&mut compare);
                    Box::new(all.into_iter().map(Ok))
                }
                Err(e) => Box::new(std::iter::once(Err(e))),
            }
        })
    }

    /// Stable sort by a key. Materializes the input.
    #[must_use]
    pub fn sort_by_key<K: Ord>(self, mut key: impl FnMut(&T) -> K + 'static) -> Self {
        self.sort_by(move |a, b| key(a).cmp(&key(b)))
    }

    /// Keep the first `n` items. Upstream stops being pulled after them.
    #[must_use]
    pub fn take(self, n: usize) -> Self {
        self.then(format_args!("take({n})"), move |items, _| Box::new(items.take(n)))
    }

    /// Drop the first `n` items.
    #[must_use]
    pub fn skip(self, n: usize) -> Self {
        self.then(format_args!("skip({n})"), move |items, _| Box::new(items.skip(n)))
    }

    // ------------------------------------------------------------------
    // Terminals
    // ------------------------------------------------------------------

    /// Start evaluation and return the item stream.
    pub fn iter(self) -> impl Iterator<Item = GraphResult<T>> {
        let guard = Guard::new(self.cancel, self.timeout);
        (self.build)(&guard)
    }

    /// Run the pipeline and collect every item.
    pub fn evaluate(self) -> GraphResult<Vec<T>> {
        self.iter().collect()
    }

    /// Number of items.
    pub fn length(self) -> GraphResult<usize> {
        self.iter().try_fold(0usize, |n, item| item.map(|_| n + 1))
    }

    /// The first item, if any. Later items are never pulled.
    pub fn first(self) -> GraphResult<Option<T>> {
        self.iter().next().transpose()
    }

    /// Whether any item matches `predicate`. Stops at the first match.
    pub fn any(self, mut predicate: impl FnMut(&T) -> bool) -> GraphResult<bool> {
        for item in self.iter() {
            if predicate(&item?) {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Fold every item into an accumulator.
    pub fn fold<A>(self, init: A, mut f: impl FnMut(A, T) -> GraphResult<A>) -> GraphResult<A> {
        self.iter().try_fold(init, |acc, item| f(acc, item?))
    }

    /// The single item.
    ///
    /// # Errors
    /// `NotFound` when empty, `Cardinality` when there is more than one.
    pub fn only(self) -> GraphResult<T> {
        let label = self.label.clone();
        self.maybe_one()?
            .ok_or_else(|| GraphError::not_found(format!("any result for {label}")))
    }

    /// The single item if there is one.
    ///
    /// # Errors
    /// `Cardinality` when there is more than one.
    pub fn maybe_one(self) -> GraphResult<Option<T>> {
        let label = self.label.clone();
        let mut items = self.iter();
        let Some(first) = items.next().transpose()? else {
            return Ok(None);
        };
        let mut found = 1;
        for item in items {
            item?;
            found += 1;
        }
        if found > 1 {
            return Err(ExecutionError::Cardinality { what: label, found }.into());
        }
        Ok(Some(first))
    }
}
