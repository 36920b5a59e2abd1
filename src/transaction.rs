//! Transaction scopes.
//!
//! Deltas submitted to a [`Transaction`] accumulate into one pending batch
//! that reaches the store in a single commit. Nested scopes flatten into
//! their parent: their statements join the parent's batch, and a nested
//! scope that fails fails the whole transaction.

use std::mem;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::delta::{Delta, Receipt};
use crate::element::LogPosition;
use crate::error::{GraphResult, ValidationError};
use crate::frame::Frame;
use crate::graph::Graph;
use crate::store::{Event, EventBatch, Overlay};

/// An open transaction scope.
///
/// Created by [`Graph::begin`]. Dropping it without calling
/// [`Transaction::commit`] discards everything submitted.
///
/// ```
/// # use chronograph::{Delta, Graph};
/// let graph = Graph::new();
/// let account = graph.entity_type("Account").unwrap();
///
/// let mut tx = graph.begin();
/// for _ in 0..3 {
///     tx.submit(Delta::new().anonymous_entity(&account)).unwrap();
/// }
/// let frame = tx.commit().unwrap();
/// assert_eq!(frame.instances(&account).length().unwrap(), 3);
/// assert_eq!(frame.previous().unwrap().instances(&account).length().unwrap(), 0);
/// ```
#[derive(Debug)]
pub struct Transaction<'g> {
    graph: &'g Graph,
    base: LogPosition,
    events: Vec<Event>,
    poisoned: Option<String>,
    finished: bool,
}

impl<'g> Transaction<'g> {
    pub(crate) fn new(graph: &'g Graph, base: LogPosition) -> Self {
        Self {
            graph,
            base,
            events: Vec::new(),
            poisoned: None,
            finished: false,
        }
    }

    /// The frame the scope was opened at. Commit fails with `Conflict` if a
    /// fact the scope relies on is terminated after it.
    #[must_use]
    pub fn base(&self) -> Frame {
        Frame::new(self.graph.clone(), self.base)
    }

    /// Number of events waiting to be committed.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.events.len()
    }

    /// Whether a nested scope failed, dooming this transaction.
    #[must_use]
    pub fn is_poisoned(&self) -> bool {
        self.poisoned.is_some()
    }

    /// Add `delta` to the scope.
    ///
    /// The delta is resolved and validated against the pending batch right
    /// away; a delta that fails is not added and leaves the scope usable.
    /// The returned receipt is pending until the scope commits.
    ///
    /// # Errors
    /// `ScopeAborted` if the scope is poisoned, otherwise any resolution or
    /// validation error of `delta`.
    pub fn submit(&mut self, delta: Delta) -> GraphResult<Receipt> {
        if let Some(reason) = &self.poisoned {
            return Err(ValidationError::ScopeAborted {
                reason: reason.clone(),
            }
            .into());
        }

        let resolved = self.graph.resolve(&delta)?;
        if !resolved.events.is_empty() {
            let mut combined = Vec::with_capacity(self.events.len() + resolved.events.len());
            combined.extend_from_slice(&self.events);
            combined.extend(resolved.events);
            let batch = EventBatch::new(self.base, combined);
            self.graph.check(&batch)?;
            self.events = batch.events;
        }

        Ok(Receipt::new(self.graph.clone(), None, resolved.bindings))
    }

    /// The base frame with everything submitted so far applied on top.
    ///
    /// Anchor pending references at the view ([`Ref::at`](crate::Ref::at),
    /// [`Receipt::anchor`]) to read the scope's own writes before commit.
    /// Only readers holding the view see them. A view does not follow later
    /// submits; take a new one after submitting more.
    ///
    /// # Errors
    /// Fails if the pending statements no longer validate, for example after
    /// another writer terminated something they rely on.
    pub fn view(&self) -> GraphResult<Frame> {
        let events = if self.events.is_empty() {
            Vec::new()
        } else {
            self.graph
                .check(&EventBatch::new(self.base, self.events.clone()))?
        };
        let overlay = Overlay::new(self.base, &events);
        Ok(Frame::with_pending(self.graph.clone(), self.base, Arc::new(overlay)))
    }

    /// Open a nested scope. Its statements join this transaction; if it
    /// ends without [`NestedScope::commit`], this transaction is poisoned.
    pub fn nested(&mut self) -> NestedScope<'_, 'g> {
        NestedScope {
            parent: self,
            done: false,
        }
    }

    /// Run `f` as a nested scope: on `Err` the transaction is poisoned and
    /// the error returned.
    pub fn transact<T>(
        &mut self,
        f: impl FnOnce(&mut Self) -> GraphResult<T>,
    ) -> GraphResult<T> {
        match f(self) {
            Ok(value) => Ok(value),
            Err(e) => {
                self.poison(e.to_string());
                Err(e)
            }
        }
    }

    fn poison(&mut self, reason: String) {
        warn!(base = %self.base, pending = self.events.len(), %reason, "transaction scope poisoned");
        self.poisoned.get_or_insert(reason);
    }

    /// Commit everything submitted as one batch.
    ///
    /// An empty scope commits nothing and returns the current frame.
    ///
    /// # Errors
    /// `ScopeAborted` if a nested scope failed, plus every error of
    /// [`Graph::commit`].
    pub fn commit(mut self) -> GraphResult<Frame> {
        self.finished = true;
        if let Some(reason) = self.poisoned.take() {
            debug!(base = %self.base, pending = self.events.len(), "discarding poisoned transaction");
            return Err(ValidationError::ScopeAborted { reason }.into());
        }
        if self.events.is_empty() {
            return Ok(self.graph.now());
        }
        let events = mem::take(&mut self.events);
        self.graph.append(EventBatch::new(self.base, events))
    }

    /// Discard everything submitted.
    pub fn abort(mut self) {
        self.finished = true;
        debug!(base = %self.base, discarded = self.events.len(), "transaction aborted");
    }
}

impl Drop for Transaction<'_> {
    fn drop(&mut self) {
        if !self.finished && !self.events.is_empty() {
            debug!(
                base = %self.base,
                discarded = self.events.len(),
                "transaction dropped without commit"
            );
        }
    }
}

/// A scope nested in a [`Transaction`].
#[derive(Debug)]
pub struct NestedScope<'t, 'g> {
    parent: &'t mut Transaction<'g>,
    done: bool,
}

impl<'g> NestedScope<'_, 'g> {
    /// Add `delta` to the enclosing transaction.
    pub fn submit(&mut self, delta: Delta) -> GraphResult<Receipt> {
        self.parent.submit(delta)
    }

    /// [`Transaction::view`] of the enclosing transaction.
    pub fn view(&self) -> GraphResult<Frame> {
        self.parent.view()
    }

    /// Open a scope nested in this one.
    pub fn nested(&mut self) -> NestedScope<'_, 'g> {
        self.parent.nested()
    }

    /// Close the scope normally. Its statements stay in the enclosing
    /// transaction.
    pub fn commit(mut self) {
        self.done = true;
    }

    /// Close the scope as failed, poisoning the enclosing transaction.
    pub fn abort(mut self, reason: impl Into<String>) {
        self.done = true;
        self.parent.poison(reason.into());
    }
}

impl Drop for NestedScope<'_, '_> {
    fn drop(&mut self) {
        if !self.done {
            self.parent
                .poison("nested scope ended without commit".to_string());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::delta::placeholder;
    use crate::error::{ExecutionError, GraphError};

    #[test]
    fn test_scope_commits_once() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let name = graph.relation_type("Name").unwrap();

        let mut tx = graph.begin();
        let first = tx
            .submit(Delta::new().entity(&account, "a"))
            .unwrap()
            .require("a")
            .unwrap();
        // A pending reference from an earlier submit is usable later in the
        // same scope.
        tx.submit(Delta::new().fact(&first, &name, "General")).unwrap();
        assert_eq!(graph.now().position(), LogPosition::ORIGIN);
        assert_eq!(tx.pending(), 2);

        let frame = tx.commit().unwrap();
        assert_eq!(frame.position(), LogPosition::from_raw(1));
        let names = first.at(&frame).query().values(&name).evaluate().unwrap();
        assert_eq!(names, vec![crate::value::Value::from("General")]);
    }

    #[test]
    fn test_failed_submit_leaves_scope_usable() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let name = graph.relation_type("Name").unwrap();

        let mut tx = graph.begin();
        tx.submit(Delta::new().anonymous_entity(&account)).unwrap();
        let err = tx
            .submit(Delta::new().fact(placeholder("ghost"), &name, "x"))
            .unwrap_err();
        assert!(err.is_dangling_placeholder());
        assert!(!tx.is_poisoned());
        assert_eq!(tx.pending(), 1);
        let frame = tx.commit().unwrap();
        assert_eq!(frame.instances(&account).length().unwrap(), 1);
    }

    #[test]
    fn test_dropped_scope_discards() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        {
            let mut tx = graph.begin();
            tx.submit(Delta::new().anonymous_entity(&account)).unwrap();
        }
        assert_eq!(graph.now().position(), LogPosition::ORIGIN);
    }

    #[test]
    fn test_nested_scopes_flatten() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();

        let mut tx = graph.begin();
        tx.submit(Delta::new().anonymous_entity(&account)).unwrap();
        {
            let mut inner = tx.nested();
            inner.submit(Delta::new().anonymous_entity(&account)).unwrap();
            inner.commit();
        }
        tx.transact(|tx| tx.submit(Delta::new().anonymous_entity(&account)))
            .unwrap();
        let frame = tx.commit().unwrap();
        assert_eq!(frame.position(), LogPosition::from_raw(1));
        assert_eq!(frame.instances(&account).length().unwrap(), 3);
    }

    #[test]
    fn test_failed_nested_scope_poisons_parent() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();

        let mut tx = graph.begin();
        tx.submit(Delta::new().anonymous_entity(&account)).unwrap();
        {
            let mut inner = tx.nested();
            inner.submit(Delta::new().anonymous_entity(&account)).unwrap();
            // dropped without commit
        }
        assert!(tx.is_poisoned());
        assert!(tx
            .submit(Delta::new().anonymous_entity(&account))
            .unwrap_err()
            .is_validation());
        assert!(tx.commit().unwrap_err().is_validation());
        assert_eq!(graph.now().position(), LogPosition::ORIGIN);
    }

    #[test]
    fn test_view_reads_own_writes_before_commit() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let transaction = graph.entity_type("Transaction").unwrap();
        let date = graph.relation_type("Date").unwrap();
        let has_entry = graph.relation_type("HasEntry").unwrap();
        let general = graph
            .commit(Delta::new().entity(&account, "a"))
            .unwrap()
            .require("a")
            .unwrap();
        let when = crate::time::parse_time("2021-12-06").unwrap();

        let mut tx = graph.begin();
        let receipt = tx
            .submit(
                Delta::new()
                    .entity(&transaction, "t")
                    .fact(placeholder("t"), &date, when),
            )
            .unwrap();
        let t = receipt.require("t").unwrap();
        let err = t.query().values(&date).single().unwrap_err();
        assert!(matches!(
            err.root_cause(),
            GraphError::Execution(ExecutionError::Unanchored { .. })
        ));

        let view = tx.view().unwrap();
        assert!(view.has_pending());
        let dated = receipt.anchor(&view).require("t").unwrap();
        assert_eq!(
            dated.query().values(&date).single().unwrap(),
            crate::value::Value::Time(when)
        );

        // Link only if not linked yet, reading through a fresh view each time.
        for _ in 0..2 {
            let view = tx.view().unwrap();
            if !view.has_relation(&general, &has_entry, &t.at(&view)).unwrap() {
                tx.submit(Delta::new().fact(&general, &has_entry, &t)).unwrap();
            }
        }
        assert_eq!(tx.pending(), 3);

        // Nobody outside the view sees the pending statements.
        assert_eq!(graph.now().instances(&transaction).length().unwrap(), 0);
        assert_eq!(view.instances(&transaction).length().unwrap(), 1);
        assert_eq!(view.stats().unwrap().relations, 0);

        let frame = tx.commit().unwrap();
        assert!(frame.has_relation(&general, &has_entry, &t.at(&frame)).unwrap());
        assert_eq!(
            general.at(&frame).query().outgoing(&has_entry).length().unwrap(),
            1
        );
    }

    #[test]
    fn test_view_hides_pending_terminations() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let has_entry = graph.relation_type("HasEntry").unwrap();
        let receipt = graph
            .commit(
                Delta::new()
                    .entity(&account, "a")
                    .entity(&account, "b")
                    .fact(placeholder("a"), &has_entry, placeholder("b")),
            )
            .unwrap();
        let (a, b) = (receipt.require("a").unwrap(), receipt.require("b").unwrap());

        let mut tx = graph.begin();
        tx.submit(Delta::new().terminate(&b)).unwrap();
        let view = tx.view().unwrap();
        assert!(!b.at(&view).exists().unwrap());
        assert!(!view.has_relation(&a, &has_entry, &b).unwrap());
        assert_eq!(view.instances(&account).length().unwrap(), 1);
        assert!(b.exists().unwrap());
        tx.abort();
    }

    #[test]
    fn test_stale_scope_conflicts() {
        let graph = Graph::new();
        let account = graph.entity_type("Account").unwrap();
        let name = graph.relation_type("Name").unwrap();
        let a = graph
            .commit(Delta::new().entity(&account, "a"))
            .unwrap()
            .require("a")
            .unwrap();

        let mut tx = graph.begin();
        tx.submit(Delta::new().fact(&a, &name, "General")).unwrap();
        graph.terminate(&a).unwrap();

        let err = tx.commit().unwrap_err();
        assert!(err.is_conflict());
        assert!(err.is_retryable());
    }
}
