//! Frames and references.
//!
//! A [`Frame`] is a graph handle pinned to one log position. A [`Ref`] names
//! one element, optionally anchored at a frame; every read through it sees
//! the graph as of that frame. Re-anchoring is free and never revalidates:
//! an element that does not exist at the new frame surfaces as `NotFound` on
//! first traversal.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::element::{ElementId, ElementKind, GraphId, LogPosition};
use crate::error::{ExecutionError, GraphResult};
use crate::graph::Graph;
use crate::pipeline::Query;
use crate::store::{Fact, FactBody, FrameStats, Overlay, Snapshot};
use crate::types::TypeToken;
use crate::value::Value;

fn same_overlay(a: &Option<Arc<Overlay>>, b: &Option<Arc<Overlay>>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        _ => false,
    }
}

/// Read-only view of a graph at one log position.
///
/// A frame from [`Transaction::view`](crate::Transaction::view) also shows
/// the transaction's uncommitted statements. Nobody else sees them.
#[derive(Clone)]
pub struct Frame {
    graph: Graph,
    position: LogPosition,
    overlay: Option<Arc<Overlay>>,
}

impl Frame {
    pub(crate) const fn new(graph: Graph, position: LogPosition) -> Self {
        Self {
            graph,
            position,
            overlay: None,
        }
    }

    pub(crate) const fn with_pending(graph: Graph, base: LogPosition, overlay: Arc<Overlay>) -> Self {
        Self {
            graph,
            position: base,
            overlay: Some(overlay),
        }
    }

    /// Whether this frame shows uncommitted statements of a transaction.
    #[must_use]
    pub const fn has_pending(&self) -> bool {
        self.overlay.is_some()
    }

    /// The log position this frame reads.
    #[must_use]
    pub const fn position(&self) -> LogPosition {
        self.position
    }

    /// The graph this frame belongs to.
    #[must_use]
    pub const fn graph(&self) -> &Graph {
        &self.graph
    }

    /// When the commit behind this frame was made; `None` for the empty
    /// graph.
    pub fn committed_at(&self) -> GraphResult<Option<DateTime<Utc>>> {
        self.graph.store().commit_time(self.position)
    }

    /// The frame before this one.
    #[must_use]
    pub fn previous(&self) -> Option<Self> {
        self.position
            .previous()
            .map(|p| Self::new(self.graph.clone(), p))
    }

    /// Whether no commit has been made since this frame's position.
    #[must_use]
    pub fn is_latest(&self) -> bool {
        self.graph.store().now() == self.position
    }

    /// Low-level fact access at this frame.
    #[must_use]
    pub fn snapshot(&self) -> Snapshot {
        self.graph
            .store()
            .snapshot(self.position)
            .with_overlay(self.overlay.clone())
    }

    /// Anchor `id` at this frame.
    ///
    /// # Errors
    /// `NotFound` if the element is not visible at this frame.
    pub fn element(&self, id: ElementId) -> GraphResult<Ref> {
        self.snapshot().fact(id)?;
        Ok(self.anchor_id(id))
    }

    /// Whether `r`'s element is visible at this frame.
    pub fn contains(&self, r: &Ref) -> GraphResult<bool> {
        if r.graph_id() != self.graph.id() {
            return Ok(false);
        }
        self.snapshot().contains(r.id())
    }

    /// `r` re-anchored at this frame.
    #[must_use]
    pub fn anchor(&self, r: &Ref) -> Ref {
        r.at(self)
    }

    /// Elements of type `ty` visible at this frame, in creation order.
    #[must_use]
    pub fn instances(&self, ty: &TypeToken) -> Query<Ref> {
        let frame = self.clone();
        let ty = ty.clone();
        let label = format!("instances({ty})");
        Query::from_source(label, move |_| {
            let cursor = frame.snapshot().instances(&ty);
            Box::new(cursor.map(move |fact| fact.map(|f| frame.anchor_id(f.id))))
        })
        .with_default_timeout(self.graph.config().query_timeout)
    }

    /// Every element visible at this frame, in creation order.
    #[must_use]
    pub fn elements(&self) -> Query<Ref> {
        let frame = self.clone();
        Query::from_source("elements", move |_| {
            let cursor = frame.snapshot().facts();
            Box::new(cursor.map(move |fact| fact.map(|f| frame.anchor_id(f.id))))
        })
        .with_default_timeout(self.graph.config().query_timeout)
    }

    /// Relations of type `ty` from `source` to `target` visible at this
    /// frame.
    #[must_use]
    pub fn relations_between(&self, source: &Ref, ty: &TypeToken, target: &Ref) -> Query<Ref> {
        let target = target.id();
        let ty = ty.clone();
        self.anchor(source)
            .query()
            .out_relations(&ty)
            .try_filter(move |relation| {
                Ok(relation.fact()?.endpoints().map(|(_, head)| head) == Some(target))
            })
    }

    /// Whether a relation of type `ty` from `source` to `target` is visible
    /// at this frame.
    pub fn has_relation(&self, source: &Ref, ty: &TypeToken, target: &Ref) -> GraphResult<bool> {
        Ok(self
            .relations_between(source, ty, target)
            .first()?
            .is_some())
    }

    /// Counts of visible facts by kind.
    pub fn stats(&self) -> GraphResult<FrameStats> {
        self.snapshot().stats()
    }

    pub(crate) fn anchor_id(&self, id: ElementId) -> Ref {
        Ref {
            graph: self.graph.clone(),
            id,
            frame: Some(self.position),
            overlay: self.overlay.clone(),
        }
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.graph.id() == other.graph.id()
            && self.position == other.position
            && same_overlay(&self.overlay, &other.overlay)
    }
}

impl Eq for Frame {}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.has_pending() {
            write!(f, "Frame({}+pending)", self.position)
        } else {
            write!(f, "Frame({})", self.position)
        }
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.position)
    }
}

/// A function re-anchoring references at `frame`.
///
/// ```
/// # use chronograph::{to_frame, Delta, Graph};
/// let graph = Graph::new();
/// let account = graph.entity_type("Account").unwrap();
/// let before = graph.now();
/// let a = graph.commit(Delta::new().entity(&account, "a")).unwrap().require("a").unwrap();
///
/// let old = to_frame(&before)(&a);
/// assert!(old.fact().unwrap_err().is_not_found());
/// ```
pub fn to_frame(frame: &Frame) -> impl Fn(&Ref) -> Ref + Clone {
    let frame = frame.clone();
    move |r: &Ref| r.at(&frame)
}

/// Reference to one element.
///
/// Anchored references read the graph at their frame. References handed out
/// by an uncommitted transaction scope are pending: they can be used in
/// further statements of the same scope but must be anchored before they are
/// read.
#[derive(Clone)]
pub struct Ref {
    graph: Graph,
    id: ElementId,
    frame: Option<LogPosition>,
    overlay: Option<Arc<Overlay>>,
}

/// When an element existed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Lifecycle {
    /// Frame of the commit that created it.
    pub created_at: LogPosition,
    /// Frame of the commit that ended it.
    pub terminated_at: Option<LogPosition>,
}

impl Ref {
    pub(crate) const fn new(graph: Graph, id: ElementId, frame: Option<LogPosition>) -> Self {
        Self {
            graph,
            id,
            frame,
            overlay: None,
        }
    }

    /// Element id.
    #[must_use]
    pub const fn id(&self) -> ElementId {
        self.id
    }

    /// Id of the graph the element belongs to.
    #[must_use]
    pub fn graph_id(&self) -> GraphId {
        self.graph.id()
    }

    /// The graph the element belongs to.
    #[must_use]
    pub const fn graph(&self) -> &Graph {
        &self.graph
    }

    /// The frame the reference reads, if anchored.
    #[must_use]
    pub fn frame(&self) -> Option<Frame> {
        self.frame.map(|position| Frame {
            graph: self.graph.clone(),
            position,
            overlay: self.overlay.clone(),
        })
    }

    /// Log position of the frame, if anchored.
    #[must_use]
    pub const fn frame_position(&self) -> Option<LogPosition> {
        self.frame
    }

    /// Whether the reference still waits for its scope to commit.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.frame.is_none()
    }

    /// The same element read at `frame`. Existence is not checked here.
    ///
    /// Anchoring a pending reference at a transaction's
    /// [`view`](crate::Transaction::view) makes it readable before commit.
    #[must_use]
    pub fn at(&self, frame: &Frame) -> Self {
        frame.anchor_id(self.id)
    }

    /// `self` if anchored, otherwise anchored at `ambient`.
    #[must_use]
    pub fn or_at(&self, ambient: &Frame) -> Self {
        match self.frame {
            Some(_) => self.clone(),
            None => self.at(ambient),
        }
    }

    pub(crate) fn snapshot(&self) -> GraphResult<Snapshot> {
        let frame = self
            .frame
            .ok_or(ExecutionError::Unanchored { id: self.id })?;
        Ok(self
            .graph
            .store()
            .snapshot(frame)
            .with_overlay(self.overlay.clone()))
    }

    /// Another element of the same graph at the same frame.
    pub(crate) fn sibling(&self, id: ElementId) -> Self {
        Self {
            graph: self.graph.clone(),
            id,
            frame: self.frame,
            overlay: self.overlay.clone(),
        }
    }

    /// The fact behind the reference at its frame.
    ///
    /// # Errors
    /// `Unanchored` for a pending reference, `NotFound` if the element is not
    /// visible at the frame.
    pub fn fact(&self) -> GraphResult<Fact> {
        self.snapshot()?.fact(self.id)
    }

    /// Whether the element is visible at the reference's frame.
    pub fn exists(&self) -> GraphResult<bool> {
        self.snapshot()?.contains(self.id)
    }

    /// Entity, relation or value.
    pub fn kind(&self) -> GraphResult<ElementKind> {
        Ok(self.fact()?.kind())
    }

    /// The element's type.
    pub fn type_token(&self) -> GraphResult<TypeToken> {
        Ok(self.fact()?.ty)
    }

    /// Whether the element's type is `ty`.
    pub fn is_a(&self, ty: &TypeToken) -> GraphResult<bool> {
        Ok(&self.fact()?.ty == ty)
    }

    /// The literal held by a value node.
    ///
    /// # Errors
    /// `WrongKind` if the element is not a value node.
    pub fn value(&self) -> GraphResult<Value> {
        let fact = self.fact()?;
        match fact.body {
            FactBody::Value { value, .. } => Ok(value),
            _ => Err(ExecutionError::WrongKind {
                id: self.id,
                expected: ElementKind::Value,
                actual: fact.kind(),
            }
            .into()),
        }
    }

    /// When the element was created and, if it was, terminated. Reads the
    /// full committed history regardless of the reference's frame, so an
    /// element that is still pending is `NotFound`.
    pub fn lifecycle(&self) -> GraphResult<Lifecycle> {
        let fact = self
            .graph
            .store()
            .lifecycle(self.id)?
            .ok_or_else(|| crate::error::GraphError::not_found(format!("element {}", self.id)))?;
        Ok(Lifecycle {
            created_at: fact.created,
            terminated_at: fact.terminated,
        })
    }

    /// Frame of the commit that created the element.
    pub fn created_at(&self) -> GraphResult<Frame> {
        let lifecycle = self.lifecycle()?;
        Ok(Frame::new(self.graph.clone(), lifecycle.created_at))
    }

    /// Frame of the commit that ended the element, if any.
    pub fn terminated_at(&self) -> GraphResult<Option<Frame>> {
        let lifecycle = self.lifecycle()?;
        Ok(lifecycle
            .terminated_at
            .map(|p| Frame::new(self.graph.clone(), p)))
    }

    /// A pipeline starting at this element.
    #[must_use]
    pub fn query(&self) -> Query<Self> {
        Query::once(self.clone()).with_default_timeout(self.graph.config().query_timeout)
    }
}

impl PartialEq for Ref {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.frame == other.frame
            && self.graph_id() == other.graph_id()
            && same_overlay(&self.overlay, &other.overlay)
    }
}

impl Eq for Ref {}

impl Hash for Ref {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.graph_id().hash(state);
        self.id.hash(state);
        self.frame.hash(state);
    }
}

impl fmt::Debug for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.frame, &self.overlay) {
            (Some(frame), None) => write!(f, "Ref({}{frame})", self.id),
            (Some(frame), Some(_)) => write!(f, "Ref({}{frame}+pending)", self.id),
            (None, _) => write!(f, "Ref({}, pending)", self.id),
        }
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id)
    }
}
