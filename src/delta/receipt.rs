//! Receipts: placeholder names mapped to committed references.

use std::collections::BTreeMap;

use crate::element::ElementId;
use crate::error::{GraphError, GraphResult};
use crate::frame::{Frame, Ref};
use crate::graph::Graph;

/// Result of submitting a delta.
///
/// A receipt from [`Graph::commit`] is anchored at the frame the delta
/// produced. A receipt from a scoped transaction is pending until the scope
/// commits: its references carry no frame and must be anchored with
/// [`Receipt::anchor`] or [`Ref::at`] before traversal. Anchoring at the
/// scope's [`view`](crate::Transaction::view) reads them before commit.
#[derive(Debug, Clone)]
pub struct Receipt {
    graph: Graph,
    frame: Option<Frame>,
    bindings: BTreeMap<String, ElementId>,
}

impl Receipt {
    pub(crate) fn new(
        graph: Graph,
        frame: Option<Frame>,
        bindings: BTreeMap<String, ElementId>,
    ) -> Self {
        Self {
            graph,
            frame,
            bindings,
        }
    }

    /// The reference bound to `name`, if the delta introduced it.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Ref> {
        self.bindings
            .get(name)
            .map(|&id| self.reference(id))
    }

    fn reference(&self, id: ElementId) -> Ref {
        match &self.frame {
            Some(frame) => frame.anchor_id(id),
            None => Ref::new(self.graph.clone(), id, None),
        }
    }

    /// Like [`Receipt::get`] but a missing name is `NotFound`.
    pub fn require(&self, name: &str) -> GraphResult<Ref> {
        self.get(name)
            .ok_or_else(|| GraphError::not_found(format!("placeholder '{name}' in receipt")))
    }

    /// The frame the receipt is anchored at.
    #[must_use]
    pub fn frame(&self) -> Option<Frame> {
        self.frame.clone()
    }

    /// Whether the receipt still waits for its scope to commit.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        self.frame.is_none()
    }

    /// The same bindings anchored at `frame`.
    #[must_use]
    pub fn anchor(&self, frame: &Frame) -> Self {
        Self {
            graph: self.graph.clone(),
            frame: Some(frame.clone()),
            bindings: self.bindings.clone(),
        }
    }

    /// Placeholder names in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    /// `(name, reference)` pairs in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, Ref)> + '_ {
        self.bindings
            .iter()
            .map(|(name, &id)| (name.as_str(), self.reference(id)))
    }

    /// Number of bound placeholders.
    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    /// Whether no placeholders were bound.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}
