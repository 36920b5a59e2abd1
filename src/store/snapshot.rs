//! Frame-bounded read views over the store.

use std::sync::Arc;

use super::overlay::Overlay;
use super::{Fact, FactBody, GraphStore};
use crate::element::{ElementId, ElementKind, LogPosition};
use crate::error::{GraphError, GraphResult};
use crate::types::TypeToken;

/// Which index a cursor walks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Source {
    All,
    Type(TypeToken),
    Outgoing(ElementId),
    Incoming(ElementId),
}

impl Source {
    pub(crate) fn matches(&self, fact: &Fact) -> bool {
        match (self, &fact.body) {
            (Self::All, _) => true,
            (Self::Type(ty), _) => &fact.ty == ty,
            (Self::Outgoing(id), FactBody::Relation { source, .. }) => source == id,
            (Self::Outgoing(id), FactBody::Value { owner, .. }) => owner == id,
            (Self::Incoming(id), FactBody::Relation { target, .. }) => target == id,
            _ => false,
        }
    }
}

/// Counts of facts visible at one frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    /// Live entities.
    pub entities: usize,
    /// Live relations.
    pub relations: usize,
    /// Live attribute assignments.
    pub values: usize,
}

impl FrameStats {
    /// Total number of visible facts.
    #[must_use]
    pub const fn total(&self) -> usize {
        self.entities + self.relations + self.values
    }
}

/// Immutable view of the store at one frame.
///
/// Constructing a snapshot copies nothing; every query filters the shared
/// fact log by the frame when it runs. A snapshot taken through a
/// transaction view also shows the transaction's pending facts.
#[derive(Debug, Clone)]
pub struct Snapshot {
    store: GraphStore,
    frame: LogPosition,
    overlay: Option<Arc<Overlay>>,
}

impl Snapshot {
    pub(crate) const fn new(store: GraphStore, frame: LogPosition) -> Self {
        Self {
            store,
            frame,
            overlay: None,
        }
    }

    pub(crate) fn with_overlay(mut self, overlay: Option<Arc<Overlay>>) -> Self {
        self.overlay = overlay;
        self
    }

    fn hides(&self, id: ElementId) -> bool {
        self.overlay.as_ref().is_some_and(|o| o.hides(id))
    }

    /// The frame this snapshot reads.
    #[must_use]
    pub const fn frame(&self) -> LogPosition {
        self.frame
    }

    /// The fact behind `id` if it is visible at this frame.
    pub fn get(&self, id: ElementId) -> GraphResult<Option<Fact>> {
        if let Some(fact) = self.overlay.as_ref().and_then(|o| o.get(id)) {
            return Ok(Some(fact.clone()));
        }
        if self.hides(id) {
            return Ok(None);
        }
        let state = self.store.read()?;
        Ok(state
            .fact(id)
            .filter(|fact| fact.exists_at(self.frame))
            .cloned())
    }

    /// Like [`Snapshot::get`] but absence is a `NotFound` error.
    pub fn fact(&self, id: ElementId) -> GraphResult<Fact> {
        self.get(id)?
            .ok_or_else(|| GraphError::not_found(format!("element {id} at frame {}", self.frame)))
    }

    /// Whether `id` is visible at this frame.
    pub fn contains(&self, id: ElementId) -> GraphResult<bool> {
        Ok(self.get(id)?.is_some())
    }

    /// Every visible fact, in creation order.
    #[must_use]
    pub fn facts(&self) -> FactCursor {
        self.cursor(Source::All)
    }

    /// Visible facts of type `ty`.
    #[must_use]
    pub fn instances(&self, ty: &TypeToken) -> FactCursor {
        self.cursor(Source::Type(ty.clone()))
    }

    /// Visible relations whose source is `id` and values owned by `id`.
    #[must_use]
    pub fn outgoing(&self, id: ElementId) -> FactCursor {
        self.cursor(Source::Outgoing(id))
    }

    /// Visible relations whose target is `id`.
    #[must_use]
    pub fn incoming(&self, id: ElementId) -> FactCursor {
        self.cursor(Source::Incoming(id))
    }

    /// Count visible facts by kind.
    pub fn stats(&self) -> GraphResult<FrameStats> {
        let state = self.store.read()?;
        let end = state.fact_end(self.frame);
        let committed = state.facts[..end]
            .iter()
            .filter(|f| f.exists_at(self.frame) && !self.hides(f.id));
        let pending = self.overlay.iter().flat_map(|o| o.facts());
        let mut stats = FrameStats::default();
        for fact in committed.chain(pending) {
            match fact.kind() {
                ElementKind::Entity => stats.entities += 1,
                ElementKind::Relation => stats.relations += 1,
                ElementKind::Value => stats.values += 1,
            }
        }
        Ok(stats)
    }

    fn cursor(&self, source: Source) -> FactCursor {
        FactCursor {
            store: self.store.clone(),
            frame: self.frame,
            overlay: self.overlay.clone(),
            source,
            next: 0,
            pending_next: 0,
            committed_done: false,
            done: false,
        }
    }
}

/// Lazy iterator over the facts of one index visible at one frame.
///
/// Each step takes the store's read lock briefly, so a long-lived cursor
/// never holds off writers. Index lists are in creation order; the cursor
/// stops at the first fact created after its frame, then yields pending
/// facts of the snapshot's overlay, if any.
#[derive(Debug)]
pub struct FactCursor {
    store: GraphStore,
    frame: LogPosition,
    overlay: Option<Arc<Overlay>>,
    source: Source,
    next: usize,
    pending_next: usize,
    committed_done: bool,
    done: bool,
}

impl Iterator for FactCursor {
    type Item = GraphResult<Fact>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        if !self.committed_done {
            let state = match self.store.read() {
                Ok(state) => state,
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            };

            while let Some(slot) = state.slot_at(&self.source, self.next) {
                self.next += 1;
                let fact = &state.facts[slot];
                if fact.created > self.frame {
                    break;
                }
                let hidden = self.overlay.as_ref().is_some_and(|o| o.hides(fact.id));
                if fact.exists_at(self.frame) && !hidden {
                    return Some(Ok(fact.clone()));
                }
            }
            self.committed_done = true;
        }

        if let Some(overlay) = &self.overlay {
            if let Some((resume, fact)) = overlay.next_match(&self.source, self.pending_next) {
                self.pending_next = resume;
                return Some(Ok(fact.clone()));
            }
        }

        self.done = true;
        None
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::store::{Event, EventBatch};
    use crate::types::{TypeKind, TypeRegistry};
    use crate::value::Value;

    fn commit(store: &GraphStore, events: Vec<Event>) -> LogPosition {
        store
            .append(
                EventBatch::new(store.now(), events),
                Duration::from_secs(1),
                |_| Ok(()),
            )
            .unwrap()
            .position
    }

    #[test]
    fn test_snapshot_is_stable_across_later_commits() {
        let registry = TypeRegistry::new();
        let account = registry.declare(TypeKind::Entity, "Account").unwrap();
        let amount = registry.declare(TypeKind::Relation, "Amount").unwrap();
        let store = GraphStore::new();

        let a = store.allocate_id();
        let f1 = commit(
            &store,
            vec![Event::CreateEntity {
                id: a,
                ty: account.clone(),
            }],
        );
        let snap = store.snapshot(f1);
        let before: Vec<ElementId> = snap.instances(&account).map(|f| f.unwrap().id).collect();

        let b = store.allocate_id();
        commit(
            &store,
            vec![
                Event::CreateEntity {
                    id: b,
                    ty: account.clone(),
                },
                Event::AssignValue {
                    id: store.allocate_id(),
                    ty: amount,
                    owner: a,
                    value: Value::Float(1.0),
                },
            ],
        );
        commit(&store, vec![Event::Terminate { id: a }]);

        let after: Vec<ElementId> = snap.instances(&account).map(|f| f.unwrap().id).collect();
        assert_eq!(before, vec![a]);
        assert_eq!(after, before);
        assert_eq!(snap.outgoing(a).count(), 0);
        assert!(snap.contains(a).unwrap());
        assert!(!snap.contains(b).unwrap());

        let latest = store.snapshot(store.now());
        assert!(!latest.contains(a).unwrap());
        assert!(latest.fact(a).unwrap_err().is_not_found());
        assert_eq!(
            latest.stats().unwrap(),
            FrameStats {
                entities: 1,
                relations: 0,
                values: 0,
            }
        );
    }

    #[test]
    fn test_origin_snapshot_is_empty() {
        let registry = TypeRegistry::new();
        let account = registry.declare(TypeKind::Entity, "Account").unwrap();
        let store = GraphStore::new();
        commit(
            &store,
            vec![Event::CreateEntity {
                id: store.allocate_id(),
                ty: account,
            }],
        );
        let origin = store.snapshot(LogPosition::ORIGIN);
        assert_eq!(origin.facts().count(), 0);
        assert_eq!(origin.stats().unwrap().total(), 0);
    }
}
