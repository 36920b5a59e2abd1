//! Uncommitted events layered over a frame.
//!
//! An overlay is built from a transaction's pending batch (after cascade
//! expansion) and read through a [`Snapshot`](super::Snapshot): committed
//! facts the batch terminates are hidden, facts it creates are appended
//! after the committed ones.

use std::collections::{HashMap, HashSet};

use super::snapshot::Source;
use super::{Event, Fact, FactBody};
use crate::element::{ElementId, LogPosition};

#[derive(Debug, Default)]
pub(crate) struct Overlay {
    facts: Vec<Fact>,
    by_id: HashMap<ElementId, usize>,
    terminated: HashSet<ElementId>,
}

impl Overlay {
    /// Pending facts are stamped with the position the batch would take if
    /// it committed on top of `base`.
    pub(crate) fn new(base: LogPosition, events: &[Event]) -> Self {
        let mut overlay = Self::default();
        let created = base.next();
        for event in events {
            let (id, ty, body) = match event {
                Event::CreateEntity { id, ty } => (*id, ty.clone(), FactBody::Entity),
                Event::CreateRelation {
                    id,
                    ty,
                    source,
                    target,
                } => (
                    *id,
                    ty.clone(),
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
                    ty.clone(),
                    FactBody::Value {
                        owner: *owner,
                        value: value.clone(),
                    },
                ),
                Event::Terminate { id } => {
                    overlay.terminated.insert(*id);
                    continue;
                }
            };
            overlay.by_id.insert(id, overlay.facts.len());
            overlay.facts.push(Fact {
                id,
                ty,
                body,
                created,
                terminated: None,
            });
        }
        overlay
    }

    pub(crate) fn get(&self, id: ElementId) -> Option<&Fact> {
        self.by_id.get(&id).map(|&slot| &self.facts[slot])
    }

    /// Whether a committed fact is terminated by the pending batch.
    pub(crate) fn hides(&self, id: ElementId) -> bool {
        self.terminated.contains(&id)
    }

    /// The first pending fact of `source` at or after `cursor`, with the
    /// cursor to resume from.
    pub(crate) fn next_match(&self, source: &Source, cursor: usize) -> Option<(usize, &Fact)> {
        self.facts
            .iter()
            .enumerate()
            .skip(cursor)
            .find(|(_, fact)| source.matches(fact))
            .map(|(slot, fact)| (slot + 1, fact))
    }

    pub(crate) fn facts(&self) -> &[Fact] {
        &self.facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::ElementKind;
    use crate::types::{TypeKind, TypeRegistry};
    use crate::value::Value;

    #[test]
    fn test_overlay_indexes_creations_and_hides_terminations() {
        let registry = TypeRegistry::new();
        let account = registry.declare(TypeKind::Entity, "Account").unwrap();
        let name = registry.declare(TypeKind::Relation, "Name").unwrap();
        let (a, label, old) = (
            ElementId::from_raw(10),
            ElementId::from_raw(11),
            ElementId::from_raw(3),
        );

        let overlay = Overlay::new(
            LogPosition::from_raw(4),
            &[
                Event::CreateEntity { id: a, ty: account.clone() },
                Event::AssignValue {
                    id: label,
                    ty: name,
                    owner: a,
                    value: Value::from("General"),
                },
                Event::Terminate { id: old },
            ],
        );

        assert_eq!(overlay.get(a).unwrap().created, LogPosition::from_raw(5));
        assert_eq!(overlay.get(label).unwrap().kind(), ElementKind::Value);
        assert!(overlay.hides(old));
        assert!(!overlay.hides(a));

        let (resume, fact) = overlay.next_match(&Source::Outgoing(a), 0).unwrap();
        assert_eq!(fact.id, label);
        assert!(overlay.next_match(&Source::Outgoing(a), resume).is_none());
        assert_eq!(overlay.next_match(&Source::Type(account), 0).unwrap().1.id, a);
        assert_eq!(overlay.facts().len(), 2);
    }
}
