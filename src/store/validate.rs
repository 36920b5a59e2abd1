//! Commit-time validation and cascade expansion.

use std::collections::{HashMap, HashSet};

use super::{Event, EventBatch, StoreState};
use crate::element::{ElementId, ElementKind, LogPosition};
use crate::error::{ExecutionError, GraphError, GraphResult, ValidationError};
use crate::types::TypeKind;

struct BatchScope<'a> {
    state: &'a StoreState,
    base: LogPosition,
    latest: LogPosition,
    created: HashMap<ElementId, ElementKind>,
    terminated: HashSet<ElementId>,
    /// Elements that facts created in this batch hang off or point at.
    referenced: HashSet<ElementId>,
}

/// Check `batch` against the current state and return the events to record:
/// the batch itself followed by cascaded terminations.
pub(super) fn check(state: &StoreState, batch: &EventBatch) -> GraphResult<Vec<Event>> {
    let latest = state.latest();
    if batch.base > latest {
        return Err(ValidationError::InvalidDelta {
            reason: format!("base frame {} is ahead of the store at {latest}", batch.base),
        }
        .into());
    }

    let mut scope = BatchScope {
        state,
        base: batch.base,
        latest,
        created: HashMap::new(),
        terminated: HashSet::new(),
        referenced: HashSet::new(),
    };

    for event in &batch.events {
        scope.check_event(event)?;
    }

    let mut events = batch.events.clone();
    scope.cascade(&mut events);
    Ok(events)
}

impl BatchScope<'_> {
    fn check_event(&mut self, event: &Event) -> GraphResult<()> {
        match event {
            Event::CreateEntity { id, ty } => {
                ty.expect_kind(TypeKind::Entity)?;
                self.claim(*id, ElementKind::Entity)
            }
            Event::CreateRelation {
                id,
                ty,
                source,
                target,
            } => {
                ty.expect_kind(TypeKind::Relation)?;
                self.require_live(*source)?;
                self.require_live(*target)?;
                self.claim(*id, ElementKind::Relation)?;
                self.referenced.insert(*source);
                self.referenced.insert(*target);
                Ok(())
            }
            Event::AssignValue { id, ty, owner, .. } => {
                ty.expect_kind(TypeKind::Relation)?;
                let owner_kind = self.require_live(*owner)?;
                if owner_kind == ElementKind::Value {
                    return Err(ValidationError::InvalidElement {
                        id: *owner,
                        kind: owner_kind,
                        action: "own attribute values",
                    }
                    .into());
                }
                self.claim(*id, ElementKind::Value)?;
                self.referenced.insert(*owner);
                Ok(())
            }
            Event::Terminate { id } => self.check_terminate(*id),
        }
    }

    fn claim(&mut self, id: ElementId, kind: ElementKind) -> GraphResult<()> {
        if self.created.contains_key(&id) || self.state.fact(id).is_some() {
            return Err(ValidationError::DuplicateElement { id }.into());
        }
        self.created.insert(id, kind);
        Ok(())
    }

    /// `id` must be live at the latest frame, or created earlier in the batch.
    fn require_live(&self, id: ElementId) -> GraphResult<ElementKind> {
        if self.terminated.contains(&id) {
            return Err(ValidationError::InvalidDelta {
                reason: format!("{id} is used after being terminated in the same commit"),
            }
            .into());
        }
        if let Some(kind) = self.created.get(&id) {
            return Ok(*kind);
        }

        match self.state.fact(id) {
            Some(fact) if fact.is_live() => Ok(fact.kind()),
            Some(fact) if fact.exists_at(self.base) => Err(ExecutionError::Conflict {
                id,
                base: self.base,
                current: self.latest,
            }
            .into()),
            _ => Err(ValidationError::MissingFact {
                id,
                frame: self.latest,
            }
            .into()),
        }
    }

    fn check_terminate(&mut self, id: ElementId) -> GraphResult<()> {
        if self.created.contains_key(&id) {
            return Err(ValidationError::InvalidDelta {
                reason: format!("{id} cannot be terminated in the commit that creates it"),
            }
            .into());
        }
        if self.referenced.contains(&id) {
            return Err(ValidationError::InvalidDelta {
                reason: format!("{id} is referenced by a fact created in the same commit"),
            }
            .into());
        }
        if self.terminated.contains(&id) {
            return Err(ExecutionError::AlreadyTerminated {
                id,
                at: self.latest.next(),
            }
            .into());
        }

        let fact = self
            .state
            .fact(id)
            .ok_or_else(|| GraphError::not_found(format!("fact {id}")))?;
        match fact.terminated {
            None => {}
            Some(at) if at <= self.base => {
                return Err(ExecutionError::AlreadyTerminated { id, at }.into());
            }
            Some(_) => {
                return Err(ExecutionError::Conflict {
                    id,
                    base: self.base,
                    current: self.latest,
                }
                .into());
            }
        }

        self.terminated.insert(id);
        Ok(())
    }

    /// Append terminations for every live fact incident to a terminated one,
    /// transitively.
    fn cascade(&mut self, events: &mut Vec<Event>) {
        let mut work: Vec<ElementId> = self.terminated.iter().copied().collect();
        // Deterministic record order regardless of hash iteration.
        work.sort_unstable();

        while let Some(id) = work.pop() {
            let incident = [
                self.state.outgoing.get(&id),
                self.state.incoming.get(&id),
            ];
            let mut found: Vec<ElementId> = incident
                .into_iter()
                .flatten()
                .flatten()
                .map(|&slot| &self.state.facts[slot])
                .filter(|fact| fact.is_live() && !self.terminated.contains(&fact.id))
                .map(|fact| fact.id)
                .collect();
            found.sort_unstable();
            found.dedup();

            for dependent in found {
                if self.terminated.insert(dependent) {
                    events.push(Event::Terminate { id: dependent });
                    work.push(dependent);
                }
            }
        }
    }
}
