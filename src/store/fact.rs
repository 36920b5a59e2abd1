//! Facts: the versioned records behind every graph element.

use serde::{Deserialize, Serialize};

use crate::element::{ElementId, ElementKind, LogPosition};
use crate::types::TypeToken;
use crate::value::Value;

/// Kind-specific payload of a fact.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FactBody {
    /// An entity carries nothing beyond its type.
    Entity,
    /// A directed edge.
    Relation {
        /// Tail of the edge.
        source: ElementId,
        /// Head of the edge.
        target: ElementId,
    },
    /// An attribute assignment.
    Value {
        /// Entity or relation the value is attached to.
        owner: ElementId,
        /// The payload.
        value: Value,
    },
}

/// One entity, relation or attribute assignment with its lifetime.
///
/// A fact exists at frame `f` iff `created <= f` and it was not terminated
/// at or before `f`. Apart from setting `terminated` once, facts never
/// change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fact {
    /// Element identity.
    pub id: ElementId,
    /// Entity type for entities, relation type otherwise.
    pub ty: TypeToken,
    /// Kind-specific payload.
    pub body: FactBody,
    /// Commit that created the fact.
    pub created: LogPosition,
    /// Commit that terminated the fact, if any.
    pub terminated: Option<LogPosition>,
}

impl Fact {
    /// The element kind tag.
    #[must_use]
    pub const fn kind(&self) -> ElementKind {
        match self.body {
            FactBody::Entity => ElementKind::Entity,
            FactBody::Relation { .. } => ElementKind::Relation,
            FactBody::Value { .. } => ElementKind::Value,
        }
    }

    /// Whether the fact is visible at `frame`.
    #[must_use]
    pub fn exists_at(&self, frame: LogPosition) -> bool {
        self.created <= frame && self.terminated.map_or(true, |t| t > frame)
    }

    /// Whether the fact has not been terminated yet.
    #[must_use]
    pub const fn is_live(&self) -> bool {
        self.terminated.is_none()
    }

    /// The payload of an attribute assignment.
    #[must_use]
    pub const fn value(&self) -> Option<&Value> {
        match &self.body {
            FactBody::Value { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Source and target of a relation.
    #[must_use]
    pub const fn endpoints(&self) -> Option<(ElementId, ElementId)> {
        match self.body {
            FactBody::Relation { source, target } => Some((source, target)),
            _ => None,
        }
    }

    /// The element this fact hangs off: relation source or value owner.
    #[must_use]
    pub const fn tail(&self) -> Option<ElementId> {
        match &self.body {
            FactBody::Entity => None,
            FactBody::Relation { source, .. } => Some(*source),
            FactBody::Value { owner, .. } => Some(*owner),
        }
    }

    /// The far end of the fact when walked from its tail: relation target,
    /// or the value node itself.
    #[must_use]
    pub const fn head(&self) -> Option<ElementId> {
        match &self.body {
            FactBody::Entity => None,
            FactBody::Relation { target, .. } => Some(*target),
            FactBody::Value { .. } => Some(self.id),
        }
    }
}
