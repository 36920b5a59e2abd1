//! Structural events and commit records.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::element::{ElementId, LogPosition};
use crate::types::TypeToken;
use crate::value::Value;

/// One structural change. Commits are ordered batches of events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    /// Create an entity.
    CreateEntity {
        /// Pre-allocated id.
        id: ElementId,
        /// Entity type.
        ty: TypeToken,
    },
    /// Create a relation between two live elements.
    CreateRelation {
        /// Pre-allocated id.
        id: ElementId,
        /// Relation type.
        ty: TypeToken,
        /// Tail.
        source: ElementId,
        /// Head.
        target: ElementId,
    },
    /// Attach a value to a live entity or relation.
    AssignValue {
        /// Pre-allocated id of the value node.
        id: ElementId,
        /// Attribute (relation) type.
        ty: TypeToken,
        /// Entity or relation receiving the value.
        owner: ElementId,
        /// Payload.
        value: Value,
    },
    /// End a live fact.
    Terminate {
        /// Fact to end.
        id: ElementId,
    },
}

impl Event {
    /// The element the event creates or terminates.
    #[must_use]
    pub const fn subject(&self) -> ElementId {
        match self {
            Self::CreateEntity { id, .. }
            | Self::CreateRelation { id, .. }
            | Self::AssignValue { id, .. }
            | Self::Terminate { id } => *id,
        }
    }

    /// The type token carried by a creation event.
    #[must_use]
    pub const fn type_token(&self) -> Option<&TypeToken> {
        match self {
            Self::CreateEntity { ty, .. }
            | Self::CreateRelation { ty, .. }
            | Self::AssignValue { ty, .. } => Some(ty),
            Self::Terminate { .. } => None,
        }
    }

    /// Whether the event creates a fact.
    #[must_use]
    pub const fn is_creation(&self) -> bool {
        !matches!(self, Self::Terminate { .. })
    }
}

/// A batch of events validated against `base`.
///
/// `base` is the frame the author of the batch read from. Facts that were
/// visible at `base` but have been terminated since make the commit a
/// conflict rather than a validation failure.
#[derive(Debug, Clone, PartialEq)]
pub struct EventBatch {
    /// Frame the batch was prepared against.
    pub base: LogPosition,
    /// Events in statement order.
    pub events: Vec<Event>,
}

impl EventBatch {
    /// Creates a batch.
    #[must_use]
    pub const fn new(base: LogPosition, events: Vec<Event>) -> Self {
        Self { base, events }
    }
}

/// A committed batch as written to the log.
///
/// `events` includes terminations added by cascading, so replaying a record
/// never has to re-derive anything.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommitRecord {
    /// Position the commit occupies.
    pub position: LogPosition,
    /// Wall-clock commit time, non-decreasing across commits.
    pub timestamp: DateTime<Utc>,
    /// Events applied by the commit.
    pub events: Vec<Event>,
}

impl CommitRecord {
    /// Number of facts the commit created.
    #[must_use]
    pub fn created(&self) -> usize {
        self.events.iter().filter(|e| e.is_creation()).count()
    }

    /// Number of facts the commit terminated.
    #[must_use]
    pub fn terminated(&self) -> usize {
        self.events.len() - self.created()
    }
}
