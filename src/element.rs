//! Identities shared by every layer: element ids, log positions, element
//! kinds and graph ids.

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Stable identity of a graph element (entity, relation or value node).
///
/// Ids are allocated by the store before commit so a pending delta can
/// refer to elements it is about to create. Ids are never reused, even when
/// the delta that allocated them is discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ElementId(u64);

impl ElementId {
    /// Creates an id from its raw integer form.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw integer form.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ElementId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Position of an atomic commit in the log.
///
/// Position 0 is the empty graph; the first commit is position 1. A frame
/// is defined by a log position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LogPosition(u64);

impl LogPosition {
    /// The position before any commit.
    pub const ORIGIN: Self = Self(0);

    /// Creates a position from its raw integer form.
    #[must_use]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw integer form.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// The position of the commit after this one.
    #[must_use]
    pub const fn next(self) -> Self {
        Self(self.0 + 1)
    }

    /// The position of the commit before this one, if any.
    #[must_use]
    pub const fn previous(self) -> Option<Self> {
        match self.0 {
            0 => None,
            n => Some(Self(n - 1)),
        }
    }
}

impl fmt::Display for LogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Closed set of graph element kinds.
///
/// Pipeline stages dispatch on this tag instead of inspecting types at
/// runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ElementKind {
    /// An instance of an entity type.
    Entity,
    /// A typed directed edge between two elements.
    Relation,
    /// A typed scalar attached to an entity or relation.
    Value,
}

impl fmt::Display for ElementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Entity => write!(f, "entity"),
            Self::Relation => write!(f, "relation"),
            Self::Value => write!(f, "value"),
        }
    }
}

/// Identity of one graph instance.
///
/// References carry the id of the graph they came from so a delta can
/// reject references to another graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GraphId(Uuid);

impl GraphId {
    /// Creates a new random graph id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_position_navigation() {
        let origin = LogPosition::ORIGIN;
        assert_eq!(origin.previous(), None);
        assert_eq!(origin.next(), LogPosition::from_raw(1));
        assert_eq!(LogPosition::from_raw(5).previous(), Some(LogPosition::from_raw(4)));
        assert!(LogPosition::from_raw(2) < LogPosition::from_raw(3));
    }

    #[test]
    fn test_display_forms() {
        assert_eq!(ElementId::from_raw(12).to_string(), "#12");
        assert_eq!(LogPosition::from_raw(3).to_string(), "@3");
        assert_eq!(ElementKind::Relation.to_string(), "relation");
    }

    #[test]
    fn test_graph_ids_are_distinct() {
        assert_ne!(GraphId::new(), GraphId::new());
    }
}
