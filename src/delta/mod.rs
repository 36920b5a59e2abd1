//! Declarative mutation batches.
//!
//! A [`Delta`] is an ordered list of [`Statement`]s. Statements refer to
//! existing elements through [`Ref`]s and to elements created earlier in the
//! same delta through placeholder names. Submitting a delta either applies
//! every statement or none of them.
//!
//! ```
//! # use chronograph::{Graph, Delta, placeholder};
//! let graph = Graph::new();
//! let account = graph.entity_type("Account").unwrap();
//! let name = graph.relation_type("Name").unwrap();
//!
//! let receipt = graph
//!     .commit(
//!         Delta::new()
//!             .entity(&account, "acc")
//!             .fact(placeholder("acc"), &name, "General"),
//!     )
//!     .unwrap();
//! assert!(receipt.get("acc").is_some());
//! ```

mod engine;
mod receipt;

pub(crate) use engine::{resolve, ResolveContext, Resolved};
pub use receipt::Receipt;

use chrono::{DateTime, Utc};

use crate::frame::Ref;
use crate::types::{EnumValue, TypeToken};
use crate::value::{Quantity, Value};

/// Subject or object of a statement.
#[derive(Debug, Clone, PartialEq)]
pub enum Node {
    /// A committed element.
    Ref(Ref),
    /// An element introduced earlier in the same delta.
    Placeholder(String),
    /// A literal; only valid as the object of a fact.
    Value(Value),
}

/// Refer to an element introduced earlier in the same delta by name.
#[must_use]
pub fn placeholder(name: impl Into<String>) -> Node {
    Node::Placeholder(name.into())
}

impl From<Ref> for Node {
    fn from(r: Ref) -> Self {
        Self::Ref(r)
    }
}

impl From<&Ref> for Node {
    fn from(r: &Ref) -> Self {
        Self::Ref(r.clone())
    }
}

impl From<Value> for Node {
    fn from(v: Value) -> Self {
        Self::Value(v)
    }
}

impl From<&str> for Node {
    fn from(v: &str) -> Self {
        Self::Value(Value::from(v))
    }
}

impl From<String> for Node {
    fn from(v: String) -> Self {
        Self::Value(Value::String(v))
    }
}

impl From<bool> for Node {
    fn from(v: bool) -> Self {
        Self::Value(Value::Bool(v))
    }
}

impl From<i64> for Node {
    fn from(v: i64) -> Self {
        Self::Value(Value::Int(v))
    }
}

impl From<i32> for Node {
    fn from(v: i32) -> Self {
        Self::Value(Value::from(v))
    }
}

impl From<f64> for Node {
    fn from(v: f64) -> Self {
        Self::Value(Value::Float(v))
    }
}

impl From<Quantity> for Node {
    fn from(v: Quantity) -> Self {
        Self::Value(Value::Quantity(v))
    }
}

impl From<EnumValue> for Node {
    fn from(v: EnumValue) -> Self {
        Self::Value(Value::Enum(v))
    }
}

impl From<DateTime<Utc>> for Node {
    fn from(v: DateTime<Utc>) -> Self {
        Self::Value(Value::Time(v))
    }
}

/// One statement of a delta.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// Create an entity, optionally naming it for later statements.
    Instantiate {
        /// Entity type.
        ty: TypeToken,
        /// Placeholder name bound to the new entity.
        name: Option<String>,
    },
    /// `(subject, predicate, object)`. An element object creates a relation;
    /// a literal object creates an attribute assignment.
    Fact {
        /// Tail element.
        subject: Node,
        /// Relation type.
        predicate: TypeToken,
        /// Head element or literal.
        object: Node,
        /// Placeholder name bound to the new relation or value node.
        name: Option<String>,
    },
    /// End an element, cascading to its live incident facts.
    Terminate {
        /// Element to end.
        target: Node,
    },
}

/// Builder for an ordered batch of statements.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Delta {
    statements: Vec<Statement>,
}

impl Delta {
    /// Creates an empty delta.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an entity of type `ty` bound to placeholder `name`.
    #[must_use]
    pub fn entity(self, ty: &TypeToken, name: impl Into<String>) -> Self {
        self.push(Statement::Instantiate {
            ty: ty.clone(),
            name: Some(name.into()),
        })
    }

    /// Create an entity that later statements do not refer to.
    #[must_use]
    pub fn anonymous_entity(self, ty: &TypeToken) -> Self {
        self.push(Statement::Instantiate {
            ty: ty.clone(),
            name: None,
        })
    }

    /// Add a `(subject, predicate, object)` fact.
    #[must_use]
    pub fn fact(
        self,
        subject: impl Into<Node>,
        predicate: &TypeToken,
        object: impl Into<Node>,
    ) -> Self {
        self.push(Statement::Fact {
            subject: subject.into(),
            predicate: predicate.clone(),
            object: object.into(),
            name: None,
        })
    }

    /// Add a fact and bind the created relation or value node to `name`, so
    /// later statements can attach values or relations to it.
    #[must_use]
    pub fn named_fact(
        self,
        name: impl Into<String>,
        subject: impl Into<Node>,
        predicate: &TypeToken,
        object: impl Into<Node>,
    ) -> Self {
        self.push(Statement::Fact {
            subject: subject.into(),
            predicate: predicate.clone(),
            object: object.into(),
            name: Some(name.into()),
        })
    }

    /// End `target` and everything hanging off it.
    #[must_use]
    pub fn terminate(self, target: impl Into<Node>) -> Self {
        self.push(Statement::Terminate {
            target: target.into(),
        })
    }

    /// Append a raw statement.
    #[must_use]
    pub fn push(mut self, statement: Statement) -> Self {
        self.statements.push(statement);
        self
    }

    /// Append every statement of `other`. Placeholder names share one scope.
    #[must_use]
    pub fn merge(mut self, other: Self) -> Self {
        self.statements.extend(other.statements);
        self
    }

    /// The statements in order.
    #[must_use]
    pub fn statements(&self) -> &[Statement] {
        &self.statements
    }

    /// Number of statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Whether the delta has no statements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}
