//! Error types for chronograph.
//!
//! All errors are strongly typed using thiserror. Validation problems,
//! runtime outcomes and storage failures live in separate enums so callers
//! can pattern match on the layer that failed; [`GraphError`] ties them
//! together.

use thiserror::Error;

use crate::element::{ElementId, ElementKind, LogPosition};
use crate::storage::StorageError;
use crate::types::TypeKind;

/// Validation errors: the input itself is malformed or contradictory.
///
/// Retrying the same input never helps.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A placeholder was used before the statement introducing it.
    #[error("Placeholder '{name}' is used in statement {statement} before it is introduced")]
    DanglingPlaceholder {
        /// Placeholder name.
        name: String,
        /// Index of the offending statement.
        statement: usize,
    },

    /// Two statements introduce the same placeholder.
    #[error("Placeholder '{name}' is introduced more than once")]
    DuplicatePlaceholder {
        /// Placeholder name.
        name: String,
    },

    /// A type token was used in the wrong namespace.
    #[error("'{name}' is a {actual} type, expected a {expected} type")]
    TypeKindMismatch {
        /// Type name.
        name: String,
        /// Namespace the position requires.
        expected: TypeKind,
        /// Namespace of the token.
        actual: TypeKind,
    },

    /// A type token from another registry.
    #[error("Type token {name} is not registered with this graph")]
    UnknownType {
        /// Type name.
        name: String,
    },

    /// A statement refers to a fact that is not live.
    #[error("Fact {id} does not exist at frame {frame}")]
    MissingFact {
        /// Referenced fact.
        id: ElementId,
        /// Frame it was checked against.
        frame: LogPosition,
    },

    /// An id is created twice.
    #[error("Element {id} already exists")]
    DuplicateElement {
        /// Duplicated id.
        id: ElementId,
    },

    /// An element of this kind cannot take part in the statement.
    #[error("Element {id} is a {kind} and cannot {action}")]
    InvalidElement {
        /// Offending element.
        id: ElementId,
        /// Its kind.
        kind: ElementKind,
        /// What was attempted.
        action: &'static str,
    },

    /// A reference from another graph.
    #[error("Reference {id} belongs to a different graph")]
    ForeignReference {
        /// Referenced element.
        id: ElementId,
    },

    /// A structurally invalid delta or batch.
    #[error("Invalid delta: {reason}")]
    InvalidDelta {
        /// What is wrong with it.
        reason: String,
    },

    /// A delta exceeds `GraphConfig::max_delta_statements`.
    #[error("Delta has {actual} statements, the maximum is {max}")]
    TooManyStatements {
        /// Statements in the delta.
        actual: usize,
        /// Configured limit.
        max: usize,
    },

    /// Values that cannot be combined or compared.
    #[error("Incompatible values: {reason}")]
    IncompatibleValues {
        /// Which values and why.
        reason: String,
    },

    /// Unparseable time input.
    #[error("Cannot parse '{input}' as a point in time")]
    InvalidTime {
        /// Input as given.
        input: String,
    },

    /// An empty type or variant name.
    #[error("{what} cannot be empty")]
    EmptyName {
        /// Which name.
        what: &'static str,
    },

    /// A configuration value out of range.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig {
        /// Which setting and why.
        reason: String,
    },

    /// The transaction scope was poisoned by a failed nested scope.
    #[error("Transaction scope was aborted: {reason}")]
    ScopeAborted {
        /// Why the nested scope failed.
        reason: String,
    },
}

/// Execution errors: the input was well formed but the graph state or the
/// runtime did not allow the operation.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// Nothing matched. Usually recoverable.
    #[error("Not found: {what}")]
    NotFound {
        /// What was looked for.
        what: String,
    },

    /// Another commit changed a fact this one relies on. Retryable.
    #[error("Commit conflict on {id}: it changed between frame {base} and frame {current}")]
    Conflict {
        /// Changed fact.
        id: ElementId,
        /// Frame the batch was built against.
        base: LogPosition,
        /// Latest frame at commit time.
        current: LogPosition,
    },

    /// More than one match where at most one was expected.
    #[error("Expected at most one match for {what}, found {found}")]
    Cardinality {
        /// The traversal that matched.
        what: String,
        /// Number of matches.
        found: usize,
    },

    /// More than one value where a single one was expected.
    #[error("Expected a single value, found {found}")]
    MultipleValues {
        /// Number of values.
        found: usize,
    },

    /// The fact had already ended.
    #[error("Fact {id} was already terminated at frame {at}")]
    AlreadyTerminated {
        /// Terminated fact.
        id: ElementId,
        /// Frame it ended at.
        at: LogPosition,
    },

    /// The operation needs a different element kind.
    #[error("Element {id} is a {actual}, expected a {expected}")]
    WrongKind {
        /// Element read.
        id: ElementId,
        /// Kind the operation needs.
        expected: ElementKind,
        /// Kind of the element.
        actual: ElementKind,
    },

    /// A pending reference was read without a frame.
    #[error("Reference {id} is not anchored at a frame")]
    Unanchored {
        /// Referenced element.
        id: ElementId,
    },

    /// A deadline or lock wait expired. Retryable.
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        /// The limit that expired, in milliseconds.
        duration_ms: u64,
    },

    /// A cancellation token fired.
    #[error("Operation was cancelled")]
    Cancelled,

    /// The other end of a channel went away.
    #[error("Channel disconnected: {path}")]
    Disconnected {
        /// Which channel.
        path: String,
    },
}

/// Top-level error type for chronograph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// Malformed input.
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Runtime outcome.
    #[error("Execution error: {0}")]
    Execution(#[from] ExecutionError),

    /// Commit log failure.
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// A pipeline stage failed; `source` is the underlying failure.
    #[error("Stage '{stage}' failed on {input}: {source}")]
    Traversal {
        /// Stage name.
        stage: &'static str,
        /// Debug rendering of the failing input.
        input: String,
        /// The underlying failure.
        #[source]
        source: Box<GraphError>,
    },

    /// A broken internal invariant.
    #[error("Internal error: {message}")]
    Internal {
        /// Description.
        message: String,
    },
}

impl GraphError {
    /// Creates an internal error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Creates a `NotFound` execution error.
    #[must_use]
    pub fn not_found(what: impl Into<String>) -> Self {
        Self::Execution(ExecutionError::NotFound { what: what.into() })
    }

    /// Wraps `self` with the pipeline stage and input that produced it.
    ///
    /// Errors that already carry stage context are returned unchanged so the
    /// innermost failing stage is the one reported.
    #[must_use]
    pub fn in_stage(self, stage: &'static str, input: impl std::fmt::Debug) -> Self {
        match self {
            Self::Traversal { .. } => self,
            other => Self::Traversal {
                stage,
                input: format!("{input:?}"),
                source: Box::new(other),
            },
        }
    }

    /// Returns the innermost error, looking through stage context.
    #[must_use]
    pub fn root_cause(&self) -> &GraphError {
        let mut current = self;
        while let Self::Traversal { source, .. } = current {
            current = source;
        }
        current
    }

    /// Returns the stage name if this error came out of a pipeline.
    #[must_use]
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Traversal { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Returns true if this is a validation error.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(self.root_cause(), Self::Validation(_))
    }

    /// Returns true if this is an execution error.
    #[must_use]
    pub fn is_execution(&self) -> bool {
        matches!(self.root_cause(), Self::Execution(_))
    }

    /// Returns true if this is a storage error.
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self.root_cause(), Self::Storage(_))
    }

    /// Returns true if this is an internal error.
    #[must_use]
    pub fn is_internal(&self) -> bool {
        matches!(self.root_cause(), Self::Internal { .. })
    }

    /// Returns true for recoverable absence.
    ///
    /// Absence is an expected outcome of traversal; callers decide whether
    /// to substitute a default or propagate.
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Execution(ExecutionError::NotFound { .. })
        )
    }

    /// Returns true if this is a commit-time serialization conflict.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Execution(ExecutionError::Conflict { .. })
        )
    }

    /// Returns true if a cardinality assumption was violated.
    #[must_use]
    pub fn is_cardinality(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Execution(
                ExecutionError::Cardinality { .. } | ExecutionError::MultipleValues { .. }
            )
        )
    }

    /// Returns true if a delta used a placeholder before introducing it.
    #[must_use]
    pub fn is_dangling_placeholder(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Validation(ValidationError::DanglingPlaceholder { .. })
        )
    }

    /// Returns true if a fact was terminated twice.
    #[must_use]
    pub fn is_already_terminated(&self) -> bool {
        matches!(
            self.root_cause(),
            Self::Execution(ExecutionError::AlreadyTerminated { .. })
        )
    }

    /// Returns true if retrying the whole operation may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self.root_cause() {
            Self::Execution(e) => {
                matches!(e, ExecutionError::Conflict { .. } | ExecutionError::Timeout { .. })
            }
            _ => false,
        }
    }
}

/// Result type alias for chronograph operations.
pub type GraphResult<T> = Result<T, GraphError>;
