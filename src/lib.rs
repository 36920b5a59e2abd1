//! # chronograph - a temporal typed graph store
//!
//! chronograph keeps a graph of typed entities, relations and attribute
//! values as an append-only log of atomic commits. Every commit produces a
//! new frame; every frame stays readable forever.
//!
//! ## Core Concepts
//!
//! - **Type token**: a registered name in one of three namespaces, `ET`
//!   (entity types), `RT` (relation types) and `EN` (enums)
//! - **Delta**: an ordered batch of statements that commits all at once,
//!   using placeholder names for elements it creates
//! - **Frame**: the graph as of one commit
//! - **Ref**: an element anchored at a frame
//! - **Query**: a lazy traversal pipeline, run by a terminal call
//!
//! ## Usage
//!
//! ```rust
//! use chronograph::{parse_time, placeholder, Delta, Graph};
//!
//! let graph = Graph::new();
//! let account = graph.entity_type("Account")?;
//! let transaction = graph.entity_type("Transaction")?;
//! let name = graph.relation_type("Name")?;
//! let amount = graph.relation_type("Amount")?;
//! let date = graph.relation_type("Date")?;
//! let has_entry = graph.relation_type("HasEntry")?;
//! let dollars = graph.enum_value("Unit", "dollars")?;
//!
//! let receipt = graph.commit(
//!     Delta::new()
//!         .entity(&account, "general")
//!         .fact(placeholder("general"), &name, "General")
//!         .entity(&transaction, "t")
//!         .fact(placeholder("t"), &amount, 10.0 * dollars)
//!         .fact(placeholder("t"), &date, parse_time("2021-12-06")?)
//!         .fact(placeholder("general"), &has_entry, placeholder("t")),
//! )?;
//!
//! let general = receipt.require("general")?;
//! let total = general
//!     .query()
//!     .outgoing(&has_entry)
//!     .values(&amount)
//!     .sum()?;
//! assert_eq!(total.as_float(), Some(10.0));
//! # Ok::<(), chronograph::GraphError>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

// Core types
pub mod element;
pub mod error;
pub mod time;
pub mod types;
pub mod value;

// Storage and commits
pub mod config;
pub mod delta;
pub mod feed;
pub mod storage;
pub mod store;
pub mod transaction;

// Reads
pub mod frame;
pub mod graph;
pub mod pipeline;

// Re-export primary types at crate root for convenience
pub use config::GraphConfig;
pub use delta::{placeholder, Delta, Node, Receipt, Statement};
pub use element::{ElementId, ElementKind, GraphId, LogPosition};
pub use error::{ExecutionError, GraphError, GraphResult, ValidationError};
pub use feed::{CommitFeed, CommitNotice};
pub use frame::{to_frame, Frame, Lifecycle, Ref};
pub use graph::Graph;
pub use pipeline::{CancellationToken, Query};
pub use storage::{CommitLog, LogRecord, MemoryLog, StorageError};
pub use store::{Fact, FactBody, FrameStats};
pub use time::parse_time;
pub use transaction::{NestedScope, Transaction};
pub use types::{EnumValue, TypeKind, TypeToken};
pub use value::{Quantity, Value};
