//! An implicit-scope graph construction and execution engine.
//!
//! Tasks are ordinary structs and functions; registering one while a
//! [`Graph`]'s build scope is open captures it as a node, and reading an
//! attribute off a just-registered task produces a [`reference::Reference`]
//! instead of a value, wiring an edge for later. Once the scope closes, a
//! [`Deployment`] walks the graph in topological order, substituting each
//! edge's realized value before running its target.
//!
//! ```
//! use graphflow_core::{combine, Graph};
//! use graphflow_core::reference::Connection;
//!
//! let graph = Graph::new();
//! {
//!     let _scope = graph.scope().unwrap();
//! }
//! assert!(graph.is_empty());
//! let _ = combine((Connection::to_task(uuid::Uuid::new_v4()), Connection::to_task(uuid::Uuid::new_v4())));
//! ```

pub mod combinators;
pub mod deployment;
pub mod error;
pub mod function_task;
pub mod graph;
pub mod reference;
pub mod resolve;
pub mod scope;
pub mod task;

/// Re-exports used only by code generated by `graphflow-derive`, not part
/// of this crate's public API.
#[doc(hidden)]
pub mod __private {
    pub use serde_json;
}

pub use combinators::{as_map_key, combine};
pub use error::{GraphFlowError, Result};
pub use function_task::{nodify, nodify0, nodify2, nodify3, nodify4, nodify_list};
pub use graph::{Graph, Group};
pub use resolve::resolve;
pub use scope::{disable_scope, DisableScopeGuard, ScopeHandle};
pub use task::{get_attribute, register, ClassTask, FunctionTaskObj, Input, TaskId};
