//! Error types for graph construction and execution.
//!
//! `GraphFlowError` is the single error type returned by every fallible
//! operation in this crate, following the taxonomy in the design document:
//! build-time errors (scope nesting, missing attributes, bad combinations,
//! group misuse) and run-time errors (cycles, backend failures, external
//! task misuse).
//!
//! # Examples
//!
//! ```
//! use graphflow_core::error::GraphFlowError;
//!
//! let err = GraphFlowError::AttributeMissing { attribute: "v".into() };
//! assert!(err.to_string().contains("v"));
//! ```

use thiserror::Error;

/// Convenience result type using [`GraphFlowError`].
pub type Result<T> = std::result::Result<T, GraphFlowError>;

/// All errors that can occur while building or running a graph.
#[derive(Error, Debug)]
pub enum GraphFlowError {
    /// Raised when entering a scope while one is already active on the same
    /// execution context, or when the scope pointer changes unexpectedly
    /// while a scope is active.
    ///
    /// **Recovery**: close the existing scope (drop its `ScopeHandle`)
    /// before opening a new one.
    #[error("a graph scope is already active on this execution context")]
    ScopeNesting,

    /// A public attribute was read from a task that does not define it.
    #[error("task has no attribute '{attribute}'")]
    AttributeMissing {
        /// The attribute name that was requested.
        attribute: String,
    },

    /// Another attribute access was chained directly off a `Connection`
    /// (e.g. `a.v.w`), which is not resolvable without running the graph.
    #[error("cannot chain attribute '{attribute}' off an unresolved connection")]
    ConnectionAttribute {
        /// The attribute name that was chained.
        attribute: String,
    },

    /// The graph's tasks and edges do not admit a topological order.
    ///
    /// This crate does not support cycles (see Non-goals); this error
    /// signals that one was introduced.
    ///
    /// # Example
    ///
    /// ```
    /// use graphflow_core::error::GraphFlowError;
    /// let err = GraphFlowError::CycleDetected;
    /// assert_eq!(err.to_string(), "graph contains a cycle; no topological order exists");
    /// ```
    #[error("graph contains a cycle; no topological order exists")]
    CycleDetected,

    /// A deployment was asked to execute a task marked `external`.
    #[error("task '{task}' is external and cannot be executed")]
    ExternalTaskExecution {
        /// Debug label of the external task.
        task: String,
    },

    /// Combining references failed: either a non-list-typed reference was
    /// combined, or an already-sliced `CombinedConnection` was re-sliced.
    #[error("combination error: {0}")]
    Combination(String),

    /// A group operation failed: nested active groups, or an empty group
    /// path.
    #[error("group error: {0}")]
    Group(String),

    /// The pluggable worker backend reported a failure.
    #[error("worker backend failed: {0}")]
    Backend(String),

    /// Duplicate task identity, or a duplicate key when reshaping a
    /// combined reference into a map via `as_map_key`.
    #[error("value error: {0}")]
    Value(String),

    /// A task's `run` method returned an application error.
    #[error("task '{task}' failed: {source}")]
    TaskExecution {
        /// Debug label of the failing task.
        task: String,
        /// The underlying error.
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Serialization of an attribute value to/from JSON failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Deployment configuration could not be parsed.
    #[error("configuration error: {0}")]
    Configuration(String),
}
