//! Deployments: the runtime that walks a graph's topological order and
//! executes each task, publishing its result so downstream references can
//! resolve (spec.md §4.5).
//!
//! `Deployment` is a trait so the crate can ship two concrete
//! implementations — [`sequential::SequentialDeployment`] (blocking,
//! in-order) and [`worker_pool::WorkerPoolDeployment`] (parallel, backed by
//! a pluggable [`worker_pool::WorkerBackend`]) — without either being
//! privileged at the type level.

mod config;
mod sequential;
mod worker_pool;

pub use config::DeploymentConfig;
pub use sequential::SequentialDeployment;
pub use worker_pool::{JobOutput, TokioWorkerBackend, WorkerBackend, WorkerPoolDeployment};

use std::collections::HashMap;

use serde_json::Value;

use crate::graph::Graph;
use crate::task::{ClassTask, TaskId};

/// The published results of every task that has run so far, queried by
/// [`crate::reference::Reference::resolve_json`] while substituting
/// downstream inputs.
pub trait ResultStore {
    /// The realized value of `attr` on `task`, or the whole-task object if
    /// `attr` is empty. `None` if the task has not produced a value for
    /// that attribute yet.
    fn get_class_attr(&self, task: TaskId, attr: &str) -> Option<Value>;

    /// The realized result of a function task, if it has run.
    fn get_function_result(&self, task: TaskId) -> Option<Value>;
}

/// Runs a graph to completion (or partially, toward a set of target
/// tasks), publishing results into an internal [`ResultStore`].
pub trait Deployment {
    /// Runs every task in the graph that has not already run (under
    /// immutable-mode caching).
    fn run(&mut self, graph: &Graph) -> crate::error::Result<()>;

    /// Runs only the ancestors of `targets` (plus `targets` themselves), in
    /// topological order. Passing an empty slice is equivalent to [`Deployment::run`].
    fn run_until(&mut self, graph: &Graph, targets: &[TaskId]) -> crate::error::Result<()>;

    /// The store holding every result published so far.
    fn store(&self) -> &dyn ResultStore;
}

/// An in-memory [`ResultStore`] shared by both deployment implementations.
#[derive(Default, Clone)]
pub(crate) struct MemoryResultStore {
    class_attrs: HashMap<(TaskId, String), Value>,
    function_results: HashMap<TaskId, Value>,
    pub(crate) available: std::collections::HashSet<TaskId>,
}

impl MemoryResultStore {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Publishes every public attribute of a just-run class task, plus a
    /// whole-object entry (keyed by the empty attribute name) for
    /// whole-task references.
    pub(crate) fn publish_class_task(&mut self, id: TaskId, task: &dyn ClassTask) {
        let mut whole = serde_json::Map::new();
        for name in task.attribute_names() {
            if let Some(v) = task.get_attr_json(name) {
                whole.insert((*name).to_string(), v.clone());
                self.class_attrs.insert((id, (*name).to_string()), v);
            }
        }
        self.class_attrs.insert((id, String::new()), Value::Object(whole));
        self.available.insert(id);
    }

    pub(crate) fn publish_function_result(&mut self, id: TaskId, value: Value) {
        self.function_results.insert(id, value);
        self.available.insert(id);
    }
}

impl ResultStore for MemoryResultStore {
    fn get_class_attr(&self, task: TaskId, attr: &str) -> Option<Value> {
        self.class_attrs.get(&(task, attr.to_string())).cloned()
    }

    fn get_function_result(&self, task: TaskId) -> Option<Value> {
        self.function_results.get(&task).cloned()
    }
}

/// Restricts a full topological order to the ancestors of `targets` (plus
/// the targets themselves), preserving relative order. An empty `targets`
/// means "run everything".
pub(crate) fn restrict_to_ancestors(graph: &Graph, order: &[TaskId], targets: &[TaskId]) -> Vec<TaskId> {
    if targets.is_empty() {
        return order.to_vec();
    }
    let mut keep: std::collections::HashSet<TaskId> = targets.iter().copied().collect();
    let mut frontier: Vec<TaskId> = targets.to_vec();
    while let Some(id) = frontier.pop() {
        for pred in graph.predecessors(id) {
            if keep.insert(pred) {
                frontier.push(pred);
            }
        }
    }
    order.iter().copied().filter(|id| keep.contains(id)).collect()
}
