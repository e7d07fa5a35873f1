//! Blocking, in-order execution: the default, simplest deployment.

use std::sync::mpsc;
use std::time::Duration;

use crate::error::{GraphFlowError, Result};
use crate::graph::{Graph, TaskSlot};
use crate::scope;
use crate::task::{ClassTask, TaskId};

use super::{restrict_to_ancestors, Deployment, DeploymentConfig, MemoryResultStore, ResultStore};

/// Runs `task.run()` on a helper thread, failing with
/// [`GraphFlowError::TaskExecution`] if it has not returned within
/// `timeout`. The helper thread is detached on timeout (its result, if it
/// ever arrives, is dropped); `task` has already been moved into the
/// closure by that point so this leaks at most one task per timeout, not
/// the whole run.
fn run_with_timeout(
    mut task: Box<dyn ClassTask>,
    timeout: Duration,
) -> Result<Box<dyn ClassTask>> {
    let (tx, rx) = mpsc::channel();
    std::thread::spawn(move || {
        let result = task.run();
        let _ = tx.send((task, result));
    });
    match rx.recv_timeout(timeout) {
        Ok((task, Ok(()))) => Ok(task),
        Ok((task, Err(e))) => Err(GraphFlowError::TaskExecution {
            task: task.type_name().to_string(),
            source: Box::new(e),
        }),
        Err(_) => Err(GraphFlowError::TaskExecution {
            task: "<timed out before type was known>".to_string(),
            source: Box::new(GraphFlowError::Value(format!(
                "task did not complete within {timeout:?}"
            ))),
        }),
    }
}

/// Runs every task synchronously, in topological order, on the calling
/// thread.
pub struct SequentialDeployment {
    config: DeploymentConfig,
    store: MemoryResultStore,
}

impl SequentialDeployment {
    pub fn new(config: DeploymentConfig) -> Self {
        Self { config, store: MemoryResultStore::new() }
    }

    /// The configuration this deployment was built with.
    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Substitutes every field of `task` still holding a pending
    /// [`crate::reference::Reference`] with its realized value (spec.md
    /// §4.5's Iterable Walker): this resolves each field's own reference
    /// directly through the store, so a `CombinedConnection` is
    /// concatenated and an indexed `Connection`/`FunctionFuture` is sliced
    /// exactly as `Reference::resolve_json` already knows how to do,
    /// rather than reconstructing inputs from coarse edge labels.
    fn substitute_inputs(&self, task: &mut dyn ClassTask) -> Result<()> {
        for name in task.attribute_names() {
            if let Some(r) = task.get_ref(name) {
                let value = r.resolve_json(&self.store)?;
                task.apply_attr_json(name, value);
            }
        }
        Ok(())
    }
}

impl Deployment for SequentialDeployment {
    #[tracing::instrument(skip(self, graph))]
    fn run(&mut self, graph: &Graph) -> Result<()> {
        self.run_until(graph, &[])
    }

    #[tracing::instrument(skip(self, graph))]
    fn run_until(&mut self, graph: &Graph, targets: &[TaskId]) -> Result<()> {
        let full_order = graph.topological_order()?;
        let order = restrict_to_ancestors(graph, &full_order, targets);
        let immutable = graph.is_immutable();

        let _guard = scope::disable_scope();
        let inner = graph.inner.clone();
        for id in order {
            if immutable && self.store.available.contains(&id) {
                tracing::debug!(task = %id, "cache hit, skipping");
                continue;
            }

            let is_external = inner.borrow().tasks.get(&id).map(TaskSlot::external).unwrap_or(false);

            let slot = inner
                .borrow_mut()
                .tasks
                .remove(&id)
                .expect("task present in its own topological order");

            match slot {
                TaskSlot::Class(mut task) => {
                    if is_external {
                        self.store.publish_class_task(id, task.as_ref());
                        inner.borrow_mut().tasks.insert(id, TaskSlot::Class(task));
                        continue;
                    }
                    self.substitute_inputs(task.as_mut())?;
                    tracing::info!(task = %id, kind = task.type_name(), "running class task");
                    let task = match self.config.task_timeout {
                        Some(timeout) => run_with_timeout(task, timeout)?,
                        None => {
                            task.run().map_err(|e| match e {
                                GraphFlowError::TaskExecution { .. } => e,
                                other => GraphFlowError::TaskExecution {
                                    task: format!("{}:{}", task.type_name(), id),
                                    source: Box::new(other),
                                },
                            })?;
                            task
                        }
                    };
                    self.store.publish_class_task(id, task.as_ref());
                    inner.borrow_mut().tasks.insert(id, TaskSlot::Class(task));
                }
                TaskSlot::Function(mut task) => {
                    tracing::info!(task = %id, "running function task");
                    let result = task.run(&self.store)?;
                    self.store.publish_function_result(id, result);
                    inner.borrow_mut().tasks.insert(id, TaskSlot::Function(task));
                }
            }
        }
        Ok(())
    }

    fn store(&self) -> &dyn ResultStore {
        &self.store
    }
}
