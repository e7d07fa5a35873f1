//! Parallel execution over a pluggable worker backend.
//!
//! Tasks are grouped into topological "waves": a wave contains every task
//! whose predecessors have already finished, so every task within a wave
//! can run concurrently. The default backend submits each job to a
//! `tokio` blocking thread pool; a user can plug in another executor by
//! implementing [`WorkerBackend`].

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{GraphFlowError, Result};
use crate::graph::{Graph, TaskSlot};
use crate::scope;
use crate::task::{ClassTask, FunctionTaskObj, TaskId};

use super::{restrict_to_ancestors, Deployment, DeploymentConfig, MemoryResultStore, ResultStore};

/// The outcome of running one job: a class task's box (handed back so it
/// can be reinserted into the graph) or a function task's JSON result.
pub enum JobOutput {
    Class(Box<dyn ClassTask>),
    Function(Box<dyn FunctionTaskObj>, Value),
}

/// One unit of work submitted to a [`WorkerBackend`]: a plain, `'static`
/// closure that performs the blocking work and returns its outcome.
pub type Job = Box<dyn FnOnce() -> Result<JobOutput> + Send>;

/// A pluggable executor for [`WorkerPoolDeployment`]. The shipped default,
/// [`TokioWorkerBackend`], runs each job on a `tokio` blocking thread; a
/// user can supply another backend (e.g. a `rayon` pool) by implementing
/// this trait.
#[async_trait]
pub trait WorkerBackend: Send + Sync {
    async fn submit(&self, job: Job) -> Result<JobOutput>;
}

#[async_trait]
impl WorkerBackend for Arc<dyn WorkerBackend> {
    async fn submit(&self, job: Job) -> Result<JobOutput> {
        self.as_ref().submit(job).await
    }
}

/// Wraps a backend, failing a job that exceeds `DeploymentConfig::task_timeout`
/// instead of waiting on it forever.
struct TimeoutBackend<B> {
    inner: B,
    timeout: std::time::Duration,
}

#[async_trait]
impl<B: WorkerBackend> WorkerBackend for TimeoutBackend<B> {
    async fn submit(&self, job: Job) -> Result<JobOutput> {
        match tokio::time::timeout(self.timeout, self.inner.submit(job)).await {
            Ok(result) => result,
            Err(_) => Err(GraphFlowError::Backend(format!(
                "job did not complete within {:?}",
                self.timeout
            ))),
        }
    }
}

/// The default backend: one `tokio::task::spawn_blocking` call per job.
pub struct TokioWorkerBackend;

#[async_trait]
impl WorkerBackend for TokioWorkerBackend {
    async fn submit(&self, job: Job) -> Result<JobOutput> {
        tokio::task::spawn_blocking(job)
            .await
            .map_err(|e| GraphFlowError::Backend(e.to_string()))?
    }
}

/// Runs independent tasks concurrently, wave by wave, on a pluggable
/// [`WorkerBackend`].
pub struct WorkerPoolDeployment {
    config: DeploymentConfig,
    backend: Arc<dyn WorkerBackend>,
    runtime: tokio::runtime::Runtime,
    store: MemoryResultStore,
}

impl WorkerPoolDeployment {
    /// Builds a deployment with the default `tokio`-backed worker pool,
    /// sized from `config.worker_count`.
    pub fn new(config: DeploymentConfig) -> Result<Self> {
        Self::with_backend(config, Arc::new(TokioWorkerBackend))
    }

    /// Builds a deployment with a custom [`WorkerBackend`].
    pub fn with_backend(config: DeploymentConfig, backend: Arc<dyn WorkerBackend>) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(config.worker_count.max(1))
            .enable_all()
            .build()
            .map_err(|e| GraphFlowError::Backend(e.to_string()))?;
        let backend: Arc<dyn WorkerBackend> = match config.task_timeout {
            Some(timeout) => Arc::new(TimeoutBackend { inner: backend, timeout }),
            None => backend,
        };
        Ok(Self { config, backend, runtime, store: MemoryResultStore::new() })
    }

    /// The configuration this deployment was built with.
    pub fn config(&self) -> &DeploymentConfig {
        &self.config
    }

    /// Substitutes every field of `task` still holding a pending
    /// [`crate::reference::Reference`] with its realized value, the same
    /// Iterable Walker substitution [`super::SequentialDeployment`] does
    /// (spec.md §4.5): resolving each field's own reference through the
    /// store handles `CombinedConnection` concatenation and indexed
    /// references directly, rather than reconstructing inputs from coarse
    /// edge labels. Done eagerly, before the task moves into its job
    /// closure, since the closure has no borrow on `self`.
    fn substitute_inputs(&self, task: &mut dyn ClassTask) -> Result<()> {
        for name in task.attribute_names() {
            if let Some(r) = task.get_ref(name) {
                let value = r.resolve_json(&self.store)?;
                task.apply_attr_json(name, value);
            }
        }
        Ok(())
    }

    /// Groups `order` into waves: wave `k` holds every task whose direct
    /// predecessors are all in waves `< k`.
    fn waves(graph: &Graph, order: &[TaskId]) -> Vec<Vec<TaskId>> {
        let mut wave_of: HashMap<TaskId, usize> = HashMap::new();
        let mut max_wave = 0usize;
        for &id in order {
            let wave = graph
                .predecessors(id)
                .into_iter()
                .filter_map(|p| wave_of.get(&p).copied())
                .max()
                .map(|w| w + 1)
                .unwrap_or(0);
            wave_of.insert(id, wave);
            max_wave = max_wave.max(wave);
        }
        let mut waves = vec![Vec::new(); max_wave + 1];
        for &id in order {
            waves[wave_of[&id]].push(id);
        }
        waves
    }
}

impl Deployment for WorkerPoolDeployment {
    #[tracing::instrument(skip(self, graph))]
    fn run(&mut self, graph: &Graph) -> Result<()> {
        self.run_until(graph, &[])
    }

    #[tracing::instrument(skip(self, graph))]
    fn run_until(&mut self, graph: &Graph, targets: &[TaskId]) -> Result<()> {
        let full_order = graph.topological_order()?;
        let order = restrict_to_ancestors(graph, &full_order, targets);
        let immutable = graph.is_immutable();
        let waves = Self::waves(graph, &order);

        let _guard = scope::disable_scope();
        for wave in waves {
            let mut jobs: Vec<(TaskId, Job)> = Vec::new();
            for id in wave {
                if immutable && self.store.available.contains(&id) {
                    tracing::debug!(task = %id, "cache hit, skipping");
                    continue;
                }

                let is_external = graph.inner.borrow().tasks.get(&id).map(TaskSlot::external).unwrap_or(false);
                let mut slot = graph
                    .inner
                    .borrow_mut()
                    .tasks
                    .remove(&id)
                    .expect("task present in its own topological order");

                match &mut slot {
                    TaskSlot::Class(task) if is_external => {
                        self.store.publish_class_task(id, task.as_ref());
                        graph.inner.borrow_mut().tasks.insert(id, slot);
                        continue;
                    }
                    _ => {}
                }

                let job: Job = match slot {
                    TaskSlot::Class(mut task) => {
                        self.substitute_inputs(task.as_mut())?;
                        Box::new(move || {
                            task.run().map_err(|e| GraphFlowError::TaskExecution {
                                task: format!("{}:{}", task.type_name(), id),
                                source: Box::new(e),
                            })?;
                            Ok(JobOutput::Class(task))
                        })
                    }
                    TaskSlot::Function(mut task) => {
                        let store_snapshot = self.store.clone();
                        Box::new(move || {
                            let result = task.run(&store_snapshot)?;
                            Ok(JobOutput::Function(task, result))
                        })
                    }
                };
                jobs.push((id, job));
            }

            if jobs.is_empty() {
                continue;
            }

            let backend = self.backend.clone();
            let results: Vec<(TaskId, JobOutput)> = self.runtime.block_on(async {
                let futures = jobs.into_iter().map(|(id, job)| {
                    let backend = backend.clone();
                    async move { Ok::<_, GraphFlowError>((id, backend.submit(job).await?)) }
                });
                futures::future::try_join_all(futures).await
            })?;

            for (id, output) in results {
                match output {
                    JobOutput::Class(task) => {
                        self.store.publish_class_task(id, task.as_ref());
                        graph.inner.borrow_mut().tasks.insert(id, TaskSlot::Class(task));
                    }
                    JobOutput::Function(task, value) => {
                        self.store.publish_function_result(id, value);
                        graph.inner.borrow_mut().tasks.insert(id, TaskSlot::Function(task));
                    }
                }
            }
        }
        Ok(())
    }

    fn store(&self) -> &dyn ResultStore {
        &self.store
    }
}
