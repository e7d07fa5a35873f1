//! The directed multigraph: tasks keyed by identity, edges carrying
//! `(source_attr, target_attr)` labels, and named groups of tasks
//! (spec.md §3/§4.4).
//!
//! Tasks are stored in an arena keyed by [`TaskId`] and edges reference
//! only identities, never task pointers (design document §9, "Arena +
//! index"), so the graph can be handed to a [`crate::deployment::Deployment`]
//! without the scope's `Rc<RefCell<_>>` aliasing rules getting in the way
//! of execution.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet, VecDeque};
use std::rc::Rc;

use crate::error::{GraphFlowError, Result};
use crate::scope::ScopeHandle;
use crate::task::{ClassTask, FunctionTaskObj, TaskId};

pub(crate) enum TaskSlot {
    Class(Box<dyn ClassTask>),
    Function(Box<dyn FunctionTaskObj>),
}

impl TaskSlot {
    pub(crate) fn external(&self) -> bool {
        match self {
            TaskSlot::Class(t) => t.external(),
            TaskSlot::Function(t) => t.external(),
        }
    }
}

/// A single edge: `source`'s `source_attr` feeds `target`'s `target_attr`.
/// `source_attr` is `None` for a whole-object reference or a function-task
/// result.
#[derive(Debug, Clone)]
pub struct Edge {
    pub source: TaskId,
    pub target: TaskId,
    pub source_attr: Option<String>,
    pub target_attr: String,
}

/// A named, ordered subset of tasks in one graph (spec.md §3/§4.4).
#[derive(Debug, Clone, Default)]
pub struct GroupInfo {
    pub path: Vec<String>,
    pub members: Vec<TaskId>,
}

/// The graph's shared interior state. Lives behind `Rc<RefCell<_>>` during
/// the build phase (so the thread-local scope and every task constructor
/// can reach it) and is handed by value to a [`crate::deployment::Deployment`]
/// once building is done.
pub struct GraphInner {
    pub(crate) tasks: HashMap<TaskId, TaskSlot>,
    pub(crate) edges: Vec<Edge>,
    pub(crate) insertion_order: Vec<TaskId>,
    pub(crate) resolved: HashSet<TaskId>,
    pub(crate) groups: HashMap<Vec<String>, Vec<TaskId>>,
    pub(crate) active_group: Option<Vec<String>>,
    pub(crate) immutable: bool,
    pub(crate) available: HashSet<TaskId>,
    pub(crate) deployment: Option<Rc<RefCell<dyn crate::deployment::Deployment>>>,
}

impl GraphInner {
    pub fn new() -> Self {
        Self {
            tasks: HashMap::new(),
            edges: Vec::new(),
            insertion_order: Vec::new(),
            resolved: HashSet::new(),
            groups: HashMap::new(),
            active_group: None,
            immutable: false,
            available: HashSet::new(),
            deployment: None,
        }
    }

    pub(crate) fn insert_task(&mut self, id: TaskId, slot: TaskSlot) {
        self.tasks.insert(id, slot);
        self.insertion_order.push(id);
        if let Some(path) = self.active_group.clone() {
            self.groups.entry(path).or_default().push(id);
        }
    }

    pub(crate) fn check_source_present(&self, id: TaskId) -> Result<()> {
        if self.tasks.contains_key(&id) {
            Ok(())
        } else {
            Err(GraphFlowError::Value(format!(
                "referenced task {id} is not registered in this graph"
            )))
        }
    }

    /// Kahn's algorithm, ties broken by insertion order so repeated runs
    /// over a fixed build sequence are reproducible (spec.md §4.4).
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        let mut indegree: HashMap<TaskId, usize> =
            self.insertion_order.iter().map(|id| (*id, 0)).collect();
        let mut adj: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for edge in &self.edges {
            *indegree.entry(edge.target).or_insert(0) += 1;
            adj.entry(edge.source).or_default().push(edge.target);
        }

        let mut queue: VecDeque<TaskId> = self
            .insertion_order
            .iter()
            .copied()
            .filter(|id| indegree.get(id).copied().unwrap_or(0) == 0)
            .collect();

        let mut order = Vec::with_capacity(self.insertion_order.len());
        while let Some(id) = queue.pop_front() {
            order.push(id);
            if let Some(next) = adj.get(&id) {
                // Insertion order determines tie-breaking: append newly
                // zero-indegree nodes in the graph's original insertion
                // order rather than edge-discovery order.
                let mut newly_ready = Vec::new();
                for succ in next {
                    let deg = indegree.get_mut(succ).expect("edge target tracked");
                    *deg -= 1;
                    if *deg == 0 {
                        newly_ready.push(*succ);
                    }
                }
                newly_ready.sort_by_key(|id| {
                    self.insertion_order.iter().position(|x| x == id).unwrap_or(usize::MAX)
                });
                for id in newly_ready {
                    queue.push_back(id);
                }
            }
        }

        if order.len() != self.insertion_order.len() {
            return Err(GraphFlowError::CycleDetected);
        }
        Ok(order)
    }

    pub fn predecessors(&self, id: TaskId) -> Vec<TaskId> {
        self.edges
            .iter()
            .filter(|e| e.target == id)
            .map(|e| e.source)
            .collect()
    }

    pub fn successors(&self, id: TaskId) -> Vec<TaskId> {
        self.edges
            .iter()
            .filter(|e| e.source == id)
            .map(|e| e.target)
            .collect()
    }

    pub fn get_edges(&self, u: TaskId, v: TaskId) -> Vec<Edge> {
        self.edges
            .iter()
            .filter(|e| e.source == u && e.target == v)
            .cloned()
            .collect()
    }

    /// Identity relabelling: rewrites the task map key and every edge
    /// endpoint / group membership entry in place (spec.md §4.4).
    pub fn rename_task(&mut self, old: TaskId, new: TaskId) -> Result<()> {
        if !self.tasks.contains_key(&old) {
            return Err(GraphFlowError::Value(format!("no task with id {old}")));
        }
        if self.tasks.contains_key(&new) {
            return Err(GraphFlowError::Value(format!(
                "a task with id {new} already exists"
            )));
        }
        let task = self.tasks.remove(&old).expect("checked above");
        self.tasks.insert(new, task);
        for id in self.insertion_order.iter_mut() {
            if *id == old {
                *id = new;
            }
        }
        for edge in self.edges.iter_mut() {
            if edge.source == old {
                edge.source = new;
            }
            if edge.target == old {
                edge.target = new;
            }
        }
        if self.resolved.remove(&old) {
            self.resolved.insert(new);
        }
        if self.available.remove(&old) {
            self.available.insert(new);
        }
        for members in self.groups.values_mut() {
            for id in members.iter_mut() {
                if *id == old {
                    *id = new;
                }
            }
        }
        Ok(())
    }
}

impl Default for GraphInner {
    fn default() -> Self {
        Self::new()
    }
}

/// A directed multigraph of tasks, built inside a [`crate::scope`] and run
/// by a [`crate::deployment::Deployment`].
#[derive(Clone)]
pub struct Graph {
    pub(crate) inner: Rc<RefCell<GraphInner>>,
}

impl Graph {
    /// Creates an empty, mutable graph.
    pub fn new() -> Self {
        Self { inner: Rc::new(RefCell::new(GraphInner::new())) }
    }

    /// Creates an empty graph in immutable mode: once a task has
    /// successfully run under a deployment bound to this graph, it will
    /// not run again (spec.md §4.5).
    pub fn new_immutable() -> Self {
        let mut inner = GraphInner::new();
        inner.immutable = true;
        Self { inner: Rc::new(RefCell::new(inner)) }
    }

    /// Opens a build scope around this graph. Attribute reads on tasks
    /// constructed while the returned handle is alive produce
    /// `Connection`s instead of values.
    pub fn scope(&self) -> Result<ScopeHandle> {
        ScopeHandle::open(self.inner.clone())
    }

    /// Number of tasks currently in the graph.
    pub fn len(&self) -> usize {
        self.inner.borrow().tasks.len()
    }

    /// Whether the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is present in the graph.
    pub fn contains(&self, id: TaskId) -> bool {
        self.inner.borrow().tasks.contains_key(&id)
    }

    /// Whether `id` is registered and marked `external`.
    pub fn is_external(&self, id: TaskId) -> bool {
        self.inner.borrow().tasks.get(&id).map(TaskSlot::external).unwrap_or(false)
    }

    /// Deterministic topological order over every task in the graph.
    pub fn topological_order(&self) -> Result<Vec<TaskId>> {
        self.inner.borrow().topological_order()
    }

    /// Direct predecessors of `id`.
    pub fn predecessors(&self, id: TaskId) -> Vec<TaskId> {
        self.inner.borrow().predecessors(id)
    }

    /// Direct successors of `id`.
    pub fn successors(&self, id: TaskId) -> Vec<TaskId> {
        self.inner.borrow().successors(id)
    }

    /// Every edge directly from `u` to `v` (a multigraph may have more
    /// than one, with different attribute labels).
    pub fn get_edge(&self, u: TaskId, v: TaskId) -> Vec<Edge> {
        self.inner.borrow().get_edges(u, v)
    }

    /// Opens a named group. Reopening the same path extends the existing
    /// group; nested active groups are rejected.
    pub fn group(&self, names: &[&str]) -> Result<Group> {
        Group::open(self.inner.clone(), names.iter().map(|s| s.to_string()).collect())
    }

    /// Members of a group, in insertion order.
    pub fn group_members(&self, names: &[&str]) -> Vec<TaskId> {
        let key: Vec<String> = names.iter().map(|s| s.to_string()).collect();
        self.inner.borrow().groups.get(&key).cloned().unwrap_or_default()
    }

    /// Relabels a task's identity, rewriting every edge and group
    /// membership entry that referenced it.
    pub fn rename_task(&self, old: TaskId, new: TaskId) -> Result<()> {
        self.inner.borrow_mut().rename_task(old, new)
    }

    /// Associates a deployment with this graph so [`crate::resolve::resolve`]
    /// can find it without the caller threading it through explicitly
    /// (spec.md §4.6).
    pub fn bind_deployment(&self, deployment: Rc<RefCell<dyn crate::deployment::Deployment>>) {
        self.inner.borrow_mut().deployment = Some(deployment);
    }

    /// The deployment currently bound to this graph, if any.
    pub fn deployment(&self) -> Option<Rc<RefCell<dyn crate::deployment::Deployment>>> {
        self.inner.borrow().deployment.clone()
    }

    /// Whether `immutable` mode is set (completed tasks are never rerun).
    pub fn is_immutable(&self) -> bool {
        self.inner.borrow().immutable
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// An open, active group (spec.md §4.4). Dropping it closes the group;
/// nesting is rejected by [`Graph::group`].
#[must_use = "dropping a Group immediately closes it"]
pub struct Group {
    graph: Rc<RefCell<GraphInner>>,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl Group {
    fn open(graph: Rc<RefCell<GraphInner>>, names: Vec<String>) -> Result<Self> {
        if names.is_empty() {
            return Err(GraphFlowError::Group("a group needs at least one name".into()));
        }
        {
            let mut inner = graph.borrow_mut();
            if inner.active_group.is_some() {
                return Err(GraphFlowError::Group(
                    "nested active groups are not supported".into(),
                ));
            }
            inner.active_group = Some(names.clone());
            inner.groups.entry(names).or_default();
        }
        Ok(Self { graph, _not_send: std::marker::PhantomData })
    }
}

impl Drop for Group {
    fn drop(&mut self) {
        self.graph.borrow_mut().active_group = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    /// Builds a random DAG over `n` nodes: edges only ever point from a
    /// lower-numbered node to a higher-numbered one, so the construction
    /// itself can never introduce a cycle.
    fn acyclic_graph(n: usize, edge_bits: Vec<bool>) -> (GraphInner, Vec<TaskId>) {
        let mut inner = GraphInner::new();
        let ids: Vec<TaskId> = (0..n).map(|_| TaskId::new_v4()).collect();
        for id in &ids {
            inner.insertion_order.push(*id);
        }
        let mut bit = edge_bits.into_iter();
        for i in 0..n {
            for j in (i + 1)..n {
                if bit.next().unwrap_or(false) {
                    inner.edges.push(Edge {
                        source: ids[i],
                        target: ids[j],
                        source_attr: None,
                        target_attr: "x".into(),
                    });
                }
            }
        }
        (inner, ids)
    }

    proptest! {
        #[test]
        fn topological_order_is_deterministic_and_respects_edges(
            n in 1usize..8,
            edge_bits in proptest::collection::vec(any::<bool>(), 0..28),
        ) {
            let (inner, ids) = acyclic_graph(n, edge_bits);
            let order1 = inner.topological_order().unwrap();
            let order2 = inner.topological_order().unwrap();
            prop_assert_eq!(&order1, &order2);
            prop_assert_eq!(order1.len(), ids.len());

            let position: std::collections::HashMap<TaskId, usize> =
                order1.iter().enumerate().map(|(i, id)| (*id, i)).collect();
            for edge in &inner.edges {
                prop_assert!(position[&edge.source] < position[&edge.target]);
            }
        }
    }

    #[test]
    fn topological_order_is_deterministic_for_fixed_insertion() {
        let mut inner = GraphInner::new();
        let a = TaskId::new_v4();
        let b = TaskId::new_v4();
        let c = TaskId::new_v4();
        for id in [a, b, c] {
            inner.insertion_order.push(id);
        }
        inner.edges.push(Edge { source: a, target: b, source_attr: None, target_attr: "x".into() });
        inner.edges.push(Edge { source: a, target: c, source_attr: None, target_attr: "x".into() });
        let order1 = inner.topological_order().unwrap();
        let order2 = inner.topological_order().unwrap();
        assert_eq!(order1, order2);
        assert_eq!(order1[0], a);
    }

    #[test]
    fn cycle_is_rejected() {
        let mut inner = GraphInner::new();
        let a = TaskId::new_v4();
        let b = TaskId::new_v4();
        inner.insertion_order.push(a);
        inner.insertion_order.push(b);
        inner.edges.push(Edge { source: a, target: b, source_attr: None, target_attr: "x".into() });
        inner.edges.push(Edge { source: b, target: a, source_attr: None, target_attr: "y".into() });
        assert!(matches!(inner.topological_order(), Err(GraphFlowError::CycleDetected)));
    }

    #[test]
    fn nested_group_rejected() {
        let graph = Graph::new();
        let _outer = graph.group(&["g"]).unwrap();
        assert!(matches!(graph.group(&["h"]), Err(GraphFlowError::Group(_))));
    }

    #[test]
    fn reopening_group_extends_it() {
        let graph = Graph::new();
        let a = TaskId::new_v4();
        let b = TaskId::new_v4();
        {
            let g = graph.group(&["g"]).unwrap();
            graph.inner.borrow_mut().insert_task(a, TaskSlot::Class(Box::new(crate::task::tests::Noop::new(a))));
            drop(g);
        }
        {
            let g = graph.group(&["g"]).unwrap();
            graph.inner.borrow_mut().insert_task(b, TaskSlot::Class(Box::new(crate::task::tests::Noop::new(b))));
            drop(g);
        }
        assert_eq!(graph.group_members(&["g"]), vec![a, b]);
    }
}
