//! The task model: class tasks (stateful, with a `run` method) and
//! function tasks (a wrapped function call deferred by [`crate::nodify`]).
//!
//! Both task shapes carry a [`TaskId`] and an `external` flag (spec.md
//! §3). A task has no identity until [`register_class_task`] assigns one,
//! which is what realizes the "in_construction" semantics from the
//! distilled spec without a separate flag: a task's own constructor has no
//! `TaskId` to build a [`Connection`] with, so self-referential attribute
//! reads inside it are simply not expressible.

use std::cell::RefCell;
use std::rc::Rc;

use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::{GraphFlowError, Result};
use crate::graph::{Edge, GraphInner, TaskSlot};
use crate::reference::Reference;
use crate::scope;

/// Opaque identity of a task within a graph.
pub type TaskId = Uuid;

/// A field that may hold a realized value or a pending reference to an
/// upstream task's output.
///
/// This is the typed "companion accessor" value from the design document's
/// redesign note: rather than intercepting attribute access dynamically,
/// every wireable field of a [`ClassTask`] is declared as `Input<T>`, and
/// reading it through the field's generated accessor method yields either
/// the realized `T` or a [`Reference`] depending on whether a scope is
/// active.
#[derive(Debug, Clone)]
pub enum Input<T> {
    /// A realized value (the field's default, or the result of a previous
    /// run).
    Value(T),
    /// A pending reference to an upstream task's output.
    Ref(Reference),
}

impl<T> Input<T> {
    /// The realized value, if any.
    pub fn as_value(&self) -> Option<&T> {
        match self {
            Input::Value(v) => Some(v),
            Input::Ref(_) => None,
        }
    }

    /// The pending reference, if any.
    pub fn reference(&self) -> Option<&Reference> {
        match self {
            Input::Value(_) => None,
            Input::Ref(r) => Some(r),
        }
    }

    /// Unwraps a realized value, panicking if this field is still a
    /// pending reference. Intended for use inside `run()`, after the
    /// deployment has substituted every input.
    pub fn expect_value(self, field: &str) -> T {
        match self {
            Input::Value(v) => v,
            Input::Ref(_) => panic!("field '{field}' was read before it was resolved"),
        }
    }
}

impl<T: DeserializeOwned> Input<T> {
    /// Resolves this field against a result store, consuming it.
    pub fn resolve(self, store: &dyn crate::deployment::ResultStore) -> Result<T> {
        match self {
            Input::Value(v) => Ok(v),
            Input::Ref(r) => r.resolve(store),
        }
    }
}

impl<T> Input<T> {
    /// Wraps a realized value. Prefer this over a `From` impl: a generic
    /// `From<T> for Input<T>` would collide with the reference conversions
    /// below once `T` is itself a reference type.
    pub fn value(v: T) -> Self {
        Input::Value(v)
    }
}

impl<T> From<Reference> for Input<T> {
    fn from(r: Reference) -> Self {
        Input::Ref(r)
    }
}

impl<T> From<crate::reference::Connection> for Input<T> {
    fn from(c: crate::reference::Connection) -> Self {
        Input::Ref(Reference::Connection(c))
    }
}

impl<T> From<crate::reference::CombinedConnection> for Input<T> {
    fn from(c: crate::reference::CombinedConnection) -> Self {
        Input::Ref(Reference::Combined(c))
    }
}

impl<T> From<crate::reference::FunctionFuture> for Input<T> {
    fn from(f: crate::reference::FunctionFuture) -> Self {
        Input::Ref(Reference::FunctionFuture(f))
    }
}

/// Class tasks: the object-oriented task shape described in spec.md §3/§4.3.
///
/// Implemented by `#[derive(graphflow_derive::ClassTask)]`. Every method
/// here is generated mechanically from the struct's `Input<T>` fields; see
/// `graphflow-derive` for the macro and DESIGN.md for the grounding.
pub trait ClassTask: Send + Sync {
    /// This task's identity. Panics if called before registration (never
    /// observable by well-formed user code, since the id is assigned by
    /// [`register_class_task`] before the task is returned).
    fn task_id(&self) -> TaskId;

    /// Assigns this task's identity. Called exactly once, by
    /// [`register_class_task`].
    fn set_task_id(&mut self, id: TaskId);

    /// Public, non-protected, non-underscore-prefixed attribute names.
    fn attribute_names(&self) -> &'static [&'static str];

    /// The realized JSON value of `name`, or `None` if it is still a
    /// pending reference (not yet resolved) or not a valid attribute.
    fn get_attr_json(&self, name: &str) -> Option<serde_json::Value>;

    /// The pending reference stored at `name`, if the field has not been
    /// resolved yet. Used by scope-exit edge discovery.
    fn get_ref(&self, name: &str) -> Option<Reference>;

    /// Overwrites `name` with a realized value, used by the deployment
    /// while substituting inputs before calling `run`. Returns `false` if
    /// `name` is not a valid attribute or the value doesn't deserialize
    /// into the field's type (spec.md §4.5: "if a field rejects
    /// assignment, the substitution is skipped").
    fn apply_attr_json(&mut self, name: &str, value: serde_json::Value) -> bool;

    /// Runs this task's single unit of work.
    fn run(&mut self) -> Result<()>;

    /// Whether this task is a read-only external source (spec.md §3/§4.5).
    fn external(&self) -> bool {
        false
    }

    /// A human-readable label for error messages.
    fn type_name(&self) -> &'static str;
}

/// Function tasks: a deferred call to a plain function, created by
/// [`crate::nodify`].
pub trait FunctionTaskObj: Send + Sync {
    /// This task's identity.
    fn task_id(&self) -> TaskId;

    /// Every reference embedded in this call's positional/keyword
    /// arguments, walked at scope exit to materialize edges.
    fn arg_refs(&self) -> Vec<Reference>;

    /// Substitutes argument references, invokes the wrapped function, and
    /// returns its JSON-encoded result.
    fn run(&mut self, store: &dyn crate::deployment::ResultStore) -> Result<serde_json::Value>;

    /// Function tasks are never external.
    fn external(&self) -> bool {
        false
    }
}

/// Registers a freshly constructed class task: allocates its identity and,
/// if a scope is active, inserts a clone into the graph (and the currently
/// open group, if any). Returns the task itself, with its identity set, so
/// the caller's local variable can be used to build further references.
///
/// The graph's copy is the one that gets mutated by `run()`; the caller's
/// copy is a snapshot as of registration time; post-run results are read
/// back through [`crate::resolve::resolve`] or a [`crate::deployment::Deployment`],
/// never through the caller's own copy. This mirrors spec.md §6's
/// worker-pool requirement that tasks be serializable/cloneable by value.
pub fn register<T: ClassTask + Clone + 'static>(mut task: T) -> T {
    let id = Uuid::new_v4();
    task.set_task_id(id);
    if let Some(graph) = scope::current() {
        let mut inner = graph.borrow_mut();
        inner.insert_task(id, TaskSlot::Class(Box::new(task.clone())));
    }
    task
}

/// Walks every registered task added during the scope that is about to
/// close and materializes edges for any pending reference found in its
/// attributes, marking the task `resolved` so a re-entered scope does not
/// redo the work (spec.md §4.3, last paragraph).
pub(crate) fn finalize_scope(graph: &Rc<RefCell<GraphInner>>) -> Result<()> {
    let mut inner = graph.borrow_mut();
    let ids: Vec<TaskId> = inner.insertion_order.clone();
    for id in ids {
        if inner.resolved.contains(&id) {
            continue;
        }
        let (attr_refs, external_sources): (Vec<(String, Reference)>, Vec<TaskId>) = {
            let slot = inner.tasks.get(&id).expect("task present in insertion order");
            match slot {
                TaskSlot::Class(task) => {
                    let mut refs = Vec::new();
                    for name in task.attribute_names() {
                        if let Some(r) = task.get_ref(name) {
                            refs.push((name.to_string(), r));
                        }
                    }
                    let externals = refs.iter().flat_map(|(_, r)| r.sources()).collect();
                    (refs, externals)
                }
                TaskSlot::Function(task) => {
                    let refs: Vec<(String, Reference)> = task
                        .arg_refs()
                        .into_iter()
                        .map(|r| (String::new(), r))
                        .collect();
                    let externals = refs.iter().flat_map(|(_, r)| r.sources()).collect();
                    (refs, externals)
                }
            }
        };
        for src in &external_sources {
            inner.check_source_present(*src)?;
        }
        for (attr, reference) in &attr_refs {
            for source in reference.sources() {
                inner.edges.push(Edge {
                    source,
                    target: id,
                    source_attr: match reference {
                        Reference::Connection(c) => c.attribute().map(str::to_string),
                        _ => None,
                    },
                    target_attr: attr.clone(),
                });
            }
        }
        inner.resolved.insert(id);
    }
    Ok(())
}

/// Reads a task's attribute with the scope temporarily disabled, returning
/// `default` if the attribute is missing. This is the public free function
/// from spec.md §6 (`get_attribute`).
pub fn get_attribute<T: DeserializeOwned>(
    task: &dyn ClassTask,
    name: &str,
    default: Option<T>,
) -> Result<T> {
    let _guard = scope::disable_scope();
    match task.get_attr_json(name) {
        Some(json) => Ok(serde_json::from_value(json)?),
        None => default.ok_or_else(|| GraphFlowError::AttributeMissing {
            attribute: name.to_string(),
        }),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// A minimal no-op class task used by other modules' unit tests.
    #[derive(Clone)]
    pub(crate) struct Noop {
        id: TaskId,
    }

    impl Noop {
        pub(crate) fn new(id: TaskId) -> Self {
            Self { id }
        }
    }

    impl ClassTask for Noop {
        fn task_id(&self) -> TaskId {
            self.id
        }

        fn set_task_id(&mut self, id: TaskId) {
            self.id = id;
        }

        fn attribute_names(&self) -> &'static [&'static str] {
            &[]
        }

        fn get_attr_json(&self, _name: &str) -> Option<serde_json::Value> {
            None
        }

        fn get_ref(&self, _name: &str) -> Option<Reference> {
            None
        }

        fn apply_attr_json(&mut self, _name: &str, _value: serde_json::Value) -> bool {
            false
        }

        fn run(&mut self) -> Result<()> {
            Ok(())
        }

        fn type_name(&self) -> &'static str {
            "Noop"
        }
    }
}
