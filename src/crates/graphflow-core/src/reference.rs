//! Reference values: the placeholders produced by attribute reads and
//! function-task calls while a scope is active.
//!
//! [`Connection`], [`CombinedConnection`] and [`FunctionFuture`] form a
//! closed sum type, [`Reference`], matching the "tagged variants" design
//! note: every unresolved value in this crate is one of these three shapes,
//! and every shape knows how to realize itself against a
//! [`ResultStore`](crate::deployment::ResultStore).

use std::cmp::Ordering;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{GraphFlowError, Result};
use crate::graph::Graph;
use crate::task::TaskId;

/// An index or slice selector recorded by `value[sel]` on a reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexSel {
    /// Select a single element.
    Index(usize),
    /// Select a contiguous, end-exclusive range.
    Slice(usize, usize),
}

impl IndexSel {
    fn apply(&self, value: Value) -> Result<Value> {
        let Value::Array(mut items) = value else {
            return Err(GraphFlowError::Value(
                "indexed a reference whose realized value is not a list".into(),
            ));
        };
        match self {
            IndexSel::Index(i) => {
                if *i >= items.len() {
                    return Err(GraphFlowError::Value(format!(
                        "index {i} out of bounds for list of length {}",
                        items.len()
                    )));
                }
                Ok(items.swap_remove(*i))
            }
            IndexSel::Slice(start, end) => {
                let end = (*end).min(items.len());
                let start = (*start).min(end);
                Ok(Value::Array(items.drain(start..end).collect()))
            }
        }
    }
}

/// A reference to a single attribute of a single task.
///
/// `attribute` is `None` for a whole-object reference (the task itself was
/// passed where a value was expected); otherwise it names a public,
/// non-protected field.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Connection {
    pub(crate) source: TaskId,
    pub(crate) attribute: Option<String>,
    index: Option<IndexKey>,
}

/// Hashable mirror of [`IndexSel`] (the public enum doesn't derive `Hash`
/// because it doesn't need to outside this module).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum IndexKey {
    Index(usize),
    Slice(usize, usize),
}

impl From<&IndexKey> for IndexSel {
    fn from(k: &IndexKey) -> Self {
        match k {
            IndexKey::Index(i) => IndexSel::Index(*i),
            IndexKey::Slice(a, b) => IndexSel::Slice(*a, *b),
        }
    }
}

impl Connection {
    /// Creates a connection to the whole task (no attribute).
    pub fn to_task(source: TaskId) -> Self {
        Self { source, attribute: None, index: None }
    }

    /// Creates a connection to one attribute of `source`.
    pub fn to_attribute(source: TaskId, attribute: impl Into<String>) -> Self {
        Self { source, attribute: Some(attribute.into()), index: None }
    }

    /// The task this connection points at.
    pub fn source(&self) -> TaskId {
        self.source
    }

    /// The attribute name, if this is not a whole-object reference.
    pub fn attribute(&self) -> Option<&str> {
        self.attribute.as_deref()
    }

    /// Records an index selector, rejecting re-indexing (the distilled
    /// spec only forbids re-slicing a `CombinedConnection`, but a plain
    /// `Connection` may be indexed at most once too since it has a single
    /// index slot).
    pub fn index(mut self, i: usize) -> Result<Self> {
        if self.index.is_some() {
            return Err(GraphFlowError::Value(
                "connection is already indexed".into(),
            ));
        }
        self.index = Some(IndexKey::Index(i));
        Ok(self)
    }

    /// Records a slice selector.
    pub fn slice(mut self, start: usize, end: usize) -> Result<Self> {
        if self.index.is_some() {
            return Err(GraphFlowError::Value(
                "connection is already indexed".into(),
            ));
        }
        self.index = Some(IndexKey::Slice(start, end));
        Ok(self)
    }

    /// Comparison short-circuit (spec.md §4.2, last bullet): realizes this
    /// connection against `graph`'s bound deployment, running only its
    /// transitive predecessors (see [`crate::resolve::resolve`]), then
    /// compares the realized value to `other`.
    pub fn resolve_cmp<T>(&self, graph: &Graph, other: &T) -> Result<Option<Ordering>>
    where
        T: PartialOrd + DeserializeOwned,
    {
        let value: T = crate::resolve::resolve(graph, &Reference::Connection(self.clone()))?;
        Ok(value.partial_cmp(other))
    }
}

/// A reference to the ordered concatenation of several list-typed
/// references, produced by the `+` operator.
#[derive(Debug, Clone)]
pub struct CombinedConnection {
    pub(crate) elements: Vec<Reference>,
    index: Option<IndexSel>,
    sliced: bool,
}

impl CombinedConnection {
    /// Builds a combined connection from already-ordered elements.
    pub fn new(elements: Vec<Reference>) -> Self {
        Self { elements, index: None, sliced: false }
    }

    /// Concatenates `self` with `other`, in order. Fails if either side is
    /// already sliced (spec: "cannot re-wrap if already sliced").
    pub fn concat(mut self, other: CombinedConnection) -> Result<Self> {
        if self.sliced || other.sliced {
            return Err(GraphFlowError::Combination(
                "cannot combine an already-sliced reference".into(),
            ));
        }
        self.elements.extend(other.elements);
        Ok(self)
    }

    /// Records an index, rejecting re-slicing of an already-sliced
    /// reference.
    pub fn index(mut self, i: usize) -> Result<Self> {
        if self.sliced {
            return Err(GraphFlowError::Value(
                "cannot index an already-sliced combined connection".into(),
            ));
        }
        self.index = Some(IndexSel::Index(i));
        self.sliced = true;
        Ok(self)
    }

    /// Records a slice, rejecting re-slicing of an already-sliced
    /// reference.
    pub fn slice(mut self, start: usize, end: usize) -> Result<Self> {
        if self.sliced {
            return Err(GraphFlowError::Value(
                "cannot re-slice an already-sliced combined connection".into(),
            ));
        }
        self.index = Some(IndexSel::Slice(start, end));
        self.sliced = true;
        Ok(self)
    }

    /// The elements, in concatenation order.
    pub fn elements(&self) -> &[Reference] {
        &self.elements
    }
}

/// A reference to the result of a deferred function-task call.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct FunctionFuture {
    pub(crate) source: TaskId,
    index: Option<IndexKey>,
}

impl FunctionFuture {
    /// Creates a reference to the (not-yet-computed) result of `source`.
    pub fn new(source: TaskId) -> Self {
        Self { source, index: None }
    }

    /// The function task this future points at.
    pub fn source(&self) -> TaskId {
        self.source
    }

    /// Records an index selector.
    pub fn index(mut self, i: usize) -> Result<Self> {
        if self.index.is_some() {
            return Err(GraphFlowError::Value(
                "function future is already indexed".into(),
            ));
        }
        self.index = Some(IndexKey::Index(i));
        Ok(self)
    }

    /// Comparison short-circuit, the `FunctionFuture` counterpart of
    /// [`Connection::resolve_cmp`].
    pub fn resolve_cmp<T>(&self, graph: &Graph, other: &T) -> Result<Option<Ordering>>
    where
        T: PartialOrd + DeserializeOwned,
    {
        let value: T = crate::resolve::resolve(graph, &Reference::FunctionFuture(self.clone()))?;
        Ok(value.partial_cmp(other))
    }
}

/// The closed sum type of "unresolved value": every reference produced
/// while a scope is active is one of these three shapes.
#[derive(Debug, Clone)]
pub enum Reference {
    Connection(Connection),
    Combined(CombinedConnection),
    FunctionFuture(FunctionFuture),
}

impl Reference {
    /// Realizes this reference to a JSON value by looking up its source(s)
    /// in `store`. This is the single `realize` operation the design
    /// document's tagged-union design note calls for.
    pub fn resolve_json(&self, store: &dyn crate::deployment::ResultStore) -> Result<Value> {
        match self {
            Reference::Connection(c) => {
                let raw = store
                    .get_class_attr(c.source, c.attribute.as_deref().unwrap_or(""))
                    .ok_or_else(|| GraphFlowError::AttributeMissing {
                        attribute: c.attribute.clone().unwrap_or_default(),
                    })?;
                match &c.index {
                    Some(k) => IndexSel::from(k).apply(raw),
                    None => Ok(raw),
                }
            }
            Reference::FunctionFuture(f) => {
                let raw = store.get_function_result(f.source).ok_or_else(|| {
                    GraphFlowError::Value(format!("function task {:?} has no result", f.source))
                })?;
                match &f.index {
                    Some(k) => IndexSel::from(k).apply(raw),
                    None => Ok(raw),
                }
            }
            Reference::Combined(cc) => {
                let mut flat = Vec::new();
                for el in &cc.elements {
                    let v = el.resolve_json(store)?;
                    match v {
                        Value::Array(items) => flat.extend(items),
                        other => {
                            return Err(GraphFlowError::Combination(format!(
                                "combined element did not resolve to a list: {other}"
                            )))
                        }
                    }
                }
                match &cc.index {
                    Some(sel) => sel.apply(Value::Array(flat)),
                    None => Ok(Value::Array(flat)),
                }
            }
        }
    }

    /// Realizes and deserializes this reference into `T`.
    pub fn resolve<T: DeserializeOwned>(&self, store: &dyn crate::deployment::ResultStore) -> Result<T> {
        let json = self.resolve_json(store)?;
        Ok(serde_json::from_value(json)?)
    }

    /// The task this reference (transitively) depends on for scheduling
    /// purposes. `CombinedConnection` has several; callers that need all
    /// of them should use [`Reference::sources`].
    pub fn primary_source(&self) -> TaskId {
        match self {
            Reference::Connection(c) => c.source,
            Reference::FunctionFuture(f) => f.source,
            Reference::Combined(cc) => cc
                .elements
                .first()
                .map(Reference::primary_source)
                .expect("a CombinedConnection always has at least one element"),
        }
    }

    /// Every task this reference (transitively) depends on.
    pub fn sources(&self) -> Vec<TaskId> {
        match self {
            Reference::Connection(c) => vec![c.source],
            Reference::FunctionFuture(f) => vec![f.source],
            Reference::Combined(cc) => cc.elements.iter().flat_map(Reference::sources).collect(),
        }
    }

    /// Escape hatch for dynamic callers (e.g. a generic container walker)
    /// that attempt to iterate a reference while a scope is still active
    /// (spec.md §4.2: "Iterating a `Connection` or `FunctionFuture` at build
    /// time is rejected"). `Reference` deliberately does not implement
    /// `IntoIterator`, so ordinary `for x in reference` is a compile error;
    /// this method exists only for code that holds a `Reference` through
    /// dynamic dispatch and needs a typed error instead of a missing trait.
    pub fn iter_unchecked(&self) -> Result<std::vec::IntoIter<Value>> {
        Err(GraphFlowError::Value(
            "cannot iterate a reference before its graph has run".into(),
        ))
    }
}

// `+` on reference types (spec.md §4.2: "The `+` operator on
// `Connection`/`FunctionFuture`/`CombinedConnection` produces a
// `CombinedConnection` that records the operands in order"). Adding a
// non-reference type is rejected at compile time by Rust's static typing,
// which subsumes the dynamic *TypeError* the distilled spec raises for it.
// Combining onto an already-sliced `CombinedConnection` still fails at run
// time, via the existing `concat` check, hence the `Result` output.

impl std::ops::Add<Connection> for Connection {
    type Output = Result<CombinedConnection>;
    fn add(self, rhs: Connection) -> Result<CombinedConnection> {
        CombinedConnection::new(vec![self.into()]).concat(CombinedConnection::new(vec![rhs.into()]))
    }
}

impl std::ops::Add<FunctionFuture> for Connection {
    type Output = Result<CombinedConnection>;
    fn add(self, rhs: FunctionFuture) -> Result<CombinedConnection> {
        CombinedConnection::new(vec![self.into()]).concat(CombinedConnection::new(vec![rhs.into()]))
    }
}

impl std::ops::Add<CombinedConnection> for Connection {
    type Output = Result<CombinedConnection>;
    fn add(self, rhs: CombinedConnection) -> Result<CombinedConnection> {
        CombinedConnection::new(vec![self.into()]).concat(rhs)
    }
}

impl std::ops::Add<Connection> for FunctionFuture {
    type Output = Result<CombinedConnection>;
    fn add(self, rhs: Connection) -> Result<CombinedConnection> {
        CombinedConnection::new(vec![self.into()]).concat(CombinedConnection::new(vec![rhs.into()]))
    }
}

impl std::ops::Add<FunctionFuture> for FunctionFuture {
    type Output = Result<CombinedConnection>;
    fn add(self, rhs: FunctionFuture) -> Result<CombinedConnection> {
        CombinedConnection::new(vec![self.into()]).concat(CombinedConnection::new(vec![rhs.into()]))
    }
}

impl std::ops::Add<CombinedConnection> for FunctionFuture {
    type Output = Result<CombinedConnection>;
    fn add(self, rhs: CombinedConnection) -> Result<CombinedConnection> {
        CombinedConnection::new(vec![self.into()]).concat(rhs)
    }
}

impl std::ops::Add<Connection> for CombinedConnection {
    type Output = Result<CombinedConnection>;
    fn add(self, rhs: Connection) -> Result<CombinedConnection> {
        self.concat(CombinedConnection::new(vec![rhs.into()]))
    }
}

impl std::ops::Add<FunctionFuture> for CombinedConnection {
    type Output = Result<CombinedConnection>;
    fn add(self, rhs: FunctionFuture) -> Result<CombinedConnection> {
        self.concat(CombinedConnection::new(vec![rhs.into()]))
    }
}

impl std::ops::Add<CombinedConnection> for CombinedConnection {
    type Output = Result<CombinedConnection>;
    fn add(self, rhs: CombinedConnection) -> Result<CombinedConnection> {
        self.concat(rhs)
    }
}

// The `[] + ref` seed rule (spec.md §4.2: "Summing such references with
// seed `[]` is supported"): folding a list of references with `Vec::new()`
// as the accumulator and `+` as the combinator (mirroring `combine`'s own
// `[]`-seeded fold, spec.md §4.4) builds up a `CombinedConnection` one
// element at a time.
impl std::ops::Add<Connection> for Vec<Reference> {
    type Output = Result<CombinedConnection>;
    fn add(mut self, rhs: Connection) -> Result<CombinedConnection> {
        self.push(rhs.into());
        Ok(CombinedConnection::new(self))
    }
}

impl std::ops::Add<FunctionFuture> for Vec<Reference> {
    type Output = Result<CombinedConnection>;
    fn add(mut self, rhs: FunctionFuture) -> Result<CombinedConnection> {
        self.push(rhs.into());
        Ok(CombinedConnection::new(self))
    }
}

impl std::ops::Add<CombinedConnection> for Vec<Reference> {
    type Output = Result<CombinedConnection>;
    fn add(self, rhs: CombinedConnection) -> Result<CombinedConnection> {
        CombinedConnection::new(self).concat(rhs)
    }
}

impl From<Connection> for Reference {
    fn from(c: Connection) -> Self {
        Reference::Connection(c)
    }
}

impl From<CombinedConnection> for Reference {
    fn from(c: CombinedConnection) -> Self {
        Reference::Combined(c)
    }
}

impl From<FunctionFuture> for Reference {
    fn from(f: FunctionFuture) -> Self {
        Reference::FunctionFuture(f)
    }
}
