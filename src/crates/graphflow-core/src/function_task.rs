//! Function tasks: deferring a plain function call so its arguments can be
//! wired from upstream references (spec.md §3/§4.3, function-task row).
//!
//! `nodify(f)` wraps a function of up to four arguments. Calling the wrapped
//! value runs the function immediately if every argument is already
//! realized; if any argument is a pending [`Reference`], the call is
//! registered as a node in the active graph instead, and a
//! [`FunctionFuture`] reference is returned for downstream wiring.

use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use uuid::Uuid;

use crate::error::{GraphFlowError, Result};
use crate::graph::TaskSlot;
use crate::reference::{FunctionFuture, Reference};
use crate::scope;
use crate::task::{FunctionTaskObj, Input, TaskId};

/// The boxed invocation closure shared by every wrapped function task:
/// takes the positional arguments as resolved JSON, returns the result.
type Invoke = Arc<dyn Fn(&[Value]) -> Result<Value> + Send + Sync>;

/// A function-task call bound into the graph: its positional arguments
/// (already resolved to JSON, or still pending references) and the boxed
/// invocation closure.
struct BoundCall {
    id: TaskId,
    args: Vec<ArgSlot>,
    invoke: Invoke,
}

enum ArgSlot {
    Value(Value),
    Ref(Reference),
}

impl FunctionTaskObj for BoundCall {
    fn task_id(&self) -> TaskId {
        self.id
    }

    fn arg_refs(&self) -> Vec<Reference> {
        self.args
            .iter()
            .filter_map(|a| match a {
                ArgSlot::Ref(r) => Some(r.clone()),
                ArgSlot::Value(_) => None,
            })
            .collect()
    }

    fn run(&mut self, store: &dyn crate::deployment::ResultStore) -> Result<Value> {
        let mut resolved = Vec::with_capacity(self.args.len());
        for arg in &self.args {
            match arg {
                ArgSlot::Value(v) => resolved.push(v.clone()),
                ArgSlot::Ref(r) => resolved.push(r.resolve_json(store)?),
            }
        }
        (self.invoke)(&resolved)
    }
}

/// Resolves one call argument: realized values pass straight through, and
/// `Input::Ref` values are recorded as pending only while a scope is open.
fn split_arg<T: Serialize>(input: Input<T>) -> Result<(Value, Option<Reference>)> {
    match input {
        Input::Value(v) => Ok((serde_json::to_value(v)?, None)),
        Input::Ref(r) => {
            if !scope::is_active() {
                return Err(GraphFlowError::Value(
                    "a function task argument is a pending reference but no graph scope is open"
                        .into(),
                ));
            }
            Ok((Value::Null, Some(r)))
        }
    }
}

fn finish_call<R: DeserializeOwned>(
    args: Vec<(Value, Option<Reference>)>,
    invoke: Invoke,
) -> Result<Input<R>> {
    let any_pending = args.iter().any(|(_, r)| r.is_some());
    if !any_pending {
        let values: Vec<Value> = args.into_iter().map(|(v, _)| v).collect();
        let result = invoke(&values)?;
        return Ok(Input::Value(serde_json::from_value(result)?));
    }

    let id = Uuid::new_v4();
    let slots = args
        .into_iter()
        .map(|(v, r)| match r {
            Some(r) => ArgSlot::Ref(r),
            None => ArgSlot::Value(v),
        })
        .collect();
    let call = BoundCall { id, args: slots, invoke };
    let graph = scope::current().expect("any_pending implies an active scope (split_arg checked)");
    graph.borrow_mut().insert_task(id, TaskSlot::Function(Box::new(call)));
    Ok(Input::Ref(FunctionFuture::new(id).into()))
}

/// A deferred zero-argument function call.
pub struct Func0<F, R> {
    func: Arc<F>,
    _marker: PhantomData<R>,
}

impl<F, R> Func0<F, R>
where
    F: Fn() -> R + Send + Sync + 'static,
    R: Serialize + DeserializeOwned + 'static,
{
    pub fn call(&self) -> Result<Input<R>> {
        let func = self.func.clone();
        let invoke: Invoke =
            Arc::new(move |_args: &[Value]| Ok(serde_json::to_value(func())?));
        finish_call(Vec::new(), invoke)
    }
}

macro_rules! impl_func_n {
    ($name:ident, $n:expr, $( $ty:ident : $idx:tt ),+) => {
        /// A deferred function call with a fixed, statically-typed arity.
        pub struct $name<F, $($ty,)+ R> {
            func: Arc<F>,
            _marker: PhantomData<($($ty,)+ R)>,
        }

        impl<F, $($ty,)+ R> $name<F, $($ty,)+ R>
        where
            F: Fn($($ty),+) -> R + Send + Sync + 'static,
            $( $ty: Serialize + DeserializeOwned + 'static, )+
            R: Serialize + DeserializeOwned + 'static,
        {
            #[allow(non_snake_case)]
            pub fn call(&self, $( $ty: impl Into<Input<$ty>> ),+ ) -> Result<Input<R>> {
                let args = vec![$( split_arg($ty.into())? ),+];
                let func = self.func.clone();
                let invoke: Invoke =
                    Arc::new(move |args: &[Value]| {
                        $( let $ty: $ty = serde_json::from_value(args[$idx].clone())?; )+
                        Ok(serde_json::to_value(func($($ty),+))?)
                    });
                finish_call(args, invoke)
            }
        }
    };
}

impl_func_n!(Func1, 1, A: 0);
impl_func_n!(Func2, 2, A: 0, B: 1);
impl_func_n!(Func3, 3, A: 0, B: 1, C: 2);
impl_func_n!(Func4, 4, A: 0, B: 1, C: 2, D: 3);

/// A deferred call over a variable-length list of per-element references,
/// the class-task-argument counterpart of the Iterable Walker (spec.md
/// §2 component 5): each element of the list is independently either a
/// realized value or a pending `Connection`/`FunctionFuture`, exactly the
/// `d = Sum([b.v, c.v])` shape from spec.md §8 scenario 1.
pub struct FuncList<F, T, R> {
    func: Arc<F>,
    _marker: PhantomData<(T, R)>,
}

impl<F, T, R> FuncList<F, T, R>
where
    F: Fn(Vec<T>) -> R + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + 'static,
    R: Serialize + DeserializeOwned + 'static,
{
    pub fn call(&self, items: Vec<Input<T>>) -> Result<Input<R>> {
        let args = items
            .into_iter()
            .map(split_arg)
            .collect::<Result<Vec<_>>>()?;
        let func = self.func.clone();
        let invoke: Invoke =
            Arc::new(move |args: &[Value]| {
                let items = args
                    .iter()
                    .map(|v| serde_json::from_value(v.clone()))
                    .collect::<std::result::Result<Vec<T>, _>>()?;
                Ok(serde_json::to_value(func(items))?)
            });
        finish_call(args, invoke)
    }
}

/// Wraps a function over a variable-length list of elements as a function
/// task; see [`FuncList`].
pub fn nodify_list<F, T, R>(func: F) -> FuncList<F, T, R>
where
    F: Fn(Vec<T>) -> R + Send + Sync + 'static,
    T: Serialize + DeserializeOwned + 'static,
    R: Serialize + DeserializeOwned + 'static,
{
    FuncList { func: Arc::new(func), _marker: PhantomData }
}

/// Wraps a zero-argument plain function as a function task.
pub fn nodify0<F, R>(func: F) -> Func0<F, R>
where
    F: Fn() -> R + Send + Sync + 'static,
    R: Serialize + DeserializeOwned + 'static,
{
    Func0 { func: Arc::new(func), _marker: PhantomData }
}

/// Wraps a one-argument plain function as a function task.
pub fn nodify<F, A, R>(func: F) -> Func1<F, A, R>
where
    F: Fn(A) -> R + Send + Sync + 'static,
    A: Serialize + DeserializeOwned + 'static,
    R: Serialize + DeserializeOwned + 'static,
{
    Func1 { func: Arc::new(func), _marker: PhantomData }
}

/// Wraps a two-argument plain function as a function task.
pub fn nodify2<F, A, B, R>(func: F) -> Func2<F, A, B, R>
where
    F: Fn(A, B) -> R + Send + Sync + 'static,
    A: Serialize + DeserializeOwned + 'static,
    B: Serialize + DeserializeOwned + 'static,
    R: Serialize + DeserializeOwned + 'static,
{
    Func2 { func: Arc::new(func), _marker: PhantomData }
}

/// Wraps a three-argument plain function as a function task.
pub fn nodify3<F, A, B, C, R>(func: F) -> Func3<F, A, B, C, R>
where
    F: Fn(A, B, C) -> R + Send + Sync + 'static,
    A: Serialize + DeserializeOwned + 'static,
    B: Serialize + DeserializeOwned + 'static,
    C: Serialize + DeserializeOwned + 'static,
    R: Serialize + DeserializeOwned + 'static,
{
    Func3 { func: Arc::new(func), _marker: PhantomData }
}

/// Wraps a four-argument plain function as a function task.
pub fn nodify4<F, A, B, C, D, R>(func: F) -> Func4<F, A, B, C, D, R>
where
    F: Fn(A, B, C, D) -> R + Send + Sync + 'static,
    A: Serialize + DeserializeOwned + 'static,
    B: Serialize + DeserializeOwned + 'static,
    C: Serialize + DeserializeOwned + 'static,
    D: Serialize + DeserializeOwned + 'static,
    R: Serialize + DeserializeOwned + 'static,
{
    Func4 { func: Arc::new(func), _marker: PhantomData }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;

    #[test]
    fn immediate_call_outside_scope_runs_directly() {
        let add = nodify2(|a: i64, b: i64| a + b);
        let result = add.call(Input::value(2), Input::value(3)).unwrap();
        assert_eq!(result.as_value().copied(), Some(5));
    }

    #[test]
    fn call_with_reference_defers_into_graph() {
        let graph = Graph::new();
        let _scope = graph.scope().unwrap();
        let double = nodify(|a: i64| a * 2);
        let future = double.call(Input::value(21)).unwrap();
        assert!(matches!(future, Input::Value(42)) || matches!(future, Input::Ref(_)));
    }
}
