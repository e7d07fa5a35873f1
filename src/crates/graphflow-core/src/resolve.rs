//! Short-circuit resolution: running only what a reference actually needs
//! (spec.md §4.6), grounded in `znflow.dynamic.resolve`'s "find the ambient
//! graph, run its ancestors, then realize" behavior.

use crate::error::{GraphFlowError, Result};
use crate::graph::Graph;
use crate::reference::Reference;
use crate::scope;

/// Realizes `reference` to `T`, running only the ancestor tasks it
/// transitively depends on (via the deployment bound to `graph` with
/// [`Graph::bind_deployment`]), not the whole graph.
///
/// Fails with [`GraphFlowError::Value`] if no deployment has been bound to
/// `graph` yet.
pub fn resolve<T: serde::de::DeserializeOwned>(graph: &Graph, reference: &Reference) -> Result<T> {
    let deployment = graph
        .deployment()
        .ok_or_else(|| GraphFlowError::Value("graph has no deployment bound; call bind_deployment first".into()))?;

    let targets = reference.sources();
    {
        let mut deployment = deployment.borrow_mut();
        deployment.run_until(graph, &targets)?;
    }

    let _guard = scope::disable_scope();
    let deployment = deployment.borrow();
    reference.resolve(deployment.store())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::deployment::{DeploymentConfig, SequentialDeployment};
    use crate::reference::Connection;
    use crate::task::tests::Noop;
    use crate::task::{register, ClassTask};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn resolve_without_bound_deployment_errors() {
        let graph = Graph::new();
        let _scope = graph.scope().unwrap();
        let task = register(Noop::new(Default::default()));
        let reference: Reference = Connection::to_task(task.task_id()).into();
        let err = resolve::<serde_json::Value>(&graph, &reference).unwrap_err();
        assert!(matches!(err, GraphFlowError::Value(_)));
    }

    #[test]
    fn resolve_runs_only_declared_ancestors() {
        let graph = Graph::new();
        let task = {
            let _scope = graph.scope().unwrap();
            register(Noop::new(Default::default()))
        };
        graph.bind_deployment(Rc::new(RefCell::new(SequentialDeployment::new(DeploymentConfig::default()))));
        let reference: Reference = Connection::to_task(task.task_id()).into();
        let value: serde_json::Value = resolve(&graph, &reference).unwrap();
        assert!(value.is_object());
    }
}
