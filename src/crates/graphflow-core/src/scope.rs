//! The build-time scope: a context-local pointer to the graph currently
//! being constructed.
//!
//! Task constructors consult [`current`] to decide whether an attribute
//! read should produce a [`Connection`](crate::reference::Connection) or a
//! realized value. The pointer is thread-local rather than process-wide
//! (see the design document's redesign note) so independent execution
//! contexts can each build their own graph concurrently.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::{GraphFlowError, Result};
use crate::graph::GraphInner;

thread_local! {
    static ACTIVE: RefCell<Option<Rc<RefCell<GraphInner>>>> = const { RefCell::new(None) };
}

/// Returns the graph currently being built on this thread, if any.
pub fn current() -> Option<Rc<RefCell<GraphInner>>> {
    ACTIVE.with(|cell| cell.borrow().clone())
}

/// Returns `true` if a scope is active on this thread.
pub fn is_active() -> bool {
    ACTIVE.with(|cell| cell.borrow().is_some())
}

/// An RAII guard produced by [`crate::scope`]. Dropping it restores the
/// scope that was active before it was created (normally `None`).
///
/// `ScopeHandle` is deliberately `!Send`: it pins the thread-local slot it
/// swapped, so a build scope cannot be transferred across execution
/// contexts, matching the "reject cross-context transfer" requirement.
#[must_use = "dropping a ScopeHandle immediately closes the scope"]
pub struct ScopeHandle {
    previous: Option<Rc<RefCell<GraphInner>>>,
    installed: Rc<RefCell<GraphInner>>,
    _not_send: std::marker::PhantomData<*const ()>,
}

impl ScopeHandle {
    /// Opens a scope around `graph`. Fails with
    /// [`GraphFlowError::ScopeNesting`] if a scope is already active on
    /// this thread.
    pub fn open(graph: Rc<RefCell<GraphInner>>) -> Result<Self> {
        if is_active() {
            return Err(GraphFlowError::ScopeNesting);
        }
        let previous = ACTIVE.with(|cell| cell.borrow_mut().replace(graph.clone()));
        Ok(Self {
            previous,
            installed: graph,
            _not_send: std::marker::PhantomData,
        })
    }

    /// Explicitly closes the scope, running the same finalization that
    /// `Drop` would perform, and surfaces any error from it (edge
    /// materialization can fail, e.g. on a missing attribute).
    pub fn close(self) -> Result<()> {
        let installed = self.installed.clone();
        drop(self);
        crate::task::finalize_scope(&installed)
    }
}

impl Drop for ScopeHandle {
    fn drop(&mut self) {
        ACTIVE.with(|cell| {
            let mut slot = cell.borrow_mut();
            debug_assert!(
                slot.as_ref().map(|g| Rc::ptr_eq(g, &self.installed)).unwrap_or(false)
                    || slot.is_none(),
                "scope pointer was mutated while a scope was active"
            );
            *slot = self.previous.take();
        });
        if let Err(err) = crate::task::finalize_scope(&self.installed) {
            tracing::error!(%err, "edge materialization failed while closing a graph scope");
        }
    }
}

/// An RAII guard produced by [`disable_scope`]. While held, [`current`]
/// returns `None` even if an outer scope is active; dropping it restores
/// the previous state.
#[must_use = "dropping a DisableScopeGuard immediately re-enables the scope"]
pub struct DisableScopeGuard {
    previous: Option<Rc<RefCell<GraphInner>>>,
}

impl Drop for DisableScopeGuard {
    fn drop(&mut self) {
        ACTIVE.with(|cell| {
            *cell.borrow_mut() = self.previous.take();
        });
    }
}

/// Temporarily disables the active scope so attribute reads inside the
/// guarded region see real stored values instead of `Connection`s.
///
/// Used internally by [`crate::resolve::resolve`] and by the deployment
/// while substituting results, and available to users directly via
/// [`crate::get_attribute`].
pub fn disable_scope() -> DisableScopeGuard {
    let previous = ACTIVE.with(|cell| cell.borrow_mut().take());
    DisableScopeGuard { previous }
}
