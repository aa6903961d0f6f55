//! Ownership
//!
//! Every node is created under the owner that is current at the time: the
//! root passed to [`create_root`], an error boundary from [`catch_error`], or
//! the computation whose body is running. Disposing an owner disposes its
//! whole subtree, so effects created by an effect's previous run never
//! outlive that run.

use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{debug, warn};

use super::context::{CleanupTarget, Frame, ReactiveContext};
use super::runtime::{raise, Runtime};
use crate::error::ReactiveError;
use crate::graph::{Cleanup, Node, NodeId, NodeKind};

/// A handle to an ownership scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Owner {
    id: NodeId,
}

impl Owner {
    /// The owner new nodes would attach to right now.
    pub fn current() -> Option<Owner> {
        ReactiveContext::current_owner().map(|id| Owner { id })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Dispose this owner and everything it owns.
    ///
    /// # Panics
    ///
    /// Panics if a cleanup fails and no error boundary handles it.
    pub fn dispose(&self) {
        if let Err(err) = self.try_dispose() {
            raise(err);
        }
    }

    pub fn try_dispose(&self) -> Result<(), ReactiveError> {
        debug!(id = ?self.id, "disposing owner");
        Runtime::with(|rt| rt.run_updates(|rt| rt.dispose_node(self.id)))
    }

    pub fn is_disposed(&self) -> bool {
        Runtime::with(|rt| !rt.graph.borrow().contains(self.id))
    }

    /// Run `f` with this owner current and nothing tracking reads. Returns
    /// `None` without running `f` if the owner is already disposed.
    pub fn run_with<R>(&self, f: impl FnOnce() -> R) -> Option<R> {
        if self.is_disposed() {
            return None;
        }
        let _ctx = ReactiveContext::enter(Frame::owner(Some(self.id)).without_observer());
        Some(f())
    }
}

/// Create a detached ownership scope and run `f` inside it.
///
/// The root is not disposed with the scope that is current when it is
/// created; it lives until [`Owner::dispose`] is called. Errors raised below
/// the root still reach error boundaries above it.
pub fn create_root<R>(f: impl FnOnce(Owner) -> R) -> R {
    let id = Runtime::with(|rt| rt.create_node(NodeKind::Root));
    debug!(?id, "root created");
    let _ctx = ReactiveContext::enter(Frame::owner(Some(id)).without_observer());
    f(Owner { id })
}

/// Register `f` to run when the current owner re-runs or is disposed.
///
/// Cleanups run in reverse registration order. Outside any owner the
/// callback can never run; it is dropped, with a warning unless
/// [`RuntimeConfig::warn_on_unowned`](crate::RuntimeConfig) is off.
pub fn on_cleanup(f: impl FnOnce() + 'static) {
    let Some(owner) = ReactiveContext::current_owner() else {
        if crate::config::current_config().warn_on_unowned {
            warn!("on_cleanup called outside an owner; the cleanup will never run");
        }
        return;
    };
    let target = ReactiveContext::cleanup_target();
    let cleanup: Cleanup = Box::new(f);

    // A rejected cleanup is dropped only after the graph borrow ends.
    let rejected = Runtime::with(|rt| {
        let mut graph = rt.graph.borrow_mut();
        match graph.get_mut(owner) {
            Some(node) => {
                match target {
                    CleanupTarget::Cleanups => node.cleanups.push(cleanup),
                    CleanupTarget::Disposers => node.disposers.push(cleanup),
                }
                None
            }
            None => Some(cleanup),
        }
    });
    if rejected.is_some() {
        warn!(?owner, "on_cleanup called on a disposed owner");
    }
}

/// Run `f` without tracking any reads as dependencies.
pub fn untrack<R>(f: impl FnOnce() -> R) -> R {
    let _ctx = ReactiveContext::enter(Frame::untracked());
    f()
}

/// Run `f` inside an error boundary.
///
/// Failures of computations created under the boundary, including their
/// cleanups, are passed to `handler` instead of propagating to the caller
/// that triggered the update. A panic raised by `f` itself is handled the
/// same way and yields `None`.
///
/// If `handler` panics, its failure goes on to the next boundary up.
pub fn catch_error<R, H>(f: impl FnOnce() -> R, handler: H) -> Option<R>
where
    H: Fn(ReactiveError) + 'static,
{
    let id = Runtime::with(|rt| {
        let mut node = Node::new(NodeKind::Scope, ReactiveContext::current_owner());
        node.error_handler = Some(Rc::new(handler));
        rt.graph.borrow_mut().add_node(node)
    });

    let outcome = {
        let _ctx = ReactiveContext::enter(Frame::owner(Some(id)));
        panic::catch_unwind(AssertUnwindSafe(f))
    };

    match outcome {
        Ok(value) => Some(value),
        Err(payload) => {
            let err = ReactiveError::from_panic(id, payload);
            let result = Runtime::with(|rt| rt.run_updates(|rt| rt.handle_error(id, err)));
            if let Err(err) = result {
                raise(err);
            }
            None
        }
    }
}
