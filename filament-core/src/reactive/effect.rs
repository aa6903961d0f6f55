//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately to establish
//!    initial dependencies.
//!
//! 2. When any dependency changes, the effect is queued. Queued effects run
//!    in the order they were invalidated, each after every queued memo has
//!    settled.
//!
//! 3. Before re-running, the effect runs its cleanups, disposes whatever it
//!    created during the previous run, and tracks new dependencies during
//!    execution.
//!
//! # Cleanup
//!
//! Register cleanups from inside the effect with
//! [`on_cleanup`](super::on_cleanup). They run before the effect re-runs and
//! when the effect is disposed, which is the place to release listeners or
//! timers the effect set up.

use std::rc::Rc;

use super::runtime::{raise, Runtime};
use crate::error::ReactiveError;
use crate::graph::{Body, NodeId, NodeKind, NodeState};

/// A side-effecting computation that runs when dependencies change.
///
/// The handle is a lightweight id; dropping it does not stop the effect.
/// Effects stop when disposed directly or together with their owner.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::{create_root, Effect, Signal};
///
/// create_root(|_| {
///     let count = Signal::new(0);
///     let source = count.clone();
///
///     let effect = Effect::new(move || {
///         println!("Count is: {}", source.get());
///     });
///
///     count.set(1);
///     assert_eq!(effect.run_count(), 2);
/// });
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Effect {
    id: NodeId,
}

impl Effect {
    /// Create a new effect that runs immediately and again whenever its
    /// dependencies change.
    ///
    /// # Panics
    ///
    /// Panics if the first run fails and no error boundary handles it.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + 'static,
    {
        match Self::try_new(run) {
            Ok(effect) => effect,
            Err(err) => raise(err),
        }
    }

    /// Like [`Effect::new`], returning first-run failures instead of
    /// panicking. The effect stays registered either way.
    pub fn try_new<F>(run: F) -> Result<Self, ReactiveError>
    where
        F: Fn() + 'static,
    {
        let run: Body = Rc::new(run);
        Runtime::with(|rt| rt.create_computation(NodeKind::Effect, move |_| run))
            .map(|id| Self { id })
    }

    /// Get the effect's graph handle.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Dispose the effect. It will not run again.
    pub fn dispose(&self) {
        let result = Runtime::with(|rt| rt.run_updates(|rt| rt.dispose_node(self.id)));
        if let Err(err) = result {
            raise(err);
        }
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        Runtime::with(|rt| !rt.graph.borrow().contains(self.id))
    }

    /// Current freshness, or `None` once disposed.
    pub fn state(&self) -> Option<NodeState> {
        Runtime::with(|rt| rt.graph.borrow().state(self.id))
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        Runtime::with(|rt| rt.graph.borrow().get(self.id).map_or(0, |node| node.runs))
    }

    /// Get the number of sources read during the latest run.
    pub fn dependency_count(&self) -> usize {
        Runtime::with(|rt| rt.graph.borrow().sources(self.id).len())
    }
}

/// Create an effect. See [`Effect::new`].
pub fn create_effect<F>(run: F) -> Effect
where
    F: Fn() + 'static,
{
    Effect::new(run)
}
