//! Reactive Runtime
//!
//! The runtime is the central coordinator that connects signals, memos, and
//! effects. It owns the dependency graph and schedules updates when sources
//! change.
//!
//! # How It Works
//!
//! 1. When a source is read inside a computation, the runtime subscribes the
//!    computation to it.
//!
//! 2. When a source is written, the runtime:
//!    a. Marks its direct observers `Stale`
//!    b. Marks everything below an invalidated memo `MaybeStale`
//!    c. Queues every newly invalidated computation once
//!    d. Flushes the queue unless a batch or flush is already in progress
//!
//! 3. A computation only runs after its upstream memos are up to date, and
//!    all queued memos settle before the next queued effect runs.
//!
//! # Thread Safety
//!
//! There is one runtime per thread. No user code (bodies, comparators,
//! cleanups, handlers) ever runs while a `RefCell` inside the runtime is
//! borrowed, so user code may re-enter any public API.

use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{trace, warn};

use super::context::{Frame, ReactiveContext};
use super::external::{self, ExternalFactory};
use super::transition::Transition;
use crate::config::RuntimeConfig;
use crate::error::ReactiveError;
use crate::graph::{
    Body, Cleanup, FlushPhase, Graph, Node, NodeId, NodeKind, NodeState, UpdateQueue,
};
use crate::schedule::{QueueScheduler, Schedule};

thread_local! {
    static RUNTIME: Runtime = Runtime::new();
}

/// The per-thread reactive runtime.
pub(crate) struct Runtime {
    pub(crate) graph: RefCell<Graph>,
    pub(crate) queue: RefCell<UpdateQueue>,
    pub(crate) phase: Cell<FlushPhase>,
    /// Errors no boundary handled, surfaced by the outermost update.
    pub(crate) unhandled: RefCell<Vec<ReactiveError>>,
    /// The active transition, if any.
    pub(crate) transition: RefCell<Option<Transition>>,
    /// All registered external source factories, composed into one.
    pub(crate) external: RefCell<Option<ExternalFactory>>,
    pub(crate) scheduler: RefCell<Rc<dyn Schedule>>,
    pub(crate) default_queue: QueueScheduler,
    pub(crate) config: Cell<RuntimeConfig>,
}

/// Resets the phase to `Idle` when an update scope ends, including by panic.
struct PhaseGuard<'a> {
    runtime: &'a Runtime,
}

impl Drop for PhaseGuard<'_> {
    fn drop(&mut self) {
        self.runtime.phase.set(FlushPhase::Idle);
    }
}

impl Runtime {
    fn new() -> Self {
        let default_queue = QueueScheduler::new();
        Self {
            graph: RefCell::new(Graph::new()),
            queue: RefCell::new(UpdateQueue::new()),
            phase: Cell::new(FlushPhase::Idle),
            unhandled: RefCell::new(Vec::new()),
            transition: RefCell::new(None),
            external: RefCell::new(None),
            scheduler: RefCell::new(Rc::new(default_queue.clone())),
            default_queue,
            config: Cell::new(RuntimeConfig::default()),
        }
    }

    /// Run `f` against the current thread's runtime.
    pub(crate) fn with<R>(f: impl FnOnce(&Runtime) -> R) -> R {
        RUNTIME.with(f)
    }

    // ------------------------------------------------------------------
    // Node creation and tracking
    // ------------------------------------------------------------------

    /// Allocate a node of `kind` under the current owner.
    pub(crate) fn create_node(&self, kind: NodeKind) -> NodeId {
        let owner = ReactiveContext::current_owner();
        let id = self.graph.borrow_mut().add_node(Node::new(kind, owner));
        if owner.is_none() && kind.is_computation() && self.config.get().warn_on_unowned {
            warn!(?id, ?kind, "computation created outside a root; it will never be disposed");
        }
        id
    }

    /// Allocate a computation, install its body and run it once.
    ///
    /// `build` receives the new node's id so the body can refer to itself.
    pub(crate) fn create_computation(
        &self,
        kind: NodeKind,
        build: impl FnOnce(NodeId) -> Body,
    ) -> Result<NodeId, ReactiveError> {
        let id = self.create_node(kind);
        let body = external::bridge(self, id, build(id));
        if let Some(node) = self.graph.borrow_mut().get_mut(id) {
            node.body = Some(body);
        }
        self.run_updates(|rt| rt.run_computation(id))?;
        Ok(id)
    }

    /// Subscribe the currently running computation to `source`.
    pub(crate) fn track(&self, source: NodeId) {
        if !self.graph.borrow().contains(source) {
            return;
        }
        if let Some(observer) = ReactiveContext::track_dependency(source) {
            self.graph.borrow_mut().subscribe(source, observer);
        }
    }

    // ------------------------------------------------------------------
    // Invalidation
    // ------------------------------------------------------------------

    /// A committed write to `source`: invalidate its observers and flush.
    pub(crate) fn write(&self, source: NodeId) -> Result<(), ReactiveError> {
        self.run_updates(|rt| rt.notify_observers(source))
    }

    /// Mark every observer of `source` stale without flushing.
    ///
    /// A committed change also drops every shadow value the active
    /// transition derived, since they may have read the old value.
    pub(crate) fn notify_observers(&self, source: NodeId) {
        let shadows = self
            .transition
            .borrow_mut()
            .as_mut()
            .map(Transition::take_shadows);
        drop(shadows);

        let mut graph = self.graph.borrow_mut();
        let mut queue = self.queue.borrow_mut();
        for observer in graph.observers(source) {
            invalidate(&mut graph, &mut queue, observer, NodeState::Stale);
        }
    }

    /// Bring a memo up to date before it is read.
    pub(crate) fn refresh(&self, id: NodeId) -> Result<(), ReactiveError> {
        let state = self.graph.borrow().state(id);
        match state {
            Some(NodeState::Stale | NodeState::MaybeStale) => {
                self.run_updates(|rt| rt.update_if_necessary(id))
            }
            _ => Ok(()),
        }
    }

    // ------------------------------------------------------------------
    // Update cycle
    // ------------------------------------------------------------------

    /// Run `f` as one logical update: writes made by `f` are collected and
    /// flushed once at the end. Nested calls only run `f`; the outermost
    /// call flushes and reports every unhandled error.
    pub(crate) fn run_updates<R>(&self, f: impl FnOnce(&Runtime) -> R) -> Result<R, ReactiveError> {
        if self.phase.get() != FlushPhase::Idle {
            return Ok(f(self));
        }

        let guard = PhaseGuard { runtime: self };
        self.phase.set(FlushPhase::Collecting);
        let value = f(self);
        self.flush();
        drop(guard);

        let errors = std::mem::take(&mut *self.unhandled.borrow_mut());
        ReactiveError::collapse(errors).map(|()| value)
    }

    /// Drain the queue: all memos first, then one effect at a time with the
    /// memo queue drained again after each.
    fn flush(&self) {
        self.phase.set(FlushPhase::Flushing);
        let limit = self.config.get().max_flush_iterations;
        let mut updates = 0usize;
        trace!(queued = self.queue.borrow().len(), "flush started");

        loop {
            let next = {
                let mut queue = self.queue.borrow_mut();
                queue.pop_memo().or_else(|| queue.pop_effect())
            };
            let Some(id) = next else {
                break;
            };

            updates += 1;
            if updates > limit {
                self.abort_flush(id, limit);
                break;
            }
            self.update_if_necessary(id);
        }

        trace!(updates, "flush finished");
    }

    /// Give up on a runaway flush: drop the queue and reset what was in it.
    fn abort_flush(&self, current: NodeId, limit: usize) {
        warn!(limit, "flush aborted; potential infinite loop");
        let dropped = self.queue.borrow_mut().drain();
        let mut graph = self.graph.borrow_mut();
        for id in dropped.into_iter().chain(std::iter::once(current)) {
            if let Some(node) = graph.get_mut(id) {
                node.mark_clean();
            }
        }
        drop(graph);
        self.unhandled
            .borrow_mut()
            .push(ReactiveError::InfiniteLoop { limit });
    }

    /// Re-run `id` if it is stale, after bringing its upstream memos up to
    /// date. A `MaybeStale` node whose upstream memos all kept their value
    /// becomes clean without running.
    pub(crate) fn update_if_necessary(&self, id: NodeId) {
        let state = self.graph.borrow().state(id);
        if !matches!(state, Some(NodeState::Stale | NodeState::MaybeStale)) {
            return;
        }

        let sources = self.graph.borrow().sources(id);
        for source in sources {
            let upstream_dirty = {
                let graph = self.graph.borrow();
                graph.kind(source) == Some(NodeKind::Memo)
                    && matches!(
                        graph.state(source),
                        Some(NodeState::Stale | NodeState::MaybeStale)
                    )
            };
            if upstream_dirty {
                self.update_if_necessary(source);
            }
        }

        let state = self.graph.borrow().state(id);
        match state {
            Some(NodeState::Stale) => self.run_computation(id),
            Some(NodeState::MaybeStale) => {
                if let Some(node) = self.graph.borrow_mut().get_mut(id) {
                    node.mark_clean();
                }
            }
            _ => {}
        }
    }

    /// The re-execution protocol shared by first runs and re-runs.
    pub(crate) fn run_computation(&self, id: NodeId) {
        let body = {
            let graph = self.graph.borrow();
            match graph.get(id) {
                Some(node) => node.body.clone(),
                None => return,
            }
        };
        let Some(body) = body else {
            return;
        };

        self.clean_node(id);
        if let Some(node) = self.graph.borrow_mut().get_mut(id) {
            node.mark_clean();
        }

        trace!(?id, "running computation");
        let ctx = ReactiveContext::enter(Frame::computation(id));
        let result = panic::catch_unwind(AssertUnwindSafe(|| body()));
        let sources = ctx.finish();

        {
            let mut graph = self.graph.borrow_mut();
            if graph.contains(id) {
                graph.replace_sources(id, sources);
                if let Some(node) = graph.get_mut(id) {
                    node.runs += 1;
                }
            } else {
                // Disposed by its own body: drop the subscriptions made
                // before the disposal.
                graph.unsubscribe_all(id, &sources);
            }
        }

        if let Err(payload) = result {
            self.handle_error(id, ReactiveError::from_panic(id, payload));
        }
    }

    // ------------------------------------------------------------------
    // Ownership
    // ------------------------------------------------------------------

    /// Prepare `id` for a re-run: run its cleanups, then dispose the
    /// children created by its previous run.
    fn clean_node(&self, id: NodeId) {
        let (cleanups, children) = {
            let mut graph = self.graph.borrow_mut();
            match graph.get_mut(id) {
                Some(node) => (
                    std::mem::take(&mut node.cleanups),
                    std::mem::take(&mut node.children),
                ),
                None => return,
            }
        };

        self.run_cleanups(id, cleanups);
        for child in children.into_iter().rev() {
            self.dispose_node(child);
        }
    }

    /// Dispose `id` and its whole subtree: descendants first (last created
    /// first), then the node's own cleanups in reverse registration order.
    /// Disposed computations leave the queue and never run again.
    pub(crate) fn dispose_node(&self, id: NodeId) {
        let (children, trigger) = {
            let mut graph = self.graph.borrow_mut();
            match graph.get_mut(id) {
                Some(node) => (std::mem::take(&mut node.children), node.trigger.take()),
                None => return,
            }
        };

        for child in children.into_iter().rev() {
            self.dispose_node(child);
        }

        let (cleanups, disposers) = {
            let mut graph = self.graph.borrow_mut();
            match graph.get_mut(id) {
                Some(node) => (
                    std::mem::take(&mut node.cleanups),
                    std::mem::take(&mut node.disposers),
                ),
                None => return,
            }
        };
        self.run_cleanups(id, cleanups);
        self.run_cleanups(id, disposers);

        self.queue.borrow_mut().remove(id);
        if let Some(transition) = self.transition.borrow_mut().as_mut() {
            transition.forget(id);
        }

        // Bodies and cleanups may hold handles whose drop re-enters the
        // graph, so removed nodes are dropped after the borrow ends.
        let removed_trigger = trigger.and_then(|trigger| self.graph.borrow_mut().remove_node(trigger));
        let removed = self.graph.borrow_mut().remove_node(id);
        drop((removed_trigger, removed));
        trace!(?id, "node disposed");
    }

    fn run_cleanups(&self, id: NodeId, cleanups: Vec<Cleanup>) {
        if cleanups.is_empty() {
            return;
        }
        let _ctx = ReactiveContext::enter(Frame::untracked());
        for cleanup in cleanups.into_iter().rev() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(cleanup)) {
                self.handle_error(id, ReactiveError::from_panic(id, payload));
            }
        }
    }

    // ------------------------------------------------------------------
    // Errors
    // ------------------------------------------------------------------

    /// Route `error` to the nearest error boundary above `origin`. A handler
    /// that panics passes its own failure to the next boundary up. Errors
    /// nobody handles are kept for the outermost update to return.
    pub(crate) fn handle_error(&self, origin: NodeId, error: ReactiveError) {
        warn!(?origin, %error, "computation failed");
        let mut error = error;
        let mut from = Some(origin);

        while let Some(start) = from {
            let boundary = {
                let graph = self.graph.borrow();
                let found = graph.owner_chain(start).find_map(|id| {
                    graph
                        .get(id)
                        .and_then(|node| node.error_handler.clone())
                        .map(|handler| (id, handler))
                });
                found
            };
            let Some((boundary, handler)) = boundary else {
                break;
            };

            let reported = error.clone();
            let outcome = {
                let _ctx = ReactiveContext::enter(Frame::owner(Some(boundary)).without_observer());
                panic::catch_unwind(AssertUnwindSafe(|| handler(reported)))
            };
            match outcome {
                Ok(()) => return,
                Err(payload) => {
                    error = ReactiveError::ErrorHandlerPanicked {
                        node: boundary,
                        message: crate::error::panic_message(payload.as_ref()),
                    };
                    from = self.graph.borrow().get(boundary).and_then(|node| node.owner);
                }
            }
        }

        self.unhandled.borrow_mut().push(error);
    }

    /// Release the graph node of a source whose last handle was dropped.
    pub(crate) fn release(id: NodeId) {
        let _ = RUNTIME.try_with(|rt| {
            let removed = match rt.graph.try_borrow_mut() {
                Ok(mut graph) => graph.remove_node(id),
                Err(_) => None,
            };
            drop(removed);
        });
    }
}

/// Mark `id` with `state` and queue it if it was not already invalidated.
/// Memos pass a `MaybeStale` mark on to their observers.
fn invalidate(graph: &mut Graph, queue: &mut UpdateQueue, id: NodeId, state: NodeState) {
    let Some(node) = graph.get_mut(id) else {
        return;
    };
    if !node.kind.is_computation() {
        return;
    }

    let previous = node.state;
    match state {
        NodeState::Stale if previous != NodeState::Stale => node.state = NodeState::Stale,
        NodeState::MaybeStale if previous.accepts_invalidation() => {
            node.state = NodeState::MaybeStale
        }
        _ => return,
    }

    if previous.accepts_invalidation() {
        let kind = node.kind;
        queue.push(id, kind);
        if kind == NodeKind::Memo {
            for observer in graph.observers(id) {
                invalidate(graph, queue, observer, NodeState::MaybeStale);
            }
        }
    }
}

/// Re-raise an unhandled error to the caller that triggered the update.
pub(crate) fn raise(error: ReactiveError) -> ! {
    panic!("{error}")
}

/// Current state of a node, or `None` once it has been disposed.
pub fn node_state(id: NodeId) -> Option<NodeState> {
    Runtime::with(|rt| rt.graph.borrow().state(id))
}

/// Number of live nodes in the current thread's graph.
pub fn node_count() -> usize {
    Runtime::with(|rt| rt.graph.borrow().node_count())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    fn counting_effect(rt: &Runtime, hits: Rc<Cell<usize>>, reads: Vec<NodeId>) -> NodeId {
        rt.create_computation(NodeKind::Effect, move |_| -> Body {
            Rc::new(move || {
                for &source in &reads {
                    Runtime::with(|rt| rt.track(source));
                }
                hits.set(hits.get() + 1);
            })
        })
        .unwrap()
    }

    #[test]
    fn runtime_notifies_observers() {
        Runtime::with(|rt| {
            let source = rt.create_node(NodeKind::Signal);
            let hits = Rc::new(Cell::new(0));
            let effect = counting_effect(rt, hits.clone(), vec![source]);

            assert_eq!(hits.get(), 1);
            assert!(rt.graph.borrow().get(source).unwrap().observers.contains(&effect));

            rt.write(source).unwrap();
            assert_eq!(hits.get(), 2);
            assert_eq!(rt.graph.borrow().state(effect), Some(NodeState::Clean));
        });
    }

    #[test]
    fn writes_inside_an_update_flush_once() {
        Runtime::with(|rt| {
            let a = rt.create_node(NodeKind::Signal);
            let b = rt.create_node(NodeKind::Signal);
            let hits = Rc::new(Cell::new(0));
            counting_effect(rt, hits.clone(), vec![a, b]);

            rt.run_updates(|rt| {
                rt.notify_observers(a);
                rt.notify_observers(b);
                assert_eq!(rt.phase.get(), FlushPhase::Collecting);
            })
            .unwrap();

            assert_eq!(hits.get(), 2);
            assert_eq!(rt.phase.get(), FlushPhase::Idle);
        });
    }

    #[test]
    fn disposed_computations_leave_the_queue() {
        Runtime::with(|rt| {
            let source = rt.create_node(NodeKind::Signal);
            let hits = Rc::new(Cell::new(0));
            let effect = counting_effect(rt, hits.clone(), vec![source]);

            rt.run_updates(|rt| {
                rt.notify_observers(source);
                assert!(rt.queue.borrow().contains(effect));
                rt.dispose_node(effect);
                assert!(!rt.queue.borrow().contains(effect));
            })
            .unwrap();

            assert_eq!(hits.get(), 1);
            assert!(rt.graph.borrow().get(source).unwrap().observers.is_empty());
        });
    }

    #[test]
    fn runaway_flush_is_aborted() {
        Runtime::with(|rt| {
            rt.config.set(RuntimeConfig::default().with_max_flush_iterations(10));
            let source = rt.create_node(NodeKind::Signal);

            let result = rt.create_computation(NodeKind::Effect, move |_| -> Body {
                Rc::new(move || {
                    Runtime::with(|rt| {
                        rt.track(source);
                        rt.notify_observers(source);
                    })
                })
            });

            assert_eq!(result, Err(ReactiveError::InfiniteLoop { limit: 10 }));
            assert!(rt.queue.borrow().is_empty());
        });
    }

    #[test]
    fn panicking_bodies_are_reported_without_stopping_siblings() {
        Runtime::with(|rt| {
            let source = rt.create_node(NodeKind::Signal);
            let hits = Rc::new(Cell::new(0));
            let armed = Rc::new(Cell::new(false));

            let flag = armed.clone();
            let failing = rt
                .create_computation(NodeKind::Effect, move |_| -> Body {
                    Rc::new(move || {
                        Runtime::with(|rt| rt.track(source));
                        if flag.get() {
                            panic!("boom");
                        }
                    })
                })
                .unwrap();
            counting_effect(rt, hits.clone(), vec![source]);

            armed.set(true);
            let result = rt.write(source);

            assert_eq!(
                result,
                Err(ReactiveError::Panicked {
                    node: failing,
                    message: "boom".to_string()
                })
            );
            assert_eq!(hits.get(), 2);
        });
    }

    #[test]
    fn self_disposal_drops_subscriptions_made_during_the_run() {
        Runtime::with(|rt| {
            let source = rt.create_node(NodeKind::Signal);
            let late = rt.create_node(NodeKind::Signal);
            let armed = Rc::new(Cell::new(false));

            let flag = armed.clone();
            let effect = rt
                .create_computation(NodeKind::Effect, move |id| -> Body {
                    Rc::new(move || {
                        Runtime::with(|rt| {
                            rt.track(source);
                            if flag.get() {
                                rt.track(late);
                                rt.dispose_node(id);
                            }
                        })
                    })
                })
                .unwrap();

            armed.set(true);
            rt.write(source).unwrap();

            let graph = rt.graph.borrow();
            assert!(!graph.contains(effect));
            assert!(graph.get(source).unwrap().observers.is_empty());
            assert!(graph.get(late).unwrap().observers.is_empty());
        });
    }
}
