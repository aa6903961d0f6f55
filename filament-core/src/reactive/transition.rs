//! Transitions
//!
//! A transition applies a group of writes as one deferred, atomic update.
//! Writes made inside the transition are kept in a pending map instead of
//! being committed; code running inside the transition reads the pending
//! values while everything else keeps seeing the committed ones. When the
//! transition commits, all pending values are swapped in and propagated in a
//! single flush, then the completion callbacks run.
//!
//! Memos that depend on a pending write get a shadow value the first time
//! they are read in transition scope. The shadow is computed from pending
//! inputs and kept next to the pending writes; the memo's committed value
//! and its graph edges are left alone. Effects below a pending write are
//! marked `Pending` and only run once the transition commits.
//!
//! # Timeline
//!
//! ```text
//! start_transition(f, done)
//!   ├─ task 1: run f in transition scope (writes go to the pending map)
//!   └─ task 2: commit pending values, flush, run `done` callbacks
//! ```
//!
//! Both tasks go through the host [`Schedule`](crate::schedule::Schedule),
//! so a fresh transition never runs `f` synchronously. Calling
//! `start_transition` while a transition is active joins it: `f` runs right
//! away in its scope and `done` is queued with the other callbacks.
//!
//! While an external source factory is registered, transitions degrade to
//! deferred batches: `f` runs in a scheduled task as a plain batch and no
//! pending map is kept.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use indexmap::{IndexMap, IndexSet};
use tracing::{debug, error};

use super::batch::try_batch;
use super::context::{Frame, ReactiveContext};
use super::runtime::Runtime;
use super::signal::SignalCell;
use crate::graph::{Graph, NodeId, NodeKind, NodeState};
use crate::schedule::schedule;

/// A write deferred into a transition.
pub(crate) trait PendingValue {
    fn as_any(&self) -> &dyn Any;

    /// Apply the write to its signal. Returns whether the value changed.
    fn commit(self: Box<Self>) -> bool;
}

struct PendingWrite<T: 'static> {
    cell: Rc<SignalCell<T>>,
    value: Rc<T>,
}

impl<T: 'static> PendingValue for PendingWrite<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn commit(self: Box<Self>) -> bool {
        self.cell.replace(self.value)
    }
}

/// State of the active transition.
pub(crate) struct Transition {
    /// Shadow values keyed by signal, in first-write order.
    pending: IndexMap<NodeId, Box<dyn PendingValue>>,
    /// Computations marked `Pending` by deferred writes.
    deferred: IndexSet<NodeId>,
    /// Memo values derived from pending inputs. Each entry holds an `Rc<T>`.
    shadows: IndexMap<NodeId, Box<dyn Any>>,
    callbacks: Vec<Box<dyn FnOnce()>>,
}

impl Transition {
    fn new() -> Self {
        Self {
            pending: IndexMap::new(),
            deferred: IndexSet::new(),
            shadows: IndexMap::new(),
            callbacks: Vec::new(),
        }
    }

    /// Stop tracking a disposed computation.
    pub(crate) fn forget(&mut self, id: NodeId) {
        self.deferred.shift_remove(&id);
        self.shadows.shift_remove(&id);
    }

    /// Remove every shadow value so they are derived again on the next read.
    /// The caller drops the result outside any runtime borrow.
    pub(crate) fn take_shadows(&mut self) -> IndexMap<NodeId, Box<dyn Any>> {
        std::mem::take(&mut self.shadows)
    }

    /// Whether `id` reads, directly or through other memos, a signal with a
    /// pending write.
    fn reads_pending(&self, graph: &Graph, id: NodeId) -> bool {
        let mut visited = IndexSet::new();
        let mut stack = vec![id];
        while let Some(current) = stack.pop() {
            for source in graph.sources(current) {
                if self.pending.contains_key(&source) {
                    return true;
                }
                if graph.kind(source) == Some(NodeKind::Memo) && visited.insert(source) {
                    stack.push(source);
                }
            }
        }
        false
    }
}

/// Start a transition (or join the active one). See the module docs.
///
/// `on_complete` runs after the transition's writes are committed and
/// propagated.
pub fn start_transition<F, C>(f: F, on_complete: C)
where
    F: FnOnce() + 'static,
    C: FnOnce() + 'static,
{
    let external = Runtime::with(|rt| rt.external.borrow().is_some());
    if external {
        debug!("external source registered; running transition as a deferred batch");
        schedule(Box::new(move || {
            if let Err(err) = try_batch(f) {
                error!(error = %err, "deferred transition failed");
            }
            schedule(Box::new(on_complete));
        }));
        return;
    }

    let on_complete: Box<dyn FnOnce()> = Box::new(on_complete);
    let joined = Runtime::with(|rt| {
        let mut slot = rt.transition.borrow_mut();
        match slot.as_mut() {
            Some(active) => {
                active.callbacks.push(on_complete);
                true
            }
            None => {
                let mut fresh = Transition::new();
                fresh.callbacks.push(on_complete);
                *slot = Some(fresh);
                false
            }
        }
    });

    if joined {
        debug!("joining the active transition");
        let _ctx = ReactiveContext::enter(transition_frame());
        f();
        return;
    }

    debug!("transition started");
    schedule(Box::new(move || {
        {
            let _ctx = ReactiveContext::enter(transition_frame());
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
                let message = crate::error::panic_message(payload.as_ref());
                error!(%message, "transition body panicked");
            }
        }
        schedule(Box::new(commit));
    }));
}

/// Whether a transition has started and not yet committed.
pub fn is_transition_pending() -> bool {
    Runtime::with(|rt| rt.transition.borrow().is_some())
}

/// Transition bodies run detached from whatever scope started them.
fn transition_frame() -> Frame {
    Frame::owner(None).without_observer().with_transition(true)
}

/// Swap every pending value in, propagate, then run the callbacks.
fn commit() {
    let Some(transition) = Runtime::with(|rt| rt.transition.borrow_mut().take()) else {
        return;
    };
    let Transition {
        pending,
        deferred,
        shadows,
        callbacks,
    } = transition;
    drop(shadows);
    debug!(writes = pending.len(), deferred = deferred.len(), "committing transition");

    let result = Runtime::with(|rt| {
        rt.run_updates(|rt| {
            for (id, write) in pending {
                if write.commit() {
                    rt.notify_observers(id);
                }
            }
            let mut graph = rt.graph.borrow_mut();
            for id in deferred {
                if let Some(node) = graph.get_mut(id) {
                    if node.state == NodeState::Pending {
                        node.mark_clean();
                    }
                }
            }
        })
    });
    if let Err(err) = result {
        error!(error = %err, "transition commit failed");
    }

    for callback in callbacks {
        callback();
    }
}

/// Record a write made in transition scope. Returns the value back if no
/// transition is active, so the caller commits it directly.
pub(crate) fn defer_write<T: 'static>(
    id: NodeId,
    cell: &Rc<SignalCell<T>>,
    value: T,
) -> Result<(), T> {
    if !is_transition_pending() {
        return Err(value);
    }

    let visible = pending_value::<T>(id).unwrap_or_else(|| cell.current());
    if cell.equality().equals(&visible, &value) {
        return Ok(());
    }

    Runtime::with(|rt| {
        let affected = {
            let mut graph = rt.graph.borrow_mut();
            mark_pending(&mut graph, id)
        };
        let replaced = {
            let mut slot = rt.transition.borrow_mut();
            let Some(active) = slot.as_mut() else {
                return;
            };
            active.deferred.extend(affected);
            let write = active.pending.insert(
                id,
                Box::new(PendingWrite {
                    cell: cell.clone(),
                    value: Rc::new(value),
                }) as Box<dyn PendingValue>,
            );
            (write, active.take_shadows())
        };
        drop(replaced);
    });
    Ok(())
}

/// Mark every computation below `source` `Pending`, following memos, and
/// return the ones that changed state.
fn mark_pending(graph: &mut Graph, source: NodeId) -> Vec<NodeId> {
    let mut marked = Vec::new();
    let mut stack = vec![source];
    while let Some(current) = stack.pop() {
        for observer in graph.observers(current) {
            let Some(node) = graph.get_mut(observer) else {
                continue;
            };
            if node.state != NodeState::Clean {
                continue;
            }
            node.state = NodeState::Pending;
            marked.push(observer);
            if node.kind == NodeKind::Memo {
                stack.push(observer);
            }
        }
    }
    marked
}

/// The pending value of signal `id`, if the caller is in transition scope
/// and the transition wrote to it.
pub(crate) fn pending_value<T: 'static>(id: NodeId) -> Option<Rc<T>> {
    if !ReactiveContext::in_transition() {
        return None;
    }
    Runtime::with(|rt| {
        let slot = rt.transition.borrow();
        let write = slot.as_ref()?.pending.get(&id)?;
        write
            .as_any()
            .downcast_ref::<PendingWrite<T>>()
            .map(|write| write.value.clone())
    })
}

/// The value memo `id` has inside the active transition, if the caller is
/// in transition scope and the memo reads a pending write.
///
/// The shadow is derived with `compute` on first read and cached until the
/// next pending or committed change. Returns `None` when the committed value
/// already is the transition's view.
pub(crate) fn memo_value<T: 'static>(id: NodeId, compute: &dyn Fn() -> T) -> Option<Rc<T>> {
    if !ReactiveContext::in_transition() {
        return None;
    }

    let cached = Runtime::with(|rt| {
        let slot = rt.transition.borrow();
        let shadow = slot.as_ref()?.shadows.get(&id)?;
        shadow.downcast_ref::<Rc<T>>().cloned()
    });
    if cached.is_some() {
        return cached;
    }

    let affected = Runtime::with(|rt| {
        let slot = rt.transition.borrow();
        let graph = rt.graph.borrow();
        slot.as_ref().is_some_and(|active| active.reads_pending(&graph, id))
    });
    if !affected {
        return None;
    }

    let value = {
        let _ctx = ReactiveContext::enter(
            Frame::owner(Some(id)).without_observer().with_transition(true),
        );
        Rc::new(compute())
    };
    let replaced = Runtime::with(|rt| {
        let mut slot = rt.transition.borrow_mut();
        let active = slot.as_mut()?;
        active.shadows.insert(id, Box::new(value.clone()))
    });
    drop(replaced);
    Some(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{batch, create_effect, create_memo, create_root, Memo, Signal};
    use crate::schedule::{run_pending, set_scheduler, Schedule, Task};
    use std::cell::{Cell, RefCell};
    use std::collections::VecDeque;

    #[test]
    fn writes_stay_pending_until_commit() {
        create_root(|_| {
            let signal = Signal::new(1);
            let seen = Rc::new(RefCell::new(Vec::new()));

            let (source, log) = (signal.clone(), seen.clone());
            let effect = create_effect(move || log.borrow_mut().push(source.get()));

            let inside = Rc::new(Cell::new(0));
            let (target, observed) = (signal.clone(), inside.clone());
            start_transition(
                move || {
                    target.set(2);
                    observed.set(target.get());
                },
                || {},
            );
            assert!(is_transition_pending());

            // Joins the active transition instead of starting another.
            let done = Rc::new(Cell::new(false));
            let flag = done.clone();
            start_transition(|| {}, move || flag.set(true));

            assert_eq!(run_pending(), 2);
            assert_eq!(inside.get(), 2);
            assert_eq!(signal.get(), 2);
            assert_eq!(*seen.borrow(), vec![1, 2]);
            assert_eq!(effect.state(), Some(NodeState::Clean));
            assert!(done.get());
            assert!(!is_transition_pending());
        });
    }

    #[derive(Clone, Default)]
    struct StepScheduler {
        tasks: Rc<RefCell<VecDeque<Task>>>,
    }

    impl StepScheduler {
        fn step(&self) -> bool {
            let next = self.tasks.borrow_mut().pop_front();
            next.map(|task| task()).is_some()
        }
    }

    impl Schedule for StepScheduler {
        fn schedule(&self, task: Task) {
            self.tasks.borrow_mut().push_back(task);
        }
    }

    #[test]
    fn outside_reads_see_committed_values_during_a_transition() {
        let scheduler = StepScheduler::default();
        set_scheduler(scheduler.clone());

        create_root(|_| {
            let signal = Signal::new("old");
            let seen = Rc::new(RefCell::new(Vec::new()));

            let (source, log) = (signal.clone(), seen.clone());
            let effect = create_effect(move || log.borrow_mut().push(source.get()));

            let inside = Rc::new(RefCell::new(Vec::new()));
            let (target, observed) = (signal.clone(), inside.clone());
            start_transition(
                move || {
                    target.set("new");
                    observed.borrow_mut().push(target.get());
                },
                || {},
            );

            // Body only.
            assert!(scheduler.step());
            assert_eq!(*inside.borrow(), vec!["new"]);
            assert_eq!(signal.get(), "old");
            assert_eq!(effect.state(), Some(NodeState::Pending));
            assert_eq!(*seen.borrow(), vec!["old"]);

            // Commit.
            assert!(scheduler.step());
            assert!(!scheduler.step());
            assert_eq!(signal.get(), "new");
            assert_eq!(*seen.borrow(), vec!["old", "new"]);
            assert_eq!(effect.state(), Some(NodeState::Clean));
        });
    }

    #[test]
    fn memos_read_in_a_transition_follow_pending_writes() {
        let scheduler = StepScheduler::default();
        set_scheduler(scheduler.clone());

        create_root(|_| {
            let signal = Signal::new(1);
            let source = signal.clone();
            let doubled = create_memo(move || source.get() * 2);
            let upstream = doubled.clone();
            let quadrupled = create_memo(move || upstream.get() * 2);

            let inside = Rc::new(RefCell::new(Vec::new()));
            let (target, a, b, log) = (
                signal.clone(),
                doubled.clone(),
                quadrupled.clone(),
                inside.clone(),
            );
            start_transition(
                move || {
                    target.set(2);
                    log.borrow_mut().push((target.get(), a.get(), b.get()));
                },
                || {},
            );

            assert!(scheduler.step());
            assert_eq!(*inside.borrow(), vec![(2, 4, 8)]);
            assert_eq!(doubled.get(), 2);
            assert_eq!(quadrupled.get(), 4);
            assert_eq!(doubled.state(), Some(NodeState::Pending));
            assert_eq!(quadrupled.state(), Some(NodeState::Pending));
            assert_eq!(doubled.run_count(), 1);

            assert!(scheduler.step());
            assert_eq!(doubled.get(), 4);
            assert_eq!(quadrupled.get(), 8);
            assert_eq!(doubled.run_count(), 2);
            assert_eq!(quadrupled.state(), Some(NodeState::Clean));
        });
    }

    #[test]
    fn memos_created_in_a_transition_keep_committed_values_outside() {
        let scheduler = StepScheduler::default();
        set_scheduler(scheduler.clone());

        create_root(|_| {
            let signal = Signal::new(1);
            let created: Rc<RefCell<Option<Memo<i32>>>> = Rc::new(RefCell::new(None));
            let inside = Rc::new(RefCell::new(Vec::new()));

            let (target, slot, log) = (signal.clone(), created.clone(), inside.clone());
            start_transition(
                move || {
                    target.set(5);
                    let source = target.clone();
                    let memo = create_memo(move || source.get());
                    log.borrow_mut().push(memo.get());
                    *slot.borrow_mut() = Some(memo);
                },
                || {},
            );

            assert!(scheduler.step());
            assert_eq!(*inside.borrow(), vec![5]);
            let memo = created.borrow().clone().expect("body ran");
            assert_eq!(signal.get(), 1);
            assert_eq!(memo.get(), 1);

            assert!(scheduler.step());
            assert_eq!(memo.get(), 5);
        });
    }

    #[test]
    fn memos_refreshed_from_a_joined_transition_stay_committed() {
        let scheduler = StepScheduler::default();
        set_scheduler(scheduler.clone());

        create_root(|_| {
            let pending = Signal::new(1);
            let plain = Signal::new(0);
            let (left, right) = (pending.clone(), plain.clone());
            let sum = create_memo(move || left.get() + right.get());

            let target = pending.clone();
            start_transition(move || target.set(5), || {});
            assert!(scheduler.step());

            let inside = Rc::new(RefCell::new(Vec::new()));
            batch(|| {
                plain.set(3);
                let (memo, log) = (sum.clone(), inside.clone());
                start_transition(move || log.borrow_mut().push(memo.get()), || {});
            });

            assert_eq!(*inside.borrow(), vec![8]);
            assert_eq!(sum.get(), 4);

            assert!(scheduler.step());
            assert!(!scheduler.step());
            assert_eq!(sum.get(), 8);
        });
    }

    #[test]
    fn plain_writes_rerun_pending_effects_with_committed_values() {
        let scheduler = StepScheduler::default();
        set_scheduler(scheduler.clone());

        create_root(|_| {
            let deferred = Signal::new(0);
            let plain = Signal::new(0);
            let seen = Rc::new(RefCell::new(Vec::new()));

            let (left, right, log) = (deferred.clone(), plain.clone(), seen.clone());
            let effect = create_effect(move || log.borrow_mut().push((left.get(), right.get())));

            let target = deferred.clone();
            start_transition(move || target.set(1), || {});
            assert!(scheduler.step());
            assert_eq!(effect.state(), Some(NodeState::Pending));

            plain.set(1);
            assert_eq!(*seen.borrow(), vec![(0, 0), (0, 1)]);
            assert_eq!(effect.state(), Some(NodeState::Clean));

            assert!(scheduler.step());
            assert_eq!(*seen.borrow(), vec![(0, 0), (0, 1), (1, 1)]);
            assert_eq!(effect.state(), Some(NodeState::Clean));
        });
    }

    #[test]
    fn equal_pending_writes_are_ignored() {
        create_root(|_| {
            let signal = Signal::new(5);
            let target = signal.clone();
            start_transition(move || target.set(5), || {});
            run_pending();

            let pending = Runtime::with(|rt| rt.transition.borrow().is_some());
            assert!(!pending);
            assert_eq!(signal.get(), 5);
        });
    }
}
