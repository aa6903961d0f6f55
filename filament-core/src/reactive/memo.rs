//! Memo Implementation
//!
//! A Memo is a cached derived value that re-evaluates only when its
//! dependencies change.
//!
//! # How Memos Work
//!
//! 1. On creation, the memo runs its computation and caches the result.
//!
//! 2. When a direct dependency changes, the memo is marked `Stale`; memos
//!    and effects below it are marked `MaybeStale`.
//!
//! 3. The memo recomputes during the flush (or earlier, if someone reads it
//!    mid-batch). If the new value equals the cached one under the memo's
//!    [`Equality`], nothing downstream is re-run.
//!
//! 4. Reading a memo always brings it up to date first, so no computation
//!    ever observes a stale derived value.
//!
//! Inside a transition, a memo that reads a pending write is evaluated
//! again against the pending values; that result is only visible in
//! transition scope.
//!
//! # Why This Matters
//!
//! A memo that filters noise (`count > 10`) shields everything below it:
//! when the input changes but the result does not, observers of the memo
//! are marked clean without running.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::runtime::{raise, Runtime};
use super::signal::Equality;
use super::transition;
use crate::error::ReactiveError;
use crate::graph::{Body, NodeId, NodeKind, NodeState};

/// Cached value shared by the memo handle and its body.
struct MemoCell<T> {
    value: RefCell<Option<Rc<T>>>,
    equality: Equality<T>,
    compute: Box<dyn Fn() -> T>,
}

impl<T> MemoCell<T> {
    /// Store `next` unless it equals the cached value. The first value always
    /// counts as a change.
    fn replace(&self, next: T) -> bool {
        let current = self.value.borrow().clone();
        if let Some(current) = current {
            if self.equality.equals(&current, &next) {
                return false;
            }
        }
        *self.value.borrow_mut() = Some(Rc::new(next));
        true
    }
}

/// A cached derived value that recomputes only when dependencies change.
///
/// Memos are owned by the scope they are created in and stop updating when
/// that scope is disposed; the last cached value stays readable.
pub struct Memo<T: 'static> {
    id: NodeId,
    cell: Rc<MemoCell<T>>,
}

impl<T: PartialEq + 'static> Memo<T> {
    /// Create a new memo with the given computation.
    pub fn new<F>(compute: F) -> Self
    where
        F: Fn() -> T + 'static,
    {
        Self::with_equality(compute, Equality::partial_eq())
    }
}

impl<T: 'static> Memo<T> {
    /// Create a new memo with a custom change comparator.
    ///
    /// # Panics
    ///
    /// Panics if the first run fails and no error boundary handles it.
    pub fn with_equality<F>(compute: F, equality: Equality<T>) -> Self
    where
        F: Fn() -> T + 'static,
    {
        let cell = Rc::new(MemoCell {
            value: RefCell::new(None),
            equality,
            compute: Box::new(compute),
        });

        let body_cell = cell.clone();
        let created = Runtime::with(|rt| {
            rt.create_computation(NodeKind::Memo, move |id| -> Body {
                Rc::new(move || {
                    let next = (body_cell.compute)();
                    if body_cell.replace(next) {
                        Runtime::with(|rt| rt.notify_observers(id));
                    }
                })
            })
        });

        match created {
            Ok(id) => Self { id, cell },
            Err(err) => raise(err),
        }
    }

    /// Get the memo's graph handle.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Borrow the current value, subscribing the running computation.
    ///
    /// # Panics
    ///
    /// Panics if the memo has no value because its first run failed.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        match self.try_with(f) {
            Ok(value) => value,
            Err(err) => raise(err),
        }
    }

    pub fn try_with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R, ReactiveError> {
        Runtime::with(|rt| {
            rt.refresh(self.id)?;
            rt.track(self.id);
            Ok::<_, ReactiveError>(())
        })?;
        let value = self.visible()?;
        Ok(f(&value))
    }

    /// Borrow the cached value without establishing a dependency.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let result = Runtime::with(|rt| rt.refresh(self.id)).and_then(|()| self.visible());
        match result {
            Ok(value) => f(&value),
            Err(err) => raise(err),
        }
    }

    /// Stop recomputing. The last value stays readable.
    pub fn dispose(&self) {
        let result = Runtime::with(|rt| rt.run_updates(|rt| rt.dispose_node(self.id)));
        if let Err(err) = result {
            raise(err);
        }
    }

    /// Current freshness, or `None` once disposed.
    pub fn state(&self) -> Option<NodeState> {
        Runtime::with(|rt| rt.graph.borrow().state(self.id))
    }

    /// Number of times the computation has run.
    pub fn run_count(&self) -> usize {
        Runtime::with(|rt| rt.graph.borrow().get(self.id).map_or(0, |node| node.runs))
    }

    /// Number of computations currently observing this memo.
    pub fn observer_count(&self) -> usize {
        Runtime::with(|rt| {
            rt.graph
                .borrow()
                .get(self.id)
                .map_or(0, |node| node.observers.len())
        })
    }

    /// Whether the memo has computed a value.
    pub fn has_value(&self) -> bool {
        self.cell.value.borrow().is_some()
    }

    /// The value this caller should see: the transition's shadow value when
    /// there is one, the committed value otherwise.
    fn visible(&self) -> Result<Rc<T>, ReactiveError> {
        match transition::memo_value(self.id, &*self.cell.compute) {
            Some(value) => Ok(value),
            None => self.cached(),
        }
    }

    fn cached(&self) -> Result<Rc<T>, ReactiveError> {
        self.cell
            .value
            .borrow()
            .clone()
            .ok_or(ReactiveError::Uninitialized(self.id))
    }
}

impl<T: Clone + 'static> Memo<T> {
    /// Get the current value.
    ///
    /// If the memo is stale it recomputes first. If called within a
    /// computation, this also registers the computation as an observer.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Like [`Memo::get`], returning an error instead of panicking.
    pub fn try_get(&self) -> Result<T, ReactiveError> {
        self.try_with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }
}

impl<T: 'static> Clone for Memo<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            cell: self.cell.clone(),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Memo<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Memo")
            .field("id", &self.id)
            .field("state", &self.state())
            .field("value", &self.cell.value.borrow())
            .finish()
    }
}

/// Create a memo that skips propagation when its result is unchanged.
pub fn create_memo<T, F>(compute: F) -> Memo<T>
where
    T: PartialEq + 'static,
    F: Fn() -> T + 'static,
{
    Memo::new(compute)
}

/// Create a memo with a custom change comparator.
pub fn create_memo_with_equality<T, F>(compute: F, equality: Equality<T>) -> Memo<T>
where
    T: 'static,
    F: Fn() -> T + 'static,
{
    Memo::with_equality(compute, equality)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{batch, create_effect, create_root, Signal};
    use std::cell::Cell;

    #[test]
    fn memo_computes_on_creation() {
        create_root(|_| {
            let count = Rc::new(Cell::new(0));
            let counter = count.clone();
            let memo = Memo::new(move || {
                counter.set(counter.get() + 1);
                42
            });

            assert_eq!(count.get(), 1);
            assert_eq!(memo.get(), 42);
            assert_eq!(memo.get(), 42);
            assert_eq!(count.get(), 1);
            assert_eq!(memo.run_count(), 1);
        });
    }

    #[test]
    fn memo_recomputes_when_a_source_changes() {
        create_root(|_| {
            let source = Signal::new(2);
            let input = source.clone();
            let doubled = Memo::new(move || input.get() * 2);

            source.set(5);
            assert_eq!(doubled.get(), 10);
            assert_eq!(doubled.state(), Some(NodeState::Clean));
        });
    }

    #[test]
    fn memo_is_fresh_when_read_inside_a_batch() {
        create_root(|_| {
            let source = Signal::new(1);
            let input = source.clone();
            let plus_one = Memo::new(move || input.get() + 1);

            batch(|| {
                source.set(10);
                assert_eq!(plus_one.state(), Some(NodeState::Stale));
                assert_eq!(plus_one.get(), 11);
            });
        });
    }

    #[test]
    fn unchanged_memo_value_shields_observers() {
        create_root(|_| {
            let source = Signal::new(3);
            let input = source.clone();
            let is_big = Memo::new(move || input.get() > 10);

            let runs = Rc::new(Cell::new(0));
            let counter = runs.clone();
            let observed = is_big.clone();
            create_effect(move || {
                observed.get();
                counter.set(counter.get() + 1);
            });

            source.set(4);
            source.set(5);
            assert_eq!(runs.get(), 1);

            source.set(11);
            assert_eq!(runs.get(), 2);
        });
    }

    #[test]
    fn failed_first_run_leaves_memo_uninitialized() {
        create_root(|owner| {
            let result = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                Memo::<i32>::new(|| panic!("no value"))
            }));
            assert!(result.is_err());
            assert!(!owner.is_disposed());
        });
    }

    #[test]
    fn disposed_memo_keeps_its_last_value() {
        create_root(|_| {
            let source = Signal::new(1);
            let input = source.clone();
            let memo = Memo::new(move || input.get());

            memo.dispose();
            source.set(2);

            assert_eq!(memo.state(), None);
            assert_eq!(memo.get(), 1);
            assert_eq!(memo.run_count(), 0);
        });
    }
}
