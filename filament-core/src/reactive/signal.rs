//! Signal Implementation
//!
//! A Signal is the fundamental reactive primitive. It holds a value and
//! tracks which computations depend on it.
//!
//! # How Signals Work
//!
//! 1. When a signal is read within a computation (memo/effect), the runtime
//!    subscribes that computation to the signal.
//!
//! 2. When a signal is written with a value that differs from the current one
//!    (according to its [`Equality`]), all observers are invalidated and the
//!    runtime flushes.
//!
//! 3. A write made inside a transition is kept aside until the transition
//!    commits; only reads inside the transition see it.
//!
//! # Memory Layout
//!
//! Each signal consists of:
//! - A graph node (observer set, owner link)
//! - A shared cell holding the value behind an `Rc`, and the comparator
//!
//! The graph node is released when the last handle to the cell is dropped.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::context::ReactiveContext;
use super::runtime::{raise, Runtime};
use super::transition;
use crate::error::ReactiveError;
use crate::graph::{NodeId, NodeKind};

/// Decides whether a write actually changes a value.
///
/// Writes whose new value is equal to the current one are ignored and do not
/// notify anybody.
pub struct Equality<T> {
    compare: Option<Rc<dyn Fn(&T, &T) -> bool>>,
}

impl<T: PartialEq + 'static> Equality<T> {
    /// Compare with `PartialEq`. The default for [`Signal::new`].
    pub fn partial_eq() -> Self {
        Self {
            compare: Some(Rc::new(|a: &T, b: &T| a == b)),
        }
    }
}

impl<T> Equality<T> {
    /// Treat every write as a change.
    pub fn never() -> Self {
        Self { compare: None }
    }

    /// Compare with a custom function returning `true` when equal.
    pub fn custom<F>(compare: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        Self {
            compare: Some(Rc::new(compare)),
        }
    }

    pub(crate) fn equals(&self, current: &T, next: &T) -> bool {
        self.compare.as_ref().is_some_and(|compare| compare(current, next))
    }
}

impl<T> Clone for Equality<T> {
    fn clone(&self) -> Self {
        Self {
            compare: self.compare.clone(),
        }
    }
}

impl<T> fmt::Debug for Equality<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.compare {
            Some(_) => f.write_str("Equality::Compare"),
            None => f.write_str("Equality::Never"),
        }
    }
}

/// Value storage shared by every handle to one signal.
pub(crate) struct SignalCell<T: 'static> {
    id: NodeId,
    value: RefCell<Rc<T>>,
    equality: Equality<T>,
}

impl<T: 'static> SignalCell<T> {
    /// The committed value.
    pub(crate) fn current(&self) -> Rc<T> {
        self.value.borrow().clone()
    }

    pub(crate) fn equality(&self) -> &Equality<T> {
        &self.equality
    }

    /// Store `next` unless it equals the committed value. Returns whether the
    /// value changed.
    pub(crate) fn replace(&self, next: Rc<T>) -> bool {
        let current = self.current();
        if self.equality.equals(&current, &next) {
            return false;
        }
        *self.value.borrow_mut() = next;
        true
    }
}

impl<T: 'static> Drop for SignalCell<T> {
    fn drop(&mut self) {
        Runtime::release(self.id);
    }
}

/// A reactive signal holding a value of type `T`.
///
/// Cloning a signal yields another handle to the same value.
///
/// # Example
///
/// ```rust
/// use filament_core::reactive::Signal;
///
/// let count = Signal::new(0);
///
/// // Read the value
/// assert_eq!(count.get(), 0);
///
/// // Update the value (notifies observers)
/// count.set(5);
/// assert_eq!(count.get(), 5);
/// ```
pub struct Signal<T: 'static> {
    id: NodeId,
    cell: Rc<SignalCell<T>>,
}

impl<T: PartialEq + 'static> Signal<T> {
    /// Create a new signal that ignores writes equal to its current value.
    pub fn new(value: T) -> Self {
        Self::with_equality(value, Equality::partial_eq())
    }
}

impl<T: 'static> Signal<T> {
    /// Create a new signal with a custom change comparator.
    pub fn with_equality(value: T, equality: Equality<T>) -> Self {
        let id = Runtime::with(|rt| rt.create_node(NodeKind::Signal));
        Self {
            id,
            cell: Rc::new(SignalCell {
                id,
                value: RefCell::new(Rc::new(value)),
                equality,
            }),
        }
    }

    /// Get the signal's graph handle.
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// Borrow the current value, subscribing the running computation.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        Runtime::with(|rt| rt.track(self.id));
        let value = self.read();
        f(&value)
    }

    /// Borrow the current value without establishing a dependency.
    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.read();
        f(&value)
    }

    /// Set a new value and propagate the change.
    ///
    /// # Panics
    ///
    /// Panics if a computation run by the resulting flush fails and no error
    /// boundary handles it. Use [`Signal::try_set`] to get the error instead.
    pub fn set(&self, value: T) {
        if let Err(err) = self.try_set(value) {
            raise(err);
        }
    }

    /// Set a new value, returning any failure the resulting flush left
    /// unhandled.
    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        let value = if ReactiveContext::in_transition() {
            match transition::defer_write(self.id, &self.cell, value) {
                Ok(()) => return Ok(()),
                Err(value) => value,
            }
        } else {
            value
        };

        if !self.cell.replace(Rc::new(value)) {
            return Ok(());
        }
        Runtime::with(|rt| rt.write(self.id))
    }

    /// Update the value using a function of the current one.
    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        if let Err(err) = self.try_update(f) {
            raise(err);
        }
    }

    pub fn try_update(&self, f: impl FnOnce(&T) -> T) -> Result<(), ReactiveError> {
        let next = f(&self.read());
        self.try_set(next)
    }

    /// Split into a read-only and a write-only handle.
    pub fn split(self) -> (ReadSignal<T>, WriteSignal<T>) {
        (ReadSignal { inner: self.clone() }, WriteSignal { inner: self })
    }

    /// Number of computations currently observing this signal.
    pub fn observer_count(&self) -> usize {
        Runtime::with(|rt| {
            rt.graph
                .borrow()
                .get(self.id)
                .map_or(0, |node| node.observers.len())
        })
    }

    /// Whether the signal's owner has been disposed. Disposed signals keep
    /// their value but no longer track or notify.
    pub fn is_disposed(&self) -> bool {
        Runtime::with(|rt| !rt.graph.borrow().contains(self.id))
    }

    /// The value visible to the caller: the transition's pending value inside
    /// a transition, the committed value everywhere else.
    fn read(&self) -> Rc<T> {
        transition::pending_value::<T>(self.id).unwrap_or_else(|| self.cell.current())
    }
}

impl<T: Clone + 'static> Signal<T> {
    /// Get the current value.
    ///
    /// If called within a computation, this also registers the computation
    /// as an observer.
    pub fn get(&self) -> T {
        self.with(T::clone)
    }

    /// Get the current value without tracking dependencies.
    pub fn get_untracked(&self) -> T {
        self.with_untracked(T::clone)
    }
}

impl<T: 'static> Clone for Signal<T> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            cell: self.cell.clone(),
        }
    }
}

impl<T: fmt::Debug + 'static> fmt::Debug for Signal<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signal")
            .field("id", &self.id)
            .field("value", &self.cell.current())
            .field("observers", &self.observer_count())
            .finish()
    }
}

/// Read half of a signal.
pub struct ReadSignal<T: 'static> {
    inner: Signal<T>,
}

impl<T: 'static> ReadSignal<T> {
    pub fn id(&self) -> NodeId {
        self.inner.id()
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.with(f)
    }

    pub fn with_untracked<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.with_untracked(f)
    }
}

impl<T: Clone + 'static> ReadSignal<T> {
    pub fn get(&self) -> T {
        self.inner.get()
    }

    pub fn get_untracked(&self) -> T {
        self.inner.get_untracked()
    }
}

impl<T: 'static> Clone for ReadSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Write half of a signal.
pub struct WriteSignal<T: 'static> {
    inner: Signal<T>,
}

impl<T: 'static> WriteSignal<T> {
    pub fn id(&self) -> NodeId {
        self.inner.id()
    }

    pub fn set(&self, value: T) {
        self.inner.set(value)
    }

    pub fn try_set(&self, value: T) -> Result<(), ReactiveError> {
        self.inner.try_set(value)
    }

    pub fn update(&self, f: impl FnOnce(&T) -> T) {
        self.inner.update(f)
    }

    pub fn try_update(&self, f: impl FnOnce(&T) -> T) -> Result<(), ReactiveError> {
        self.inner.try_update(f)
    }
}

impl<T: 'static> Clone for WriteSignal<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Create a signal and return its read and write halves.
pub fn create_signal<T: PartialEq + 'static>(value: T) -> (ReadSignal<T>, WriteSignal<T>) {
    Signal::new(value).split()
}
