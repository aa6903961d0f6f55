//! Batching
//!
//! Writes made inside [`batch`] are collected and propagated in a single
//! flush when the outermost batch returns. Reads inside the batch still see
//! every write immediately, and memos read mid-batch are brought up to date
//! on demand.

use super::runtime::{raise, Runtime};
use crate::error::ReactiveError;

/// Run `f` as one update and flush once at the end.
///
/// # Panics
///
/// Panics if a computation run by the flush fails and no error boundary
/// handles it.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    match try_batch(f) {
        Ok(value) => value,
        Err(err) => raise(err),
    }
}

/// Like [`batch`], returning unhandled failures instead of panicking.
///
/// A nested batch always returns `Ok`; failures surface from the outermost
/// one.
pub fn try_batch<R>(f: impl FnOnce() -> R) -> Result<R, ReactiveError> {
    Runtime::with(|rt| rt.run_updates(|_| f()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{create_effect, create_root, Signal};
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn batched_writes_flush_once() {
        create_root(|_| {
            let first = Signal::new("Ada");
            let last = Signal::new("Lovelace");
            let seen = Rc::new(RefCell::new(Vec::new()));

            let (a, b, log) = (first.clone(), last.clone(), seen.clone());
            create_effect(move || log.borrow_mut().push(format!("{} {}", a.get(), b.get())));

            batch(|| {
                first.set("Grace");
                last.set("Hopper");
                assert_eq!(first.get(), "Grace");
            });

            assert_eq!(*seen.borrow(), vec!["Ada Lovelace", "Grace Hopper"]);
        });
    }

    #[test]
    fn nested_batches_flush_at_the_outermost() {
        create_root(|_| {
            let signal = Signal::new(0);
            let seen = Rc::new(RefCell::new(Vec::new()));

            let (source, log) = (signal.clone(), seen.clone());
            create_effect(move || log.borrow_mut().push(source.get()));

            batch(|| {
                batch(|| signal.set(1));
                assert_eq!(*seen.borrow(), vec![0]);
                signal.set(2);
            });

            assert_eq!(*seen.borrow(), vec![0, 2]);
        });
    }

    #[test]
    fn try_batch_reports_unhandled_failures() {
        create_root(|_| {
            let signal = Signal::new(0);
            let source = signal.clone();
            create_effect(move || {
                if source.get() == 1 {
                    panic!("bad value");
                }
            });

            let result = try_batch(|| signal.set(1));
            match result {
                Err(ReactiveError::Panicked { message, .. }) => assert_eq!(message, "bad value"),
                other => panic!("expected a panic error, got {other:?}"),
            }
        });
    }
}
