//! Reactive Primitives
//!
//! This module implements the core reactive system: signals, memos, effects,
//! ownership, batching, transitions and the bridge to external sources.
//!
//! # Concepts
//!
//! ## Signals
//!
//! A Signal is a container for mutable state. When a signal's value is read
//! within a computation (a memo or effect), the signal automatically
//! registers that computation as an observer. When the value changes, all
//! observers are invalidated.
//!
//! ## Memos
//!
//! A Memo is a derived value that caches its result. It re-evaluates only
//! when one of its dependencies changes, and only notifies its own observers
//! when the result actually differs.
//!
//! ## Effects
//!
//! An Effect is a side-effecting computation that runs whenever its
//! dependencies change. Effects synchronize reactive state with the outside
//! world.
//!
//! ## Owners
//!
//! Every node belongs to the owner that was current when it was created.
//! Disposing an owner disposes everything below it, and computations dispose
//! what they created before each re-run.
//!
//! # Implementation Notes
//!
//! The reactive system uses a thread-local context stack to detect
//! dependencies automatically. When a source is read, we check whether a
//! computation is running and, if so, register the dependency.
//!
//! Propagation is push-pull: writes push invalidation marks through the
//! graph, and computations pull upstream memos up to date before running.
//! No computation ever observes an inconsistent mix of old and new values.

mod batch;
mod context;
mod effect;
mod external;
mod memo;
mod owner;
mod runtime;
mod signal;
mod transition;

pub use batch::{batch, try_batch};
pub use effect::{create_effect, Effect};
pub use external::{enable_external_source, TrackFn, Trigger};
pub use memo::{create_memo, create_memo_with_equality, Memo};
pub use owner::{catch_error, create_root, on_cleanup, untrack, Owner};
pub use runtime::{node_count, node_state};
pub use signal::{create_signal, Equality, ReadSignal, Signal, WriteSignal};
pub use transition::{is_transition_pending, start_transition};

pub(crate) use runtime::Runtime;
