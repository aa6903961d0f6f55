//! Filament Core
//!
//! This crate provides a fine-grained reactive dependency engine. It
//! implements:
//!
//! - Reactive primitives (signals, memos, effects)
//! - An ownership tree that scopes the lifetime of computations
//! - Glitch-free, batched propagation of changes
//! - Transitions: deferred, atomic groups of writes
//! - A bridge for foreign reactive systems to join dependency tracking
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `reactive`: Public primitives and the per-thread runtime
//! - `graph`: Node arena, edges and the update queue
//! - `schedule`: The host capability used to defer transition work
//! - `config`: Runtime tunables
//! - `error`: Failure reporting
//!
//! Each thread has its own runtime. Handles are `!Send`.
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use filament_core::reactive::{create_effect, create_memo, create_root, Signal};
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//!
//! create_root(|owner| {
//!     // Create a signal
//!     let count = Signal::new(1);
//!
//!     // Create a derived value
//!     let source = count.clone();
//!     let doubled = create_memo(move || source.get() * 2);
//!
//!     // Create an effect
//!     let (count_in, sink) = (count.clone(), log.clone());
//!     create_effect(move || sink.borrow_mut().push((count_in.get(), doubled.get())));
//!
//!     // Update the signal; the effect runs once with consistent values
//!     count.set(5);
//!     owner.dispose();
//! });
//!
//! assert_eq!(*log.borrow(), vec![(1, 2), (5, 10)]);
//! ```

pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod schedule;

pub use config::{configure, RuntimeConfig};
pub use error::ReactiveError;
pub use graph::{NodeId, NodeState};
