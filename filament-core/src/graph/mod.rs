//! Dependency Graph
//!
//! This module implements the bipartite graph that tracks read relationships
//! between sources (signals, memos) and computations (memos, effects), plus
//! the ownership tree that decides when nodes are disposed.
//!
//! # Overview
//!
//! - Nodes live in a generational arena and are referred to by [`NodeId`].
//! - Each source keeps an ordered set of observers; each computation keeps
//!   the list of sources it read during its latest run. Both indices are
//!   rebuilt incrementally on every run by diffing old against new sources.
//! - Owners keep their children in creation order. A child only refers back
//!   to its owner by handle, so the tree never forms reference cycles.
//!
//! The update order itself is decided by the queue in [`scheduler`].

mod arena;
mod node;
pub mod scheduler;

pub(crate) use arena::Graph;
pub(crate) use node::{Body, Cleanup, Node};
pub use node::{NodeId, NodeKind, NodeState};
pub(crate) use scheduler::UpdateQueue;
pub use scheduler::FlushPhase;
