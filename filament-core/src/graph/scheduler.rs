//! Update Scheduler
//!
//! The scheduler determines the order in which invalidated computations are
//! updated within a flush.
//!
//! # Algorithm
//!
//! 1. A write marks the direct observers of the written source `Stale` and
//!    everything transitively below an invalidated memo `MaybeStale`.
//! 2. Every newly invalidated node is queued once: memos in one queue,
//!    effects in another, both in insertion order.
//! 3. The flush drains the memo queue completely before taking a single
//!    effect; after every effect it drains memos again.
//! 4. Before a node runs, its upstream memos are brought up to date first
//!    (pull), so a node never observes a half-updated chain and runs at most
//!    once per invalidation.
//!
//! This "push-pull" approach keeps updates glitch-free without a global
//! topological sort.

use indexmap::IndexSet;

use super::node::{NodeId, NodeKind};

/// Phase of the update cycle.
///
/// `Idle -> Collecting -> Flushing -> Idle`. Writes made while `Collecting`
/// or `Flushing` only append to the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FlushPhase {
    /// No update in progress.
    #[default]
    Idle,

    /// Writes are being collected (inside a batch or a write call).
    Collecting,

    /// Queued computations are being run.
    Flushing,
}

/// Deduplicating two-phase queue of invalidated computations.
#[derive(Debug, Default)]
pub(crate) struct UpdateQueue {
    memos: IndexSet<NodeId>,
    effects: IndexSet<NodeId>,
}

impl UpdateQueue {
    /// Create a new empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a computation. A node already queued keeps its position.
    pub fn push(&mut self, id: NodeId, kind: NodeKind) {
        match kind {
            NodeKind::Memo => {
                self.memos.insert(id);
            }
            NodeKind::Effect => {
                self.effects.insert(id);
            }
            NodeKind::Root | NodeKind::Scope | NodeKind::Signal => {}
        }
    }

    /// Take the oldest queued memo.
    pub fn pop_memo(&mut self) -> Option<NodeId> {
        self.memos.shift_remove_index(0)
    }

    /// Take the oldest queued effect.
    pub fn pop_effect(&mut self) -> Option<NodeId> {
        self.effects.shift_remove_index(0)
    }

    /// Drop a node from the queue (it was disposed).
    pub fn remove(&mut self, id: NodeId) {
        self.memos.shift_remove(&id);
        self.effects.shift_remove(&id);
    }

    /// Empty the queue, returning everything that was still queued.
    pub fn drain(&mut self) -> Vec<NodeId> {
        self.memos.drain(..).chain(self.effects.drain(..)).collect()
    }

    #[cfg(test)]
    pub fn contains(&self, id: NodeId) -> bool {
        self.memos.contains(&id) || self.effects.contains(&id)
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.memos.is_empty() && self.effects.is_empty()
    }

    pub fn len(&self) -> usize {
        self.memos.len() + self.effects.len()
    }
}
