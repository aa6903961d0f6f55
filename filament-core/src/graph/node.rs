//! Graph Nodes
//!
//! This module defines the node types that live in the dependency graph.
//! A single node type covers owners (roots, boundaries), sources (signals)
//! and computations (memos, effects); the [`NodeKind`] says which roles a
//! node plays.

use std::rc::Rc;

use indexmap::IndexSet;
use slotmap::new_key_type;
use smallvec::SmallVec;

use crate::error::ReactiveError;

new_key_type! {
    /// Stable handle to a node in the dependency graph.
    ///
    /// Handles are generational: once a node is disposed its handle never
    /// resolves again, even if the slot is reused.
    pub struct NodeId;
}

/// The kind of node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A detached ownership scope created by `create_root`.
    /// Not disposed with the scope that was current when it was created.
    Root,

    /// A plain ownership scope nested in its parent, such as an error boundary.
    Scope,

    /// A source node (signal). Has observers, never sources.
    Signal,

    /// A derived node (memo). Both a source and a computation; caches its value.
    Memo,

    /// An effect node. A computation with no observers of its own.
    Effect,
}

impl NodeKind {
    /// Whether nodes of this kind re-run a body when their sources change.
    pub fn is_computation(self) -> bool {
        matches!(self, NodeKind::Memo | NodeKind::Effect)
    }

    /// Whether nodes of this kind can be read and therefore observed.
    pub fn is_source(self) -> bool {
        matches!(self, NodeKind::Signal | NodeKind::Memo)
    }
}

/// Freshness of a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Up to date.
    Clean,

    /// An upstream memo might have changed. Resolved by updating the
    /// upstream memos first; if none of them changed the node is clean again.
    MaybeStale,

    /// A direct source changed. The node must re-run.
    Stale,

    /// Invalidated by a write deferred into the active transition. Resolved
    /// when the transition commits.
    Pending,
}

impl NodeState {
    /// Whether a node in this state can still be invalidated by a new write
    /// (and therefore needs to be queued when it is).
    pub(crate) fn accepts_invalidation(self) -> bool {
        matches!(self, NodeState::Clean | NodeState::Pending)
    }
}

/// A cleanup callback registered on an owner.
pub(crate) type Cleanup = Box<dyn FnOnce()>;

/// The type-erased body of a computation.
pub(crate) type Body = Rc<dyn Fn()>;

/// An error boundary handler.
pub(crate) type ErrorHandler = Rc<dyn Fn(ReactiveError)>;

/// A node in the dependency graph.
pub(crate) struct Node {
    /// What kind of node this is.
    pub kind: NodeKind,

    /// Current freshness. Only meaningful for computations.
    pub state: NodeState,

    /// The owner this node belongs to. A weak back-reference: the owner holds
    /// this node in its `children`, never the other way around.
    pub owner: Option<NodeId>,

    /// Nodes created while this node was the current owner, in creation order.
    pub children: Vec<NodeId>,

    /// Callbacks run before every re-run and on disposal.
    pub cleanups: Vec<Cleanup>,

    /// Callbacks run on final disposal only (external source bridges).
    pub disposers: Vec<Cleanup>,

    /// Computations that read this node during their latest run.
    pub observers: IndexSet<NodeId>,

    /// Sources read during the latest run, in first-read order.
    pub sources: SmallVec<[NodeId; 4]>,

    /// The computation body, possibly wrapped by external source factories.
    pub body: Option<Body>,

    /// Set on error boundaries.
    pub error_handler: Option<ErrorHandler>,

    /// Hidden source fired by external sources bridged into this computation.
    pub trigger: Option<NodeId>,

    /// Number of completed body runs.
    pub runs: usize,
}

impl Node {
    /// Create a new node with the given kind.
    pub fn new(kind: NodeKind, owner: Option<NodeId>) -> Self {
        Self {
            kind,
            state: NodeState::Clean,
            owner,
            children: Vec::new(),
            cleanups: Vec::new(),
            disposers: Vec::new(),
            observers: IndexSet::new(),
            sources: SmallVec::new(),
            body: None,
            error_handler: None,
            trigger: None,
            runs: 0,
        }
    }

    /// Mark the node as clean.
    pub fn mark_clean(&mut self) {
        self.state = NodeState::Clean;
    }
}

impl std::fmt::Debug for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Node")
            .field("kind", &self.kind)
            .field("state", &self.state)
            .field("owner", &self.owner)
            .field("children", &self.children.len())
            .field("observers", &self.observers.len())
            .field("sources", &self.sources.len())
            .field("runs", &self.runs)
            .finish()
    }
}
