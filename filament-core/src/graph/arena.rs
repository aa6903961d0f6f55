//! Node Arena
//!
//! Owns every node of the dependency graph and maintains both edge indices:
//! `observers` on sources and `sources` on computations. Subscriptions are
//! added as reads happen; the source list is swapped in after each run and
//! the difference is unsubscribed, so the indices agree between runs.

use slotmap::SlotMap;
use smallvec::SmallVec;

use super::node::{Node, NodeId, NodeKind, NodeState};

/// The dependency graph.
#[derive(Debug, Default)]
pub(crate) struct Graph {
    /// All live nodes, indexed by handle.
    nodes: SlotMap<NodeId, Node>,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: SlotMap::with_key(),
        }
    }

    /// Add a node and attach it to its owner's children.
    ///
    /// Roots keep their owner as a lookup parent (for error boundaries) but
    /// are not disposed with it, so they are not attached.
    pub fn add_node(&mut self, node: Node) -> NodeId {
        let owner = node.owner;
        let attach = node.kind != NodeKind::Root;
        let id = self.nodes.insert(node);
        if attach {
            if let Some(parent) = owner.and_then(|owner| self.nodes.get_mut(owner)) {
                parent.children.push(id);
            }
        }
        id
    }

    /// Remove a node from the arena.
    ///
    /// Also removes all edges involving this node and detaches it from its
    /// owner. Children must already have been disposed.
    pub fn remove_node(&mut self, id: NodeId) -> Option<Node> {
        let node = self.nodes.remove(id)?;

        for &source in &node.sources {
            if let Some(source) = self.nodes.get_mut(source) {
                source.observers.shift_remove(&id);
            }
        }

        for &observer in &node.observers {
            if let Some(observer) = self.nodes.get_mut(observer) {
                observer.sources.retain(|source| *source != id);
            }
        }

        if let Some(parent) = node.owner.and_then(|owner| self.nodes.get_mut(owner)) {
            parent.children.retain(|child| *child != id);
        }

        Some(node)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains_key(id)
    }

    /// Get a reference to a node.
    pub fn get(&self, id: NodeId) -> Option<&Node> {
        self.nodes.get(id)
    }

    /// Get a mutable reference to a node.
    pub fn get_mut(&mut self, id: NodeId) -> Option<&mut Node> {
        self.nodes.get_mut(id)
    }

    pub fn kind(&self, id: NodeId) -> Option<NodeKind> {
        self.nodes.get(id).map(|node| node.kind)
    }

    pub fn state(&self, id: NodeId) -> Option<NodeState> {
        self.nodes.get(id).map(|node| node.state)
    }

    /// Subscribe `observer` to `source`.
    ///
    /// Only the observer index is touched here; the observer's source list is
    /// rebuilt in one go by [`Graph::replace_sources`] once its run finishes.
    /// Returns `false` if either node is gone.
    pub fn subscribe(&mut self, source: NodeId, observer: NodeId) -> bool {
        if !self.nodes.contains_key(observer) {
            return false;
        }
        match self.nodes.get_mut(source) {
            Some(node) => {
                node.observers.insert(observer);
                true
            }
            None => false,
        }
    }

    /// Add a complete edge in both indices.
    #[cfg(test)]
    pub fn add_edge(&mut self, source: NodeId, observer: NodeId) -> bool {
        if !self.subscribe(source, observer) {
            return false;
        }
        if let Some(node) = self.nodes.get_mut(observer) {
            if !node.sources.contains(&source) {
                node.sources.push(source);
            }
        }
        true
    }

    /// Replace `observer`'s source list with `next`, unsubscribing it from
    /// every previous source that is not in `next`.
    pub fn replace_sources(&mut self, observer: NodeId, next: SmallVec<[NodeId; 4]>) {
        let Some(node) = self.nodes.get_mut(observer) else {
            return;
        };
        let previous = std::mem::replace(&mut node.sources, next);

        for stale in previous {
            let still_read = self
                .nodes
                .get(observer)
                .is_some_and(|node| node.sources.contains(&stale));
            if still_read {
                continue;
            }
            if let Some(source) = self.nodes.get_mut(stale) {
                source.observers.shift_remove(&observer);
            }
        }
    }

    /// Remove `observer` from the observer sets of `sources`.
    pub fn unsubscribe_all(&mut self, observer: NodeId, sources: &[NodeId]) {
        for &source in sources {
            if let Some(source) = self.nodes.get_mut(source) {
                source.observers.shift_remove(&observer);
            }
        }
    }

    /// Snapshot of a node's observers, in subscription order.
    pub fn observers(&self, id: NodeId) -> SmallVec<[NodeId; 8]> {
        self.nodes
            .get(id)
            .map(|node| node.observers.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Snapshot of a node's sources.
    pub fn sources(&self, id: NodeId) -> SmallVec<[NodeId; 4]> {
        self.nodes
            .get(id)
            .map(|node| node.sources.clone())
            .unwrap_or_default()
    }

    /// Walk the owner chain starting at `id` (inclusive).
    pub fn owner_chain(&self, id: NodeId) -> impl Iterator<Item = NodeId> + '_ {
        std::iter::successors(Some(id), move |current| {
            self.nodes.get(*current).and_then(|node| node.owner)
        })
        .filter(move |current| self.nodes.contains_key(*current))
    }

    /// Get the total number of nodes in the graph.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }
}
