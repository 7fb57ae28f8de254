//! Node Store
//!
//! The store is the arena that owns every node of one root. Nodes refer to
//! each other by arena index: a child knows its parent's index, a parent keeps
//! a table from key to child index. Nothing is ever removed; the whole arena
//! is released together with its root.
//!
//! # Moves
//!
//! When the structural diff detects that an array element changed position,
//! the node that was following the element is re-keyed instead of being
//! replaced. Subscriptions on that node therefore keep following the element
//! rather than the position. See [`NodeStore::relocate`].

use std::collections::HashMap;
use std::sync::Arc;

use tracing::trace;

use super::node::{NodeData, NodeId, NodeIndex, PathKey, Segment, ROOT_PATH};
use crate::reactive::{Listener, ListenerId};

/// Arena of nodes for one root.
pub(crate) struct NodeStore {
    nodes: Vec<NodeData>,
}

impl NodeStore {
    /// Index of the root node.
    pub(crate) const ROOT: NodeIndex = 0;

    /// Create a store holding only the root node.
    pub(crate) fn new() -> Self {
        Self {
            nodes: vec![NodeData::root()],
        }
    }

    pub(crate) fn node(&self, index: NodeIndex) -> &NodeData {
        &self.nodes[index]
    }

    pub(crate) fn node_mut(&mut self, index: NodeIndex) -> &mut NodeData {
        &mut self.nodes[index]
    }

    pub(crate) fn id(&self, index: NodeIndex) -> NodeId {
        self.nodes[index].id
    }

    /// Return the child of `parent` at `key`, creating it if absent.
    pub(crate) fn child(&mut self, parent: NodeIndex, key: &PathKey) -> NodeIndex {
        if let Some(&child) = self.nodes[parent].children.get(key) {
            return child;
        }

        let index = self.nodes.len();
        self.nodes.push(NodeData::new(Some(parent), Some(key.clone())));
        self.nodes[parent].children.insert(key.clone(), index);
        trace!(parent, %key, index, "created node");
        index
    }

    /// Return the child of `parent` at `key` without creating it.
    pub(crate) fn find_child(&self, parent: NodeIndex, key: &PathKey) -> Option<NodeIndex> {
        self.nodes[parent].children.get(key).copied()
    }

    /// The parent of a node and the node's key within it.
    pub(crate) fn parent(&self, index: NodeIndex) -> Option<(NodeIndex, &PathKey)> {
        let node = &self.nodes[index];
        match (node.parent, node.key.as_ref()) {
            (Some(parent), Some(key)) => Some((parent, key)),
            _ => None,
        }
    }

    /// The path from the root down to `index`.
    pub(crate) fn segments(&self, index: NodeIndex) -> Vec<Segment<'_>> {
        let mut segments = Vec::new();
        let mut current = index;
        while let Some((parent, key)) = self.parent(current) {
            segments.push(Segment {
                key,
                ids: self.nodes[parent].array_ids.as_ref(),
            });
            current = parent;
        }
        segments.reverse();
        segments
    }

    /// Render the path of `index`, starting with the root marker.
    pub(crate) fn path_string(&self, index: NodeIndex, delimiter: &str) -> String {
        let mut path = String::from(ROOT_PATH);
        for segment in self.segments(index) {
            path.push_str(delimiter);
            path.push_str(&segment.key.to_string());
        }
        path
    }

    /// Move nodes to new positions within the array node `parent`.
    ///
    /// Each entry is `(node, from, to)`. A slot that was vacated and not
    /// refilled is cleared, so the next access at that position creates a
    /// fresh node.
    pub(crate) fn relocate(&mut self, parent: NodeIndex, moves: &[(NodeIndex, usize, usize)]) {
        let children = &mut self.nodes[parent].children;
        for &(node, from, _) in moves {
            let slot = PathKey::Index(from);
            if children.get(&slot) == Some(&node) {
                children.remove(&slot);
            }
        }
        for &(node, _, to) in moves {
            children.insert(PathKey::Index(to), node);
        }
        for &(node, from, to) in moves {
            trace!(parent, node, from, to, "relocated node");
            self.nodes[node].key = Some(PathKey::Index(to));
        }
    }

    pub(crate) fn has_listeners(&self, index: NodeIndex) -> bool {
        self.nodes[index]
            .listeners
            .as_ref()
            .is_some_and(|listeners| !listeners.is_empty())
    }

    pub(crate) fn add_listener(&mut self, index: NodeIndex, listener: Arc<Listener>) {
        self.nodes[index]
            .listeners
            .get_or_insert_with(Default::default)
            .insert(listener.id(), listener);
    }

    pub(crate) fn remove_listener(&mut self, index: NodeIndex, id: ListenerId) {
        if let Some(listeners) = self.nodes[index].listeners.as_mut() {
            listeners.shift_remove(&id);
        }
    }

    /// Listeners of `index` that should fire for a change at `level`.
    pub(crate) fn firing_listeners(
        &self,
        index: NodeIndex,
        level: i32,
        optimized_change: bool,
    ) -> Vec<Arc<Listener>> {
        self.nodes[index]
            .listeners
            .iter()
            .flat_map(|listeners| listeners.values())
            .filter(|listener| listener.mode().fires(level, optimized_change))
            .cloned()
            .collect()
    }

    pub(crate) fn set_array_ids(&mut self, index: NodeIndex, ids: Option<HashMap<String, usize>>) {
        self.nodes[index].array_ids = ids;
    }

    /// Get the total number of nodes in the store.
    pub(crate) fn node_count(&self) -> usize {
        self.nodes.len()
    }
}

impl Default for NodeStore {
    fn default() -> Self {
        Self::new()
    }
}
