//! Graph Nodes
//!
//! This module defines the nodes that make up a root's path graph. One node
//! exists per distinct path into the value tree. Nodes are created lazily the
//! first time a path is accessed and live for as long as their root does.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::reactive::{Listener, ListenerId};

/// Delimiter used when a node's path is rendered as a single string.
pub const PATH_DELIMITER: char = '\u{FEFF}';

/// Path string of every root node.
pub const ROOT_PATH: &str = "_";

/// Unique identifier for a node.
///
/// Ids are process-wide so that tracking sets can mix nodes from several
/// roots without collisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

/// The shape of the value a node currently resolves to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// A JSON object. Children are addressed by field name.
    Object,

    /// A JSON array. Children are addressed by index, or by element identity.
    Array,

    /// Anything else, including `null`.
    Primitive,
}

impl NodeKind {
    /// Classify a value.
    pub fn of(value: &Value) -> Self {
        match value {
            Value::Object(_) => NodeKind::Object,
            Value::Array(_) => NodeKind::Array,
            _ => NodeKind::Primitive,
        }
    }
}

/// One segment of a path into the value tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathKey {
    /// A literal array position.
    Index(usize),

    /// An object field. On arrays a field is matched against element
    /// identities first and parsed as an index second.
    Field(String),
}

impl PathKey {
    /// The literal index this key denotes, if any.
    pub fn as_index(&self) -> Option<usize> {
        match self {
            PathKey::Index(index) => Some(*index),
            PathKey::Field(field) => field.parse().ok(),
        }
    }
}

impl fmt::Display for PathKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathKey::Index(index) => write!(f, "{}", index),
            PathKey::Field(field) => f.write_str(field),
        }
    }
}

impl From<usize> for PathKey {
    fn from(index: usize) -> Self {
        PathKey::Index(index)
    }
}

impl From<&str> for PathKey {
    fn from(field: &str) -> Self {
        PathKey::Field(field.to_owned())
    }
}

impl From<String> for PathKey {
    fn from(field: String) -> Self {
        PathKey::Field(field)
    }
}

impl From<&String> for PathKey {
    fn from(field: &String) -> Self {
        PathKey::Field(field.clone())
    }
}

impl From<&PathKey> for PathKey {
    fn from(key: &PathKey) -> Self {
        key.clone()
    }
}

/// Arena index of a node inside its root's graph.
pub(crate) type NodeIndex = usize;

/// A node in the path graph.
pub(crate) struct NodeData {
    /// Unique identifier for this node.
    pub(crate) id: NodeId,

    /// The parent node. `None` only for the root.
    pub(crate) parent: Option<NodeIndex>,

    /// The last path segment, relative to the parent.
    ///
    /// Array moves rewrite this in place so that the node follows its element.
    pub(crate) key: Option<PathKey>,

    /// Children created so far, by key.
    pub(crate) children: HashMap<PathKey, NodeIndex>,

    /// Registered listeners, created on first subscription.
    pub(crate) listeners: Option<IndexMap<ListenerId, Arc<Listener>>>,

    /// Identity of each element to its index, recorded when this node's
    /// array value was last diffed.
    pub(crate) array_ids: Option<HashMap<String, usize>>,
}

impl NodeData {
    pub(crate) fn root() -> Self {
        Self::new(None, None)
    }

    pub(crate) fn new(parent: Option<NodeIndex>, key: Option<PathKey>) -> Self {
        Self {
            id: NodeId::new(),
            parent,
            key,
            children: HashMap::new(),
            listeners: None,
            array_ids: None,
        }
    }
}

/// One step of a resolved path: the key, plus the identity table of the
/// container it is applied to.
pub(crate) struct Segment<'a> {
    pub(crate) key: &'a PathKey,
    pub(crate) ids: Option<&'a HashMap<String, usize>>,
}
