//! Path Graph
//!
//! This module implements the graph of nodes that address a root's value tree.
//!
//! # Overview
//!
//! Every distinct path into the value gets exactly one node. A node has a
//! stable [`NodeId`], a parent (the root is its own sentinel parent) and a key
//! relative to that parent. Nodes hold no values: a node's value is found by
//! walking the root value along the node's path each time it is needed, which
//! keeps the value tree the single source of truth.
//!
//! # Design Decisions
//!
//! 1. Nodes live in a per-root arena and refer to each other by index. A node
//!    never owns its parent, and dropping the root releases all of its nodes.
//!
//! 2. Children are looked up through their parent's key table rather than a
//!    global path-string map, so re-keying a moved array element does not
//!    leave stale paths for its descendants.
//!
//! 3. Array containers keep an identity table (`id`, `_id` or `__id` to
//!    index) recorded at diff time, so elements can be addressed by identity.

pub(crate) mod accessor;
mod node;
mod store;

pub use accessor::ID_FIELDS;
pub use node::{NodeId, NodeKind, PathKey, PATH_DELIMITER, ROOT_PATH};
pub(crate) use node::{NodeIndex, Segment};
pub(crate) use store::NodeStore;
