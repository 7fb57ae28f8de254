//! Mutation Engine
//!
//! Every write funnels through [`set_prop`]:
//!
//! 1. Refuse if the root is locked.
//! 2. Capture the previous value at the target, compute the new one.
//! 3. Store the new value in the tree.
//! 4. Diff new against previous, node by node, notifying descendants whose
//!    value changed and re-keying the nodes of array elements that moved.
//! 5. Notify the written node and every ancestor, one level further per hop.
//!
//! Steps 4 and 5 run inside one batch, so the whole write reaches listeners
//! as a single flush.

use std::cell::Cell;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::Value;
use smallvec::SmallVec;
use tracing::debug;

use super::Root;
use crate::error::{Error, Result};
use crate::graph::accessor::{self, SlotError};
use crate::graph::{NodeIndex, NodeStore, PathKey, PATH_DELIMITER};
use crate::reactive::{untrack, BatchGuard, Change, ChangePath, Notification};
use crate::Observable;

/// Level reported for freshly created or deleted values.
pub(crate) const LEVEL_CREATED: i32 = -1;

thread_local! {
    static INTERNAL_WRITES: Cell<usize> = const { Cell::new(0) };
}

/// Marks writes issued by the engine itself, which bypass safe-mode gating.
pub(crate) struct InternalWrite;

impl InternalWrite {
    pub(crate) fn enter() -> Self {
        INTERNAL_WRITES.with(|depth| depth.set(depth.get() + 1));
        InternalWrite
    }

    pub(crate) fn is_active() -> bool {
        INTERNAL_WRITES.with(Cell::get) > 0
    }
}

impl Drop for InternalWrite {
    fn drop(&mut self) {
        INTERNAL_WRITES.with(|depth| depth.set(depth.get() - 1));
    }
}

/// Write the result of `compute` at `key` under `parent`, or replace the
/// root slot when `key` is `None`.
///
/// `compute` receives the previous value and returns the new one; `None`
/// clears the slot. `level` overrides the computed notification level.
/// Returns the arena index of the written node.
pub(crate) fn set_prop<F>(
    root: &Arc<Root>,
    parent: NodeIndex,
    key: Option<PathKey>,
    compute: F,
    level: Option<i32>,
) -> Result<NodeIndex>
where
    F: FnOnce(Option<&Value>) -> Option<Value>,
{
    let (child, prev) = {
        let mut graph = root.graph.lock();
        let child = match &key {
            Some(key) => graph.child(parent, key),
            None => parent,
        };

        let state = root.state.read();
        if state.locked {
            return Err(Error::Locked {
                path: graph.path_string(child, "."),
            });
        }

        let prev = match &key {
            Some(key) => {
                let ids = graph.node(parent).array_ids.as_ref();
                accessor::resolve(state.value.as_ref(), &graph.segments(parent))
                    .and_then(|container| accessor::child_value(container, key, ids))
                    .cloned()
            }
            None => state.value.clone(),
        };
        (child, prev)
    };

    // Updaters read through plain accessors; none of that is a dependency.
    let value = untrack(|| compute(prev.as_ref()));

    {
        let graph = root.graph.lock();
        let mut state = root.state.write();
        match &key {
            Some(key) => {
                let segments = graph.segments(parent);
                let container = accessor::container_mut(&mut state.value, &segments)
                    .map_err(|(depth, error)| {
                        let failed = segments.get(depth).map_or(key, |segment| segment.key);
                        slot_error(display_path(&segments[..depth]), failed, error)
                    })?;
                let ids = graph.node(parent).array_ids.as_ref();
                accessor::replace_child(container, key, ids, value.clone())
                    .map_err(|error| slot_error(graph.path_string(parent, "."), key, error))?;
            }
            None => state.value = value.clone(),
        }
        debug!(path = %graph.path_string(child, "."), deleted = value.is_none(), "set");
    }

    let _batch = BatchGuard::begin();

    let is_container = accessor::is_container(value.as_ref());
    let mut has_diff = !is_container;
    let mut resized = false;
    if is_container || accessor::is_container(prev.as_ref()) {
        let mut notifications = Vec::new();
        {
            let mut graph = root.graph.lock();
            let mut diff = Diff {
                root,
                graph: &mut graph,
                out: &mut notifications,
            };
            has_diff |= diff.update_nodes(child, value.as_ref(), prev.as_ref());
        }
        crate::reactive::enqueue(notifications);
        resized = accessor::array_resized(value.as_ref(), prev.as_ref());
    }

    if is_container || value != prev {
        let level = level.unwrap_or(if prev.is_none() {
            LEVEL_CREATED
        } else if has_diff {
            0
        } else {
            1
        });
        let target = if root.state.read().is_primitive { NodeStore::ROOT } else { child };
        notify(root, target, value, prev, level, resized);
    }

    Ok(child)
}

/// Notify `node` and every ancestor about a change at `node`.
pub(crate) fn notify(
    root: &Arc<Root>,
    node: NodeIndex,
    value: Option<Value>,
    prev: Option<Value>,
    level: i32,
    resized: bool,
) {
    let mut notifications = Vec::new();
    {
        let graph = root.graph.lock();
        let mut path = ChangePath::new();
        let mut current = node;
        let mut level = level;
        loop {
            let listeners = graph.firing_listeners(current, level, resized);
            if !listeners.is_empty() {
                let current_value = if current == node {
                    value.clone()
                } else {
                    root.value_in(&graph, current)
                };
                let change = Arc::new(Change::new(
                    Observable::from_parts(root.clone(), current),
                    current_value,
                    path.clone(),
                    value.clone(),
                    prev.clone(),
                ));
                notifications.extend(listeners.into_iter().map(|listener| Notification {
                    listener,
                    change: change.clone(),
                }));
            }

            match graph.parent(current) {
                Some((parent, key)) => {
                    path.insert(0, key.clone());
                    current = parent;
                    level += 1;
                }
                None => break,
            }
        }
    }
    crate::reactive::enqueue(notifications);
}

/// One structural diff pass over the node graph.
struct Diff<'a> {
    root: &'a Arc<Root>,
    graph: &'a mut NodeStore,
    out: &'a mut Vec<Notification>,
}

impl Diff<'_> {
    /// Compare `value` against `prev` below `parent`.
    ///
    /// Only nodes that already exist are visited: a path nobody accessed has
    /// no listeners and no descendants. Returns whether anything differed or
    /// moved.
    fn update_nodes(
        &mut self,
        parent: NodeIndex,
        value: Option<&Value>,
        prev: Option<&Value>,
    ) -> bool {
        let mut has_diff = false;
        let mut previous_positions = None;

        match (value, prev) {
            (Some(Value::Array(_)), Some(Value::Array(prev_items))) => {
                previous_positions = accessor::identity_table(prev_items)
                    .map(|table| (prev_items.first().and_then(accessor::id_field), table));
            }
            (_, Some(prev_container)) if accessor::is_container(Some(prev_container)) => {
                // Keys that disappeared cascade a deletion through their subtree.
                for (key, prev_child) in accessor::entries(Some(prev_container)) {
                    let kept = value
                        .is_some_and(|value| accessor::child_value(value, &key, None).is_some());
                    if kept {
                        continue;
                    }
                    has_diff = true;
                    if let Some(child) = self.graph.find_child(parent, &key) {
                        self.update_child(child, None, Some(prev_child));
                    }
                }
            }
            _ => {}
        }

        let Some(container) = value.filter(|value| accessor::is_container(Some(*value))) else {
            self.graph.set_array_ids(parent, None);
            return has_diff;
        };

        if accessor::array_resized(Some(container), prev) {
            has_diff = true;
        }

        let prev_items = prev.and_then(Value::as_array);
        let field = previous_positions.as_ref().and_then(|(field, _)| *field);
        let table = previous_positions.as_ref().map(|(_, table)| table);

        // Where each element with a known identity came from.
        let origins: Vec<Option<usize>> = match (container, field, table) {
            (Value::Array(items), Some(field), Some(table)) => items
                .iter()
                .map(|item| accessor::identity(item, field).and_then(|id| table.get(&id).copied()))
                .collect(),
            _ => Vec::new(),
        };
        let moving_from: HashSet<usize> = origins
            .iter()
            .enumerate()
            .filter_map(|(index, origin)| origin.filter(|from| *from != index))
            .collect();

        let mut did_move = false;
        let mut moves = Vec::new();

        for (key, child_value) in accessor::entries(Some(container)) {
            let prev_here = prev.and_then(|prev| accessor::child_value(prev, &key, None));
            if prev_here == Some(child_value) {
                continue;
            }

            let mut child = self.graph.find_child(parent, &key);
            let mut prev_child = prev_here;
            let mut is_diff = true;

            if let PathKey::Index(index) = key {
                match origins.get(index).copied().flatten() {
                    Some(from) if from != index => {
                        // The node sitting here followed an element that was
                        // removed, so its path now shows the newcomer.
                        if !moving_from.contains(&index) {
                            if let Some(incumbent) = child {
                                has_diff = true;
                                self.update_child(incumbent, Some(child_value), prev_here);
                            }
                        }

                        // The element moved: keep its node, compare against
                        // where it used to be.
                        did_move = true;
                        child = self.graph.find_child(parent, &PathKey::Index(from));
                        if let Some(node) = child {
                            moves.push((node, from, index));
                        }
                        prev_child = prev_items.and_then(|items| items.get(from));
                        is_diff = prev_child != Some(child_value);
                    }
                    _ if moving_from.contains(&index) => {
                        // The node here follows an element that moved away.
                        child = None;
                    }
                    _ => {}
                }
            }

            if !is_diff {
                continue;
            }
            has_diff = true;

            if let Some(node) = child {
                self.update_child(node, Some(child_value), prev_child);
            }
        }

        // Positions past the new end lost their element, unless it moved.
        if let (Value::Array(items), Some(prev_items)) = (container, prev_items) {
            for (index, prev_child) in prev_items.iter().enumerate().skip(items.len()) {
                if moving_from.contains(&index) {
                    continue;
                }
                if let Some(node) = self.graph.find_child(parent, &PathKey::Index(index)) {
                    self.update_child(node, None, Some(prev_child));
                }
            }
        }

        if !moves.is_empty() {
            self.graph.relocate(parent, &moves);
        }

        let ids = container.as_array().and_then(|items| accessor::identity_table(items));
        self.graph.set_array_ids(parent, ids);

        has_diff || did_move
    }

    /// Diff an existing child below its own subtree, then queue its listeners.
    fn update_child(&mut self, node: NodeIndex, value: Option<&Value>, prev: Option<&Value>) {
        if accessor::is_container(value) || accessor::is_container(prev) {
            self.update_nodes(node, value, prev);
        }
        let resized = accessor::array_resized(value, prev);
        self.notify_node(node, value, prev, resized);
    }

    /// Queue the listeners of a single node that changed during the diff.
    fn notify_node(
        &mut self,
        node: NodeIndex,
        value: Option<&Value>,
        prev: Option<&Value>,
        resized: bool,
    ) {
        let listeners = self.graph.firing_listeners(node, 0, resized);
        if listeners.is_empty() {
            return;
        }

        let change = Arc::new(Change::new(
            Observable::from_parts(self.root.clone(), node),
            value.cloned(),
            SmallVec::new(),
            value.cloned(),
            prev.cloned(),
        ));
        self.out.extend(listeners.into_iter().map(|listener| Notification {
            listener,
            change: change.clone(),
        }));
    }
}

fn slot_error(path: String, key: &PathKey, error: SlotError) -> Error {
    match error {
        SlotError::NotAContainer => Error::NotAContainer {
            path,
            key: key.to_string(),
        },
        SlotError::OutOfRange(index) => Error::IndexOutOfRange { path, index },
    }
}

fn display_path(segments: &[crate::graph::Segment<'_>]) -> String {
    let mut path = String::from(crate::graph::ROOT_PATH);
    for segment in segments {
        path.push('.');
        path.push_str(&segment.key.to_string());
    }
    path
}

/// Render a node's path with the canonical delimiter.
pub(crate) fn delimited_path(graph: &NodeStore, index: NodeIndex) -> String {
    let mut delimiter = [0u8; 4];
    graph.path_string(index, PATH_DELIMITER.encode_utf8(&mut delimiter))
}
