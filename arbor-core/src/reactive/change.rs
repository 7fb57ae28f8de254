//! Change notifications delivered to listeners.

use std::fmt;
use std::sync::OnceLock;

use serde_json::{Map, Value};
use smallvec::SmallVec;
use tracing::trace;

use crate::graph::{accessor, PathKey};
use crate::Observable;

/// Relative path from a listener's node down to the changed node.
pub type ChangePath = SmallVec<[PathKey; 4]>;

/// What a listener receives when something at or below its node changed.
pub struct Change {
    value: Option<Value>,
    path: ChangePath,
    value_at_path: Option<Value>,
    prev_at_path: Option<Value>,
    node: Observable,
    previous: OnceLock<Option<Value>>,
}

impl Change {
    pub(crate) fn new(
        node: Observable,
        value: Option<Value>,
        path: ChangePath,
        value_at_path: Option<Value>,
        prev_at_path: Option<Value>,
    ) -> Self {
        Self {
            value,
            path,
            value_at_path,
            prev_at_path,
            node,
            previous: OnceLock::new(),
        }
    }

    /// The current value of the listener's node.
    pub fn value(&self) -> Option<&Value> {
        self.value.as_ref()
    }

    /// Keys leading from the listener's node to the node that changed.
    /// Empty when the listener's own node changed.
    pub fn path(&self) -> &[PathKey] {
        &self.path
    }

    /// The new value at the changed node.
    pub fn value_at_path(&self) -> Option<&Value> {
        self.value_at_path.as_ref()
    }

    /// The previous value at the changed node.
    pub fn prev_at_path(&self) -> Option<&Value> {
        self.prev_at_path.as_ref()
    }

    /// Handle to the listener's node.
    pub fn node(&self) -> &Observable {
        &self.node
    }

    /// The listener node's value as it was before the change.
    ///
    /// Built on first use by cloning the current value and splicing the
    /// previous value in at [`path`](Change::path); later calls reuse it.
    pub fn previous(&self) -> Option<&Value> {
        self.previous
            .get_or_init(|| {
                previous_snapshot(self.value.as_ref(), &self.path, self.prev_at_path.clone())
            })
            .as_ref()
    }
}

impl fmt::Debug for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Change")
            .field("node", &self.node)
            .field("path", &self.path)
            .field("value_at_path", &self.value_at_path)
            .field("prev_at_path", &self.prev_at_path)
            .finish()
    }
}

fn previous_snapshot(
    value: Option<&Value>,
    path: &[PathKey],
    prev_at_path: Option<Value>,
) -> Option<Value> {
    if path.is_empty() {
        return prev_at_path;
    }

    let mut snapshot = value.cloned().unwrap_or_else(|| Value::Object(Map::new()));
    splice(&mut snapshot, path, prev_at_path);
    Some(snapshot)
}

fn splice(target: &mut Value, path: &[PathKey], prev: Option<Value>) {
    let Some((key, rest)) = path.split_first() else {
        return;
    };

    if rest.is_empty() {
        if let Err(error) = accessor::replace_child(target, key, None, prev) {
            trace!(?error, %key, "previous value does not fit the snapshot");
        }
        return;
    }

    if accessor::child_value(target, key, None).is_none() {
        let filler = Some(Value::Object(Map::new()));
        match accessor::replace_child(target, key, None, filler) {
            Ok(_) => {}
            Err(error) => {
                // The snapshot keeps whatever the current value holds here.
                trace!(?error, %key, "cannot rebuild the previous snapshot below a primitive");
                return;
            }
        }
    }
    if let Some(next) = accessor::child_value_mut(target, key, None) {
        splice(next, rest, prev);
    }
}
