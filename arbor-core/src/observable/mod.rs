//! Observables
//!
//! An [`Observable`] is a handle to one node of a root's path graph. It is
//! the accessor object through which values are read (and, inside a tracked
//! computation, recorded as dependencies) and through which every write
//! enters the mutation engine.
//!
//! # Roots
//!
//! A [`Root`] owns the value tree and the node arena. Handles keep the root
//! alive; the arena goes away with the last handle.
//!
//! A primitive initial value is boxed as `{"value": v}` so that the root
//! slot is always a container. Handles on such a root read and write
//! through the box transparently.
//!
//! # Locking
//!
//! The root holds two locks: the node arena (`graph`) and the value
//! (`state`). They are always taken in that order, and neither is held
//! while user code runs.
//!
//! # Example
//!
//! ```rust,ignore
//! use arbor_core::{observable, ListenerOptions};
//! use serde_json::json;
//!
//! let state = observable(json!({ "count": 0 }));
//!
//! state.on_change(|change| println!("{:?}", change.value()), ListenerOptions::default());
//!
//! state.prop("count").set_with(|prev| json!(prev.and_then(|v| v.as_i64()).unwrap_or(0) + 1))?;
//! ```

mod array;
mod engine;
mod helpers;

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{Error, Result};
use crate::graph::{accessor, NodeId, NodeIndex, NodeKind, NodeStore, PathKey};
use crate::reactive::{
    untrack, BatchGuard, Change, Disposer, Listener, ListenerOptions, TrackingContext,
};

pub use helpers::{
    is_observable, lock_edits, merge_into_observable, merge_into_value, observable_from_future,
    on_equals, on_has_value, on_true, MaybeObservable, OnValue, DATE_MODIFIED_KEY,
};

use engine::{set_prop, InternalWrite, LEVEL_CREATED};

/// Key of the box that wraps a primitive root value.
const BOX_KEY: &str = "value";

/// How strictly direct writes through [`Observable::write`] and
/// [`Observable::remove`] are gated.
///
/// The explicit verbs (`set`, `assign`, `delete`, ...) are never gated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SafeMode {
    /// Direct writes are always applied.
    Unrestricted,

    /// Direct writes are applied only when neither the old nor the new value
    /// is an object or array.
    #[default]
    Default,

    /// Direct writes are always rejected.
    Strict,
}

/// Options for creating an observable.
///
/// Deserializable so hosts can keep it in their own configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservableOptions {
    pub safe_mode: SafeMode,
}

impl ObservableOptions {
    pub fn safe_mode(safe_mode: SafeMode) -> Self {
        Self { safe_mode }
    }
}

pub(crate) struct RootState {
    /// The value tree. `None` while empty.
    pub(crate) value: Option<Value>,

    /// Whether `value` is a boxed primitive.
    pub(crate) is_primitive: bool,

    pub(crate) safe_mode: SafeMode,

    /// While set, every write through the engine fails.
    pub(crate) locked: bool,
}

impl RootState {
    /// Box `value` if it is a primitive.
    fn store(&mut self, value: Option<Value>) {
        self.is_primitive = value
            .as_ref()
            .is_some_and(|value| !value.is_object() && !value.is_array());
        self.value = if self.is_primitive {
            let mut boxed = Map::new();
            if let Some(value) = value {
                boxed.insert(BOX_KEY.to_owned(), value);
            }
            Some(Value::Object(boxed))
        } else {
            value
        };
    }
}

/// Shared state of one observable tree.
pub struct Root {
    pub(crate) state: RwLock<RootState>,
    pub(crate) graph: Mutex<NodeStore>,
}

impl Root {
    fn new(value: Option<Value>, options: ObservableOptions) -> Arc<Self> {
        let mut state = RootState {
            value: None,
            is_primitive: false,
            safe_mode: options.safe_mode,
            locked: false,
        };
        state.store(value);

        Arc::new(Self {
            state: RwLock::new(state),
            graph: Mutex::new(NodeStore::new()),
        })
    }

    /// The value at `index`, unboxing a primitive root.
    pub(crate) fn value_in(&self, graph: &NodeStore, index: NodeIndex) -> Option<Value> {
        let state = self.state.read();
        let value = accessor::resolve(state.value.as_ref(), &graph.segments(index));
        if state.is_primitive && index == NodeStore::ROOT {
            value.and_then(|boxed| boxed.get(BOX_KEY)).cloned()
        } else {
            value.cloned()
        }
    }
}

/// The result of [`Observable::read`].
#[derive(Debug, Clone, PartialEq)]
pub enum Read {
    /// A primitive, `null`, or nothing at all.
    Value(Option<Value>),

    /// An object or array, as a handle for further access.
    Node(Observable),
}

impl Read {
    /// The handle, if the key held a container.
    pub fn into_node(self) -> Option<Observable> {
        match self {
            Read::Node(node) => Some(node),
            Read::Value(_) => None,
        }
    }

    /// The raw value, if the key held a primitive.
    pub fn into_value(self) -> Option<Value> {
        match self {
            Read::Value(value) => value,
            Read::Node(_) => None,
        }
    }
}

/// Create an observable with the default safe mode.
pub fn observable(value: impl Into<Value>) -> Observable {
    Observable::with_options(Some(value.into()), ObservableOptions::default())
}

/// Handle to one node of an observable tree.
///
/// Handles are cheap to clone. Two handles are equal when they address the
/// same node.
#[derive(Clone)]
pub struct Observable {
    root: Arc<Root>,
    index: NodeIndex,
}

impl Observable {
    /// Create a root. `None` starts the observable empty.
    pub fn with_options(value: Option<Value>, options: ObservableOptions) -> Self {
        Self::from_parts(Root::new(value, options), NodeStore::ROOT)
    }

    pub(crate) fn from_parts(root: Arc<Root>, index: NodeIndex) -> Self {
        Self { root, index }
    }

    pub(crate) fn root(&self) -> &Arc<Root> {
        &self.root
    }

    // ------------------------------------------------------------------
    // Node metadata
    // ------------------------------------------------------------------

    pub fn id(&self) -> NodeId {
        self.root.graph.lock().id(self.index)
    }

    /// The node's path, rendered with [`PATH_DELIMITER`](crate::PATH_DELIMITER).
    pub fn path(&self) -> String {
        engine::delimited_path(&self.root.graph.lock(), self.index)
    }

    /// The node's key within its parent. `None` for the root.
    pub fn key(&self) -> Option<PathKey> {
        self.root.graph.lock().node(self.index).key.clone()
    }

    /// The parent handle and this node's key within it.
    ///
    /// The root is its own parent, with no key.
    pub fn parent(&self) -> (Observable, Option<PathKey>) {
        let graph = self.root.graph.lock();
        match graph.parent(self.index) {
            Some((parent, key)) => (Self::from_parts(self.root.clone(), parent), Some(key.clone())),
            None => (self.clone(), None),
        }
    }

    pub fn is_root(&self) -> bool {
        self.index == NodeStore::ROOT
    }

    /// Handle to the child at `key`, created on first access.
    ///
    /// On arrays, a field key that matches an element's `id`, `_id` or
    /// `__id` addresses that element.
    pub fn prop(&self, key: impl Into<PathKey>) -> Observable {
        let key = key.into();
        let mut graph = self.root.graph.lock();
        let key = self.normalize_key(&graph, key);
        let child = graph.child(self.index, &key);
        Self::from_parts(self.root.clone(), child)
    }

    /// Handle to the array element at `index`.
    pub fn at(&self, index: usize) -> Observable {
        self.prop(PathKey::Index(index))
    }

    /// Field keys on arrays are rewritten to positions, so that a node
    /// reached by identity is the same node as the one reached by index.
    fn normalize_key(&self, graph: &NodeStore, key: PathKey) -> PathKey {
        if !matches!(key, PathKey::Field(_)) {
            return key;
        }

        let state = self.root.state.read();
        let resolved = accessor::resolve(state.value.as_ref(), &graph.segments(self.index));
        let Some(Value::Array(items)) = resolved else {
            return key;
        };

        let index = match graph.node(self.index).array_ids.as_ref() {
            Some(ids) => accessor::resolve_index(&key, Some(ids)),
            None => accessor::resolve_index(&key, accessor::identity_table(items).as_ref()),
        };
        index.map_or(key, PathKey::Index)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    /// The current value, recorded as a deep dependency.
    pub fn get(&self) -> Option<Value> {
        TrackingContext::record_read(self, false, true);
        self.peek()
    }

    /// The current value, recorded as a shallow dependency: only changes to
    /// this node's own value or keys re-trigger.
    pub fn get_shallow(&self) -> Option<Value> {
        TrackingContext::record_read(self, true, true);
        self.peek()
    }

    /// The current value, without recording a dependency.
    pub fn peek(&self) -> Option<Value> {
        let graph = self.root.graph.lock();
        self.root.value_in(&graph, self.index)
    }

    /// Deserialize the current value, recorded as a deep dependency.
    /// An absent value deserializes from `null`.
    pub fn get_as<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.get().unwrap_or(Value::Null))?)
    }

    /// Read `key`: a handle for containers, the raw value otherwise.
    ///
    /// `"length"` on an array reads the length as a shallow dependency.
    pub fn read(&self, key: impl Into<PathKey>) -> Read {
        let key = key.into();
        let current = self.peek();

        if let (Some(Value::Array(items)), PathKey::Field(field)) = (&current, &key) {
            if field == "length" {
                TrackingContext::record_read(self, true, false);
                return Read::Value(Some(Value::from(items.len())));
            }
        }

        let child = self.prop(key);
        let value = child.peek();
        if accessor::is_container(value.as_ref()) {
            Read::Node(child)
        } else {
            TrackingContext::record_read(&child, false, true);
            Read::Value(value)
        }
    }

    /// The keys of the current value, recorded as a shallow dependency.
    pub fn keys(&self) -> Vec<PathKey> {
        TrackingContext::record_read(self, true, false);
        accessor::keys(self.peek().as_ref())
    }

    /// Whether the current value holds `key`. Not recorded.
    pub fn has(&self, key: impl Into<PathKey>) -> bool {
        let key = key.into();
        let graph = self.root.graph.lock();
        let ids = graph.node(self.index).array_ids.as_ref();
        self.root
            .value_in(&graph, self.index)
            .is_some_and(|value| accessor::child_value(&value, &key, ids).is_some())
    }

    /// The shape of the current value, `None` when absent.
    pub fn kind(&self) -> Option<NodeKind> {
        self.peek().as_ref().map(NodeKind::of)
    }

    /// Number of elements or fields, recorded as a shallow dependency.
    pub fn len(&self) -> usize {
        TrackingContext::record_read(self, true, false);
        match self.peek() {
            Some(Value::Array(items)) => items.len(),
            Some(Value::Object(map)) => map.len(),
            _ => 0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Writes
    // ------------------------------------------------------------------

    /// Where a write to this node's own value lands.
    fn write_target(&self) -> (NodeIndex, Option<PathKey>) {
        let graph = self.root.graph.lock();
        if self.index == NodeStore::ROOT {
            if self.root.state.read().is_primitive {
                (NodeStore::ROOT, Some(PathKey::from(BOX_KEY)))
            } else {
                (NodeStore::ROOT, None)
            }
        } else {
            match graph.parent(self.index) {
                Some((parent, key)) => (parent, Some(key.clone())),
                None => (NodeStore::ROOT, None),
            }
        }
    }

    fn set_value_with<F>(&self, compute: F) -> Result<()>
    where
        F: FnOnce(Option<&Value>) -> Option<Value>,
    {
        let (parent, key) = self.write_target();
        set_prop(&self.root, parent, key, compute, None)?;
        Ok(())
    }

    /// Replace this node's value.
    pub fn set(&self, value: impl Into<Value>) -> Result<()> {
        let value = value.into();
        self.set_value_with(|_| Some(value))
    }

    /// Replace this node's value with the result of `update`, which receives
    /// the previous value.
    pub fn set_with<F>(&self, update: F) -> Result<()>
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        self.set_value_with(|prev| Some(update(prev)))
    }

    /// Replace this node's value with the current value of another
    /// observable. An empty source clears this node.
    pub fn set_from(&self, source: &Observable) -> Result<()> {
        let value = source.peek();
        self.set_value_with(|_| value)
    }

    /// Serialize `value` and store it at this node.
    pub fn set_serialized<T: Serialize>(&self, value: &T) -> Result<()> {
        self.set(serde_json::to_value(value)?)
    }

    /// Set the child at `key`, returning its handle.
    pub fn set_key(&self, key: impl Into<PathKey>, value: impl Into<Value>) -> Result<Observable> {
        let value = value.into();
        self.set_key_with(key, |_| value)
    }

    /// Set the child at `key` from its previous value.
    pub fn set_key_with<F>(&self, key: impl Into<PathKey>, update: F) -> Result<Observable>
    where
        F: FnOnce(Option<&Value>) -> Value,
    {
        let key = {
            let graph = self.root.graph.lock();
            self.normalize_key(&graph, key.into())
        };
        let child = set_prop(&self.root, self.index, Some(key), |prev| Some(update(prev)), None)?;
        Ok(Self::from_parts(self.root.clone(), child))
    }

    /// Write every own field of `partial` into this node, delivering all
    /// notifications as one batch.
    ///
    /// Arrays are assigned by position. Anything else is ignored.
    pub fn assign(&self, partial: impl Into<Value>) -> Result<()> {
        let entries: Vec<(PathKey, Value)> = match partial.into() {
            Value::Object(map) => map
                .into_iter()
                .map(|(key, value)| (PathKey::Field(key), value))
                .collect(),
            Value::Array(items) => items
                .into_iter()
                .enumerate()
                .map(|(index, value)| (PathKey::Index(index), value))
                .collect(),
            _ => return Ok(()),
        };

        let _batch = BatchGuard::begin();
        let _internal = InternalWrite::enter();
        untrack(|| -> Result<()> {
            for (key, value) in entries {
                self.write(key, value)?;
            }
            Ok(())
        })
    }

    /// Direct property assignment, gated by the root's [`SafeMode`].
    ///
    /// Returns `Ok(false)` when the write was rejected and left the state
    /// untouched.
    pub fn write(&self, key: impl Into<PathKey>, value: impl Into<Value>) -> Result<bool> {
        let key = key.into();
        let value = value.into();

        if !InternalWrite::is_active() {
            if !self.write_allowed(&key, &value) {
                return Ok(false);
            }
            if cfg!(debug_assertions) && TrackingContext::is_active() {
                warn!(
                    path = %self.path(),
                    %key,
                    "assigned inside a tracked computation; use set() if this is intended"
                );
            }
        }

        self.set_key(key, value)?;
        Ok(true)
    }

    /// Direct property deletion.
    ///
    /// Only [`SafeMode::Unrestricted`] roots accept it; under any other mode
    /// this returns `Ok(false)` and [`delete_key`](Observable::delete_key)
    /// is the way to remove a key.
    pub fn remove(&self, key: impl Into<PathKey>) -> Result<bool> {
        let key = key.into();

        if !InternalWrite::is_active() {
            if self.root.state.read().safe_mode != SafeMode::Unrestricted {
                return Ok(false);
            }
            if cfg!(debug_assertions) && TrackingContext::is_active() {
                warn!(
                    path = %self.path(),
                    %key,
                    "deleted inside a tracked computation; use delete() if this is intended"
                );
            }
        }

        self.delete_key(key)?;
        Ok(true)
    }

    fn write_allowed(&self, key: &PathKey, incoming: &Value) -> bool {
        let safe_mode = self.root.state.read().safe_mode;
        match safe_mode {
            SafeMode::Unrestricted => true,
            SafeMode::Strict => false,
            SafeMode::Default => {
                let existing = untrack(|| self.prop(key).peek());
                !accessor::is_container(existing.as_ref())
                    && !accessor::is_container(Some(incoming))
            }
        }
    }

    /// Delete this node's key from its parent.
    pub fn delete(&self) -> Result<()> {
        let (parent, key) = self.parent();
        match key {
            Some(key) => parent.delete_key(key),
            None => Err(Error::RootDeletion),
        }
    }

    /// Delete the child at `key`.
    ///
    /// A boxed primitive root has nothing to delete, so this is a no-op there.
    pub fn delete_key(&self, key: impl Into<PathKey>) -> Result<()> {
        if self.root.state.read().is_primitive {
            return Ok(());
        }

        let key = {
            let graph = self.root.graph.lock();
            self.normalize_key(&graph, key.into())
        };
        set_prop(&self.root, self.index, Some(key), |_| None, Some(LEVEL_CREATED))?;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Listeners
    // ------------------------------------------------------------------

    /// Register `callback` for changes at or below this node.
    pub fn on_change<F>(&self, callback: F, options: ListenerOptions) -> Disposer
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        let listener = Arc::new(Listener::new(options.mode(), callback));
        self.root.graph.lock().add_listener(self.index, listener.clone());
        let disposer = Disposer::new(&self.root, self.index, &listener);

        if options.run_immediately {
            let value = self.peek();
            let change = Change::new(self.clone(), value.clone(), Default::default(), value, None);
            listener.notify(&change);
        }

        disposer
    }
}

impl PartialEq for Observable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.root, &other.root) && self.index == other.index
    }
}

impl Eq for Observable {}

impl Hash for Observable {
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.root).hash(state);
        self.index.hash(state);
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let graph = self.root.graph.lock();
        f.debug_struct("Observable")
            .field("id", &graph.id(self.index))
            .field("path", &graph.path_string(self.index, "."))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn with_mode(value: Value, safe_mode: SafeMode) -> Observable {
        Observable::with_options(Some(value), ObservableOptions::safe_mode(safe_mode))
    }

    #[test]
    fn primitive_roots_are_boxed() {
        let count = observable(5);
        assert_eq!(count.get(), Some(json!(5)));

        count.set(6).unwrap();
        assert_eq!(count.peek(), Some(json!(6)));
        assert_eq!(count.root.state.read().value, Some(json!({ "value": 6 })));
    }

    #[test]
    fn props_are_cached_per_path() {
        let obs = observable(json!({ "a": { "b": 1 } }));
        assert_eq!(obs.prop("a").prop("b"), obs.prop("a").prop("b"));
        assert_eq!(obs.prop("a").prop("b").id(), obs.prop("a").prop("b").id());
        assert_ne!(obs.prop("a"), obs.prop("a").prop("b"));
    }

    #[test]
    fn field_keys_on_arrays_share_index_nodes() {
        let obs = observable(json!({ "list": [{ "id": "x" }, { "id": "y" }] }));
        let list = obs.prop("list");
        assert_eq!(list.prop("y"), list.at(1));
        assert_eq!(list.prop("0"), list.at(0));
    }

    #[test]
    fn read_distinguishes_containers_and_primitives() {
        let obs = observable(json!({ "a": { "b": 1 }, "n": null, "list": [1, 2] }));

        assert_eq!(obs.read("a"), Read::Node(obs.prop("a")));
        assert_eq!(obs.read("n"), Read::Value(Some(Value::Null)));
        assert_eq!(obs.read("missing"), Read::Value(None));
        assert_eq!(obs.prop("list").read("length"), Read::Value(Some(json!(2))));
    }

    #[test]
    fn parent_of_root_is_itself() {
        let obs = observable(json!({ "a": 1 }));
        let (parent, key) = obs.parent();
        assert_eq!(parent, obs);
        assert!(key.is_none());

        let (parent, key) = obs.prop("a").parent();
        assert_eq!(parent, obs);
        assert_eq!(key, Some(PathKey::from("a")));
    }

    #[test]
    fn set_creates_missing_intermediates() {
        let obs = observable(json!({}));
        obs.prop("a").prop("b").set(1).unwrap();
        assert_eq!(obs.peek(), Some(json!({ "a": { "b": 1 } })));
    }

    #[test]
    fn set_below_a_primitive_fails() {
        let obs = observable(json!({ "a": 5 }));
        let err = obs.prop("a").set_key("b", 1).unwrap_err();
        assert!(matches!(err, Error::NotAContainer { .. }));
        assert_eq!(obs.peek(), Some(json!({ "a": 5 })));
    }

    #[test]
    fn deleting_the_root_fails() {
        let obs = observable(json!({ "a": 1 }));
        assert!(matches!(obs.delete(), Err(Error::RootDeletion)));

        obs.prop("a").delete().unwrap();
        assert_eq!(obs.peek(), Some(json!({})));
    }

    #[test]
    fn deleting_from_a_primitive_root_is_a_no_op() {
        let obs = observable("text");
        obs.delete_key("value").unwrap();
        assert_eq!(obs.peek(), Some(json!("text")));
    }

    #[test]
    fn safe_mode_gates_direct_writes() {
        let obs = observable(json!({ "x": 1, "o": {} }));
        assert!(obs.write("x", 2).unwrap());
        assert!(!obs.write("x", json!({})).unwrap());
        assert!(!obs.write("o", 3).unwrap());
        assert!(!obs.remove("o").unwrap());
        assert!(!obs.remove("x").unwrap());
        assert_eq!(obs.peek(), Some(json!({ "x": 2, "o": {} })));

        let strict = with_mode(json!({ "x": 1 }), SafeMode::Strict);
        assert!(!strict.write("x", 2).unwrap());
        assert!(!strict.remove("x").unwrap());

        let open = with_mode(json!({ "x": 1 }), SafeMode::Unrestricted);
        assert!(open.write("x", json!({ "y": 1 })).unwrap());
        assert!(open.remove("x").unwrap());
        assert_eq!(open.peek(), Some(json!({})));
    }

    #[test]
    fn assign_bypasses_safe_mode() {
        let strict = with_mode(json!({ "a": 1 }), SafeMode::Strict);
        strict.assign(json!({ "a": { "nested": true }, "b": 2 })).unwrap();
        assert_eq!(strict.peek(), Some(json!({ "a": { "nested": true }, "b": 2 })));
    }

    #[test]
    fn options_deserialize_from_config() {
        let options: ObservableOptions =
            serde_json::from_value(json!({ "safe_mode": "strict" })).unwrap();
        assert_eq!(options.safe_mode, SafeMode::Strict);

        let options: ObservableOptions = serde_json::from_value(json!({})).unwrap();
        assert_eq!(options.safe_mode, SafeMode::Default);
    }

    #[test]
    fn typed_reads_and_writes() {
        #[derive(Debug, PartialEq, Serialize, Deserialize)]
        struct Point {
            x: i32,
            y: i32,
        }

        let obs = observable(json!({}));
        obs.prop("p").set_serialized(&Point { x: 1, y: 2 }).unwrap();
        assert_eq!(obs.prop("p").get_as::<Point>().unwrap(), Point { x: 1, y: 2 });
        assert!(obs.prop("missing").get_as::<Point>().is_err());
    }
}
