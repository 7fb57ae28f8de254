//! Helpers built on the public observable contract.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::{Map, Value};
use tokio::sync::oneshot;
use tracing::debug;

use super::Observable;
use crate::error::Result;
use crate::reactive::{BatchGuard, Disposer, ListenerOptions};

/// Field that carries a source's last-modified marker through a merge.
pub const DATE_MODIFIED_KEY: &str = "@dateModified";

/// Forbid (`true`) or allow (`false`) every write to `obs`'s root.
///
/// While locked, writes fail with [`Error::Locked`](crate::Error::Locked).
pub fn lock_edits(obs: &Observable, locked: bool) {
    obs.root().state.write().locked = locked;
    debug!(locked, "lock edits");
}

/// Values that may or may not be observable handles.
pub trait MaybeObservable {
    fn as_observable(&self) -> Option<&Observable>;

    fn is_observable_value(&self) -> bool {
        self.as_observable().is_some()
    }
}

impl MaybeObservable for Observable {
    fn as_observable(&self) -> Option<&Observable> {
        Some(self)
    }
}

impl MaybeObservable for Value {
    fn as_observable(&self) -> Option<&Observable> {
        None
    }
}

impl<T: MaybeObservable> MaybeObservable for Option<T> {
    fn as_observable(&self) -> Option<&Observable> {
        self.as_ref().and_then(MaybeObservable::as_observable)
    }
}

pub fn is_observable<T: MaybeObservable + ?Sized>(value: &T) -> bool {
    value.is_observable_value()
}

/// Deep-merge `sources` into a plain value, left to right.
///
/// Objects merge key by key; anything else replaces the target field.
pub fn merge_into_value(target: &mut Value, sources: &[Value]) {
    for source in sources {
        let (Value::Object(target), Value::Object(source)) = (&mut *target, source) else {
            continue;
        };

        if let Some(modified) = source.get(DATE_MODIFIED_KEY) {
            target.insert(DATE_MODIFIED_KEY.to_owned(), modified.clone());
        }
        for (key, value) in source {
            if key == DATE_MODIFIED_KEY {
                continue;
            }
            if value.is_object() {
                let slot = target
                    .entry(key.clone())
                    .or_insert_with(|| Value::Object(Map::new()));
                if !slot.is_object() {
                    *slot = Value::Object(Map::new());
                }
                merge_into_value(slot, std::slice::from_ref(value));
            } else {
                target.insert(key.clone(), value.clone());
            }
        }
    }
}

/// Deep-merge `sources` into an observable through its write path, so the
/// merge notifies like ordinary writes do, in a single batch.
pub fn merge_into_observable(target: &Observable, sources: &[Value]) -> Result<()> {
    let _batch = BatchGuard::begin();
    for source in sources {
        merge_source(target, source)?;
    }
    Ok(())
}

fn merge_source(target: &Observable, source: &Value) -> Result<()> {
    let (Some(Value::Object(current)), Value::Object(source)) = (target.peek(), source) else {
        return Ok(());
    };

    if let Some(modified) = source.get(DATE_MODIFIED_KEY) {
        target.set_key(DATE_MODIFIED_KEY, modified.clone())?;
    }
    for (key, value) in source {
        if key == DATE_MODIFIED_KEY {
            continue;
        }
        if value.is_object() {
            if !current.get(key).is_some_and(Value::is_object) {
                target.set_key(key.as_str(), Value::Object(Map::new()))?;
            }
            merge_source(&target.prop(key.as_str()), value)?;
        } else {
            target.set_key(key.as_str(), value.clone())?;
        }
    }
    Ok(())
}

enum Expected {
    Equals(Value),
    HasValue,
}

impl Expected {
    fn matches(&self, value: Option<&Value>) -> bool {
        match self {
            Expected::Equals(expected) => value == Some(expected),
            Expected::HasValue => match value {
                None | Some(Value::Null) => false,
                Some(Value::Object(map)) => !map.is_empty(),
                Some(_) => true,
            },
        }
    }
}

/// A pending one-shot wait created by [`on_equals`] and friends.
#[derive(Debug)]
pub struct OnValue {
    receiver: oneshot::Receiver<Value>,
    disposer: Option<Disposer>,
}

impl OnValue {
    /// Stop waiting. Does nothing if the wait already completed.
    pub fn dispose(&self) {
        if let Some(disposer) = &self.disposer {
            disposer.dispose();
        }
    }

    /// Resolve with the matching value. `None` if the wait was disposed
    /// before it matched.
    pub async fn wait(self) -> Option<Value> {
        self.receiver.await.ok()
    }
}

fn on_value<F>(node: &Observable, expected: Expected, callback: F) -> OnValue
where
    F: FnOnce(&Value) + Send + 'static,
{
    let (sender, receiver) = oneshot::channel();

    if let Some(current) = node.peek().filter(|value| expected.matches(Some(value))) {
        callback(&current);
        let _ = sender.send(current);
        return OnValue {
            receiver,
            disposer: None,
        };
    }

    let pending = Mutex::new(Some((callback, sender)));
    let own_disposer: Arc<Mutex<Option<Disposer>>> = Arc::new(Mutex::new(None));
    let own_disposer_clone = own_disposer.clone();

    let disposer = node.on_change(
        move |change| {
            let Some(value) = change.value().filter(|value| expected.matches(Some(*value))) else {
                return;
            };
            let Some((callback, sender)) = pending.lock().take() else {
                return;
            };

            callback(value);
            let _ = sender.send(value.clone());
            if let Some(disposer) = own_disposer_clone.lock().take() {
                disposer.dispose();
            }
        },
        ListenerOptions::shallow(),
    );
    *own_disposer.lock() = Some(disposer.clone());

    OnValue {
        receiver,
        disposer: Some(disposer),
    }
}

/// Call `callback` once `node` equals `value`.
pub fn on_equals<F>(node: &Observable, value: impl Into<Value>, callback: F) -> OnValue
where
    F: FnOnce(&Value) + Send + 'static,
{
    on_value(node, Expected::Equals(value.into()), callback)
}

/// Call `callback` once `node` holds something other than nothing, `null`
/// or an empty object.
pub fn on_has_value<F>(node: &Observable, callback: F) -> OnValue
where
    F: FnOnce(&Value) + Send + 'static,
{
    on_value(node, Expected::HasValue, callback)
}

/// Call `callback` once `node` is `true`.
pub fn on_true<F>(node: &Observable, callback: F) -> OnValue
where
    F: FnOnce() + Send + 'static,
{
    on_value(node, Expected::Equals(Value::Bool(true)), move |_| callback())
}

/// Create an empty observable filled in by `future`.
///
/// Returns the observable and a driver that must be polled (for example
/// spawned on a runtime). When `future` resolves, the driver stores its
/// value; an error is stored as `{"error": message}`.
pub fn observable_from_future<F, E>(future: F) -> (Observable, impl Future<Output = Result<()>>)
where
    F: Future<Output = std::result::Result<Value, E>>,
    E: Display,
{
    let obs = Observable::with_options(None, Default::default());
    let target = obs.clone();

    let driver = async move {
        match future.await {
            Ok(value) => {
                {
                    let mut state = target.root().state.write();
                    state.is_primitive = !value.is_object() && !value.is_array();
                    if state.is_primitive {
                        state.value = Some(Value::Object(Map::new()));
                    }
                }
                target.set(value)
            }
            Err(error) => {
                let mut failure = Map::new();
                failure.insert("error".to_owned(), Value::String(error.to_string()));
                target.set(Value::Object(failure))
            }
        }
    };

    (obs, driver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{observable, Error};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn locked_roots_reject_writes() {
        let obs = observable(json!({ "a": 1 }));
        lock_edits(&obs, true);
        assert!(matches!(obs.set_key("a", 2), Err(Error::Locked { .. })));
        assert_eq!(obs.peek(), Some(json!({ "a": 1 })));

        lock_edits(&obs, false);
        obs.set_key("a", 2).unwrap();
        assert_eq!(obs.peek(), Some(json!({ "a": 2 })));
    }

    #[test]
    fn capability_checks() {
        let obs = observable(json!({}));
        assert!(is_observable(&obs));
        assert!(!is_observable(&json!({})));
        assert!(is_observable(&Some(obs)));
        assert!(!is_observable(&None::<Observable>));
    }

    #[test]
    fn merges_plain_values() {
        let mut target = json!({ "a": { "b": 1, "c": 2 }, "d": 5 });
        merge_into_value(
            &mut target,
            &[json!({ "a": { "b": 3 }, "d": { "e": 1 } }), json!({ "f": [1] })],
        );
        assert_eq!(target, json!({ "a": { "b": 3, "c": 2 }, "d": { "e": 1 }, "f": [1] }));
    }

    #[test]
    fn merge_copies_the_modified_marker() {
        let mut target = json!({});
        merge_into_value(&mut target, &[json!({ "@dateModified": 42, "a": 1 })]);
        assert_eq!(target, json!({ "@dateModified": 42, "a": 1 }));
    }

    #[test]
    fn merges_into_observables_in_one_batch() {
        let obs = observable(json!({ "a": { "b": 1, "c": 2 } }));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let _dispose = obs.on_change(
            move |_| {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            ListenerOptions::default(),
        );

        merge_into_observable(&obs, &[json!({ "a": { "b": 3 }, "x": { "y": true } })]).unwrap();

        assert_eq!(obs.peek(), Some(json!({ "a": { "b": 3, "c": 2 }, "x": { "y": true } })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn on_equals_fires_once() {
        let obs = observable(json!({ "status": "idle" }));
        let status = obs.prop("status");
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let wait = on_equals(&status, "done", move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        status.set("busy").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        status.set("done").unwrap();
        status.set("busy").unwrap();
        status.set("done").unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        wait.dispose();
    }

    #[test]
    fn on_has_value_matches_immediately() {
        let obs = observable(json!({ "user": { "name": "a" } }));
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();

        let wait = on_has_value(&obs.prop("user"), move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(wait.disposer.is_none());
    }

    #[test]
    fn has_value_rules() {
        assert!(!Expected::HasValue.matches(None));
        assert!(!Expected::HasValue.matches(Some(&Value::Null)));
        assert!(!Expected::HasValue.matches(Some(&json!({}))));
        assert!(Expected::HasValue.matches(Some(&json!(0))));
        assert!(Expected::HasValue.matches(Some(&json!([]))));
    }

    #[tokio::test]
    async fn on_true_resolves() {
        let obs = observable(json!({ "ready": false }));
        let ready = obs.prop("ready");

        let wait = on_true(&ready, || {});
        ready.set(true).unwrap();

        assert_eq!(wait.wait().await, Some(json!(true)));
    }

    #[tokio::test]
    async fn futures_fill_the_observable() {
        let (obs, driver) = observable_from_future(async { Ok::<_, String>(json!(7)) });
        assert_eq!(obs.peek(), None);

        driver.await.unwrap();
        assert_eq!(obs.peek(), Some(json!(7)));
        assert!(obs.root().state.read().is_primitive);
    }

    #[tokio::test]
    async fn future_errors_are_stored() {
        let (obs, driver) = observable_from_future(async { Err::<Value, _>("boom") });

        driver.await.unwrap();
        assert_eq!(obs.peek(), Some(json!({ "error": "boom" })));
    }
}
