//! Gates on a predicate.
//!
//! [`when`] runs a callback once a tracked predicate becomes true;
//! [`when_ready`] is the same gate as a future.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::oneshot;

use super::context::untrack;
use super::effect::{Effect, WeakEffect};

/// Options for [`when`].
#[derive(Debug, Clone, Copy, Default)]
pub struct WhenOptions {
    /// Keep running the callback every time the predicate is re-evaluated
    /// as true, instead of only the first time.
    pub repeat: bool,
}

/// Truthiness of an observable value: absent, `null`, `false`, `0`, `NaN`
/// and `""` are false, everything else is true.
pub fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(flag)) => *flag,
        Some(Value::Number(number)) => number.as_f64().is_some_and(|n| n != 0.0 && !n.is_nan()),
        Some(Value::String(text)) => !text.is_empty(),
        Some(Value::Array(_) | Value::Object(_)) => true,
    }
}

/// Run `callback` once `predicate` returns true.
///
/// The predicate is evaluated as an effect, so it re-runs whenever the
/// observables it reads change. Unless `options.repeat` is set, the gate
/// closes after the first hit and releases its subscriptions. The callback
/// runs untracked.
///
/// Keep the returned effect alive for as long as the gate should stay open.
pub fn when<P, F>(predicate: P, callback: F, options: WhenOptions) -> Effect
where
    P: Fn() -> bool + Send + Sync + 'static,
    F: Fn() + Send + Sync + 'static,
{
    let done = Arc::new(AtomicBool::new(false));
    let handle: Arc<Mutex<Option<WeakEffect>>> = Arc::new(Mutex::new(None));

    let effect = {
        let done = done.clone();
        let handle = handle.clone();
        Effect::new(move || {
            if done.load(Ordering::SeqCst) || !predicate() {
                return;
            }
            if !options.repeat {
                done.store(true, Ordering::SeqCst);
            }

            untrack(&callback);

            if done.load(Ordering::SeqCst) {
                let effect = handle.lock().as_ref().and_then(WeakEffect::upgrade);
                if let Some(effect) = effect {
                    effect.dispose();
                }
            }
        })
    };

    if done.load(Ordering::SeqCst) {
        // Already satisfied during the first run.
        effect.dispose();
    } else {
        *handle.lock() = Some(effect.downgrade());
    }
    effect
}

/// Resolve once `predicate` returns true.
pub fn when_ready<P>(predicate: P) -> impl Future<Output = ()>
where
    P: Fn() -> bool + Send + Sync + 'static,
{
    let (sender, receiver) = oneshot::channel::<()>();
    let sender = Mutex::new(Some(sender));

    let effect = when(
        predicate,
        move || {
            if let Some(sender) = sender.lock().take() {
                let _ = sender.send(());
            }
        },
        WhenOptions::default(),
    );

    async move {
        let _effect = effect;
        let _ = receiver.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observable;
    use serde_json::json;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn truthiness() {
        assert!(!truthy(None));
        assert!(!truthy(Some(&json!(null))));
        assert!(!truthy(Some(&json!(0))));
        assert!(!truthy(Some(&json!(""))));
        assert!(truthy(Some(&json!(0.5))));
        assert!(truthy(Some(&json!("x"))));
        assert!(truthy(Some(&json!([]))));
    }

    #[test]
    fn when_fires_once() {
        let obs = observable(json!({ "ready": false }));
        let calls = Arc::new(AtomicUsize::new(0));

        let ready = obs.prop("ready");
        let calls_clone = calls.clone();
        let gate = when(
            move || truthy(ready.get().as_ref()),
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            WhenOptions::default(),
        );

        obs.set_key("ready", true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(gate.is_disposed());

        obs.set_key("ready", false).unwrap();
        obs.set_key("ready", true).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn when_already_true_fires_immediately() {
        let obs = observable(json!({ "ready": true }));
        let calls = Arc::new(AtomicUsize::new(0));

        let ready = obs.prop("ready");
        let calls_clone = calls.clone();
        let gate = when(
            move || truthy(ready.get().as_ref()),
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            WhenOptions::default(),
        );

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(gate.is_disposed());
    }

    #[test]
    fn when_repeats() {
        let obs = observable(json!({ "n": 0 }));
        let calls = Arc::new(AtomicUsize::new(0));

        let n = obs.prop("n");
        let calls_clone = calls.clone();
        let _gate = when(
            move || truthy(n.get().as_ref()),
            move || {
                calls_clone.fetch_add(1, Ordering::SeqCst);
            },
            WhenOptions { repeat: true },
        );

        obs.set_key("n", 1).unwrap();
        obs.set_key("n", 0).unwrap();
        obs.set_key("n", 2).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn when_ready_resolves() {
        let obs = observable(json!({ "ready": false }));

        let ready = obs.prop("ready");
        let wait = when_ready(move || truthy(ready.get().as_ref()));

        obs.set_key("ready", true).unwrap();
        wait.await;
    }
}
