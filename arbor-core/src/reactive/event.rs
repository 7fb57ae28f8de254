//! Events carry no data; dispatching one bumps a counter observable so that
//! listeners and tracked readers are notified.

use serde_json::Value;
use tracing::warn;

use super::change::Change;
use super::subscriber::{Disposer, ListenerOptions};
use crate::observable::{observable, Observable};

#[derive(Debug, Clone)]
pub struct Event {
    counter: Observable,
}

impl Event {
    pub fn new() -> Self {
        Self { counter: observable(0) }
    }

    /// Notify every listener.
    pub fn dispatch(&self) {
        let result = self
            .counter
            .set_with(|count| Value::from(count.and_then(Value::as_u64).unwrap_or(0) + 1));
        if let Err(error) = result {
            warn!(%error, "failed to dispatch event");
        }
    }

    pub fn on<F>(&self, callback: F) -> Disposer
    where
        F: Fn(&Change) + Send + Sync + 'static,
    {
        self.counter.on_change(callback, ListenerOptions::default())
    }

    /// Number of dispatches so far, read as a tracked dependency.
    pub fn get(&self) -> u64 {
        self.counter.get().and_then(|count| count.as_u64()).unwrap_or(0)
    }
}

impl Default for Event {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Effect;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn dispatch_notifies_listeners() {
        let event = Event::new();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let _dispose = event.on(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        });

        event.dispatch();
        event.dispatch();

        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(event.get(), 2);
    }

    #[test]
    fn effects_rerun_on_dispatch() {
        let event = Event::new();

        let source = event.clone();
        let effect = Effect::new(move || {
            source.get();
        });

        event.dispatch();
        assert_eq!(effect.run_count(), 2);
    }
}
