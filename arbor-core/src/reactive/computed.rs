//! Computed Values
//!
//! A computed value is an observable whose contents are owned by a
//! computation. An effect runs the computation and writes the result; the
//! backing root stays locked in between, so any other write fails with
//! [`Error::Locked`](crate::Error::Locked).
//!
//! Because the result is stored through the regular write path, listeners
//! on a computed value only fire when the result actually changed.

use std::ops::Deref;

use serde_json::Value;
use tracing::warn;

use super::effect::Effect;
use crate::observable::{lock_edits, Observable, ObservableOptions};

/// A read-only observable derived from other observables.
///
/// Dereferences to the backing [`Observable`] for reads and subscriptions.
#[derive(Debug, Clone)]
pub struct Computed {
    obs: Observable,
    effect: Effect,
}

impl Computed {
    /// The backing observable.
    pub fn observable(&self) -> &Observable {
        &self.obs
    }

    /// The effect that keeps the value up to date.
    pub fn effect(&self) -> &Effect {
        &self.effect
    }

    /// Stop recomputing. The last value stays readable.
    pub fn dispose(&self) {
        self.effect.dispose();
    }
}

impl Deref for Computed {
    type Target = Observable;

    fn deref(&self) -> &Observable {
        &self.obs
    }
}

/// Create a computed value from `compute`.
///
/// `compute` runs right away and again whenever anything it read changes.
pub fn computed<F>(compute: F) -> Computed
where
    F: Fn() -> Value + Send + Sync + 'static,
{
    let obs = Observable::with_options(None, ObservableOptions::default());
    lock_edits(&obs, true);

    let target = obs.clone();
    let effect = Effect::new(move || {
        let value = compute();

        lock_edits(&target, false);
        let result = target.set(value);
        lock_edits(&target, true);

        if let Err(error) = result {
            warn!(%error, "failed to store computed value");
        }
    });

    Computed { obs, effect }
}
