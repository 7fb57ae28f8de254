//! Effect Implementation
//!
//! An Effect is a side-effecting computation that runs whenever the
//! observables it read change.
//!
//! # How Effects Work
//!
//! 1. When created, the effect runs its function immediately inside a
//!    tracking context to establish initial dependencies.
//!
//! 2. Every tracked node gets a listener: a shallow one if the node was only
//!    read shallowly (keys, length, iteration), a deep one otherwise.
//!
//! 3. When any of those listeners fires, the effect drops all of its
//!    subscriptions, re-runs, and subscribes to whatever it read this time.
//!    Dependencies are therefore always those of the latest run.
//!
//! # Batching
//!
//! Each run is wrapped in a batch, so writes made by the effect body are
//! delivered after the run's tracking frame has closed and never leak into
//! its dependency set.
//!
//! # Lifetime
//!
//! Listeners refer to the effect weakly. The effect stops, and its
//! subscriptions are removed, when it is disposed or when its last handle
//! is dropped.

use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tracing::trace;

use super::batch::BatchGuard;
use super::context::TrackingContext;
use super::subscriber::{Disposer, ListenerOptions};

/// Counter for generating unique effect IDs.
static EFFECT_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Generate a new unique effect ID.
fn next_effect_id() -> u64 {
    EFFECT_ID_COUNTER.fetch_add(1, Ordering::Relaxed)
}

struct EffectInner {
    /// Unique identifier for this effect.
    id: u64,

    /// The effect function.
    run: Box<dyn Fn() + Send + Sync>,

    /// Listeners registered by the latest run.
    subscriptions: Mutex<Vec<Disposer>>,

    /// Whether the effect has been disposed.
    disposed: AtomicBool,

    /// Number of times the effect has run.
    run_count: AtomicUsize,

    /// Number of nodes read by the latest run.
    dependency_count: AtomicUsize,
}

impl EffectInner {
    fn execute(self: &Arc<Self>) {
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        self.unsubscribe();

        let _batch = BatchGuard::begin();
        let ctx = TrackingContext::begin();
        (self.run)();
        let tracked = ctx.end();

        self.run_count.fetch_add(1, Ordering::SeqCst);
        self.dependency_count.store(tracked.len(), Ordering::SeqCst);
        trace!(effect = self.id, dependencies = tracked.len(), "effect ran");

        // The body may have disposed the effect.
        if self.disposed.load(Ordering::SeqCst) {
            return;
        }

        let subscriptions = tracked
            .into_iter()
            .map(|entry| {
                let options = if entry.shallow {
                    ListenerOptions::shallow()
                } else {
                    ListenerOptions::default()
                };
                let effect: Weak<Self> = Arc::downgrade(self);
                entry.node.on_change(
                    move |_| {
                        if let Some(effect) = effect.upgrade() {
                            effect.execute();
                        }
                    },
                    options,
                )
            })
            .collect();
        *self.subscriptions.lock() = subscriptions;
    }

    fn unsubscribe(&self) {
        let subscriptions = std::mem::take(&mut *self.subscriptions.lock());
        for subscription in subscriptions {
            subscription.dispose();
        }
    }
}

impl Drop for EffectInner {
    fn drop(&mut self) {
        for subscription in self.subscriptions.get_mut().drain(..) {
            subscription.dispose();
        }
    }
}

/// A side-effecting computation that re-runs when its dependencies change.
///
/// # Example
///
/// ```rust,ignore
/// let count = observable(0);
///
/// let counter = count.clone();
/// let effect = Effect::new(move || {
///     println!("Count is: {:?}", counter.get());
/// });
///
/// count.set(5)?;  // Prints: "Count is: Some(Number(5))"
/// ```
#[derive(Clone)]
pub struct Effect {
    inner: Arc<EffectInner>,
}

impl Effect {
    /// Create a new effect with the given function.
    ///
    /// The function runs immediately to establish initial dependencies.
    pub fn new<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        let effect = Self::new_lazy(run);

        // Run immediately to establish dependencies
        effect.execute();

        effect
    }

    /// Create a new effect without running it immediately.
    ///
    /// The effect has no dependencies until it is first executed.
    pub fn new_lazy<F>(run: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(EffectInner {
                id: next_effect_id(),
                run: Box::new(run),
                subscriptions: Mutex::new(Vec::new()),
                disposed: AtomicBool::new(false),
                run_count: AtomicUsize::new(0),
                dependency_count: AtomicUsize::new(0),
            }),
        }
    }

    /// Get the effect's unique ID.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// Run the effect now and re-subscribe to what it reads.
    pub fn execute(&self) {
        self.inner.execute();
    }

    /// Dispose of the effect.
    ///
    /// After disposal, the effect will not run again.
    pub fn dispose(&self) {
        self.inner.disposed.store(true, Ordering::SeqCst);
        self.inner.unsubscribe();
    }

    /// Check if the effect has been disposed.
    pub fn is_disposed(&self) -> bool {
        self.inner.disposed.load(Ordering::SeqCst)
    }

    /// Get the number of times the effect has run.
    pub fn run_count(&self) -> usize {
        self.inner.run_count.load(Ordering::SeqCst)
    }

    /// Get the number of dependencies.
    pub fn dependency_count(&self) -> usize {
        self.inner.dependency_count.load(Ordering::SeqCst)
    }

    pub(crate) fn downgrade(&self) -> WeakEffect {
        WeakEffect(Arc::downgrade(&self.inner))
    }
}

/// Non-owning handle to an effect, for effects that refer to themselves.
#[derive(Clone)]
pub(crate) struct WeakEffect(Weak<EffectInner>);

impl WeakEffect {
    pub(crate) fn upgrade(&self) -> Option<Effect> {
        self.0.upgrade().map(|inner| Effect { inner })
    }
}

impl std::fmt::Debug for Effect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Effect")
            .field("id", &self.id())
            .field("run_count", &self.run_count())
            .field("dependency_count", &self.dependency_count())
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
